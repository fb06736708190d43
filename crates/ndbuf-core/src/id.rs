//! Strongly-typed identifiers.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// Identity of a managed wrapper registered for deallocation.
///
/// Allocated from the registry's monotonic counter. Ids are never reused
/// within one registry, so a wrapper that is dropped and replaced by a new
/// one at the same address can never alias the old registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for InstanceId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Identifies the device a native allocation lives on.
///
/// `DeviceId(0)` is the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// The host device.
    pub const HOST: DeviceId = DeviceId(0);
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Name of a workspace (a pooled native arena).
///
/// Cheap to clone; the name is shared behind an `Arc<str>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkspaceId(Arc<str>);

impl WorkspaceId {
    /// Create a workspace id from a name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The workspace name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for WorkspaceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl From<&str> for WorkspaceId {
    fn from(v: &str) -> Self {
        Self::new(v)
    }
}

impl From<String> for WorkspaceId {
    fn from(v: String) -> Self {
        Self(Arc::from(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_id_clone_shares_name() {
        let a = WorkspaceId::new("layer_activations");
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(b.as_str(), "layer_activations");
        assert_eq!(a.to_string(), "layer_activations");
    }

    #[test]
    fn instance_id_serializes_as_number() {
        let json = serde_json::to_string(&InstanceId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn host_device_is_zero() {
        assert_eq!(DeviceId::HOST, DeviceId::default());
        assert_eq!(DeviceId::from(3).to_string(), "3");
    }
}
