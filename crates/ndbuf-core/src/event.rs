//! Lifecycle log events.
//!
//! A [`LogEvent`] is produced at every allocation and deallocation and
//! appended to an [`EventSink`](crate::EventSink). Its serialized form is
//! the stream consumed by external log aggregators:
//!
//! ```text
//! {"eventType":"ALLOCATION","timestampMs":1760400000000,"workspaceId":null,
//!  "allocationType":"GENERAL","isConstant":false,"instanceId":7,"bytes":4096}
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::dtype::AllocationKind;
use crate::id::{InstanceId, WorkspaceId};

/// What happened to the allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Native memory was allocated (or carved out of a workspace).
    Allocation,
    /// Native memory was freed.
    Deallocation,
    /// A workspace began a new cycle; older workspace buffers are stale.
    WorkspaceReset,
    /// A workspace's chunk was freed.
    WorkspaceDestroyed,
}

/// Immutable record of one lifecycle transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    /// What happened.
    pub event_type: EventType,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Workspace the allocation belongs to, if any.
    pub workspace_id: Option<WorkspaceId>,
    /// Purpose of the allocation.
    #[serde(rename = "allocationType")]
    pub allocation_kind: AllocationKind,
    /// Whether the buffer's contents are immutable/shared.
    #[serde(rename = "isConstant")]
    pub constant: bool,
    /// The wrapper the event concerns.
    pub instance_id: InstanceId,
    /// Size of the allocation in bytes.
    pub bytes: u64,
}

impl LogEvent {
    /// Create an event stamped with the current wall-clock time.
    pub fn now(
        event_type: EventType,
        instance_id: InstanceId,
        allocation_kind: AllocationKind,
        bytes: u64,
    ) -> Self {
        Self {
            event_type,
            timestamp_ms: wall_clock_ms(),
            workspace_id: None,
            allocation_kind,
            constant: false,
            instance_id,
            bytes,
        }
    }

    /// Attach a workspace id.
    pub fn in_workspace(mut self, workspace: Option<WorkspaceId>) -> Self {
        self.workspace_id = workspace;
        self
    }

    /// Set the constancy flag.
    pub fn constant(mut self, constant: bool) -> Self {
        self.constant = constant;
        self
    }
}

/// Milliseconds since the Unix epoch; 0 if the clock is before it.
pub fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_aggregator_field_names() {
        let event = LogEvent {
            event_type: EventType::Deallocation,
            timestamp_ms: 1_000,
            workspace_id: Some(WorkspaceId::new("ws")),
            allocation_kind: AllocationKind::Workspace,
            constant: true,
            instance_id: InstanceId(3),
            bytes: 64,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "DEALLOCATION");
        assert_eq!(json["timestampMs"], 1_000);
        assert_eq!(json["workspaceId"], "ws");
        assert_eq!(json["allocationType"], "WORKSPACE");
        assert_eq!(json["isConstant"], true);
        assert_eq!(json["instanceId"], 3);
        assert_eq!(json["bytes"], 64);
    }

    #[test]
    fn now_stamps_current_time() {
        let before = wall_clock_ms();
        let event = LogEvent::now(
            EventType::Allocation,
            InstanceId(1),
            AllocationKind::General,
            8,
        );
        assert!(event.timestamp_ms >= before);
        assert!(event.workspace_id.is_none());
        assert!(!event.constant);
    }
}
