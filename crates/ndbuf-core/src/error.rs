//! Error types for native buffer bookkeeping.
//!
//! Organised by boundary: the native engine ([`EngineError`]), individual
//! deallocators ([`DeallocError`]), the deallocator registry
//! ([`RegistryError`]), and the caller-facing allocation path
//! ([`AllocError`]).

use std::error::Error;
use std::fmt;

use crate::id::{InstanceId, WorkspaceId};

/// Errors reported by a [`NativeEngine`](crate::NativeEngine).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineError {
    /// The engine could not satisfy the request.
    OutOfMemory {
        /// Number of bytes requested.
        requested: usize,
        /// Bytes still available, if the engine knows.
        available: Option<usize>,
    },
    /// The request's byte size overflowed or was otherwise unrepresentable.
    InvalidSize {
        /// Element count of the rejected request.
        len: usize,
    },
    /// `free` was called with a handle the engine does not own
    /// (never allocated, or already freed).
    UnknownHandle {
        /// Raw token of the offending handle.
        raw: u64,
    },
    /// Any other backend-specific failure.
    Backend {
        /// Human-readable description.
        reason: String,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory {
                requested,
                available: Some(available),
            } => write!(
                f,
                "out of native memory: requested {requested} bytes, {available} available"
            ),
            Self::OutOfMemory {
                requested,
                available: None,
            } => write!(f, "out of native memory: requested {requested} bytes"),
            Self::InvalidSize { len } => write!(f, "invalid allocation size: {len} elements"),
            Self::UnknownHandle { raw } => write!(f, "unknown native handle {raw:#x}"),
            Self::Backend { reason } => write!(f, "native backend error: {reason}"),
        }
    }
}

impl Error for EngineError {}

/// Failure of a single deallocator invocation.
///
/// Always swallowed by the registry after logging; it never stops the
/// reclamation of other entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeallocError {
    /// The native `free` call failed.
    Engine(EngineError),
    /// The deallocator reported a failure of its own.
    Failed {
        /// Human-readable description.
        reason: String,
    },
    /// The deallocator panicked; the payload message if it was a string.
    Panicked {
        /// Panic message.
        message: String,
    },
}

impl fmt::Display for DeallocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine(e) => write!(f, "native free failed: {e}"),
            Self::Failed { reason } => write!(f, "deallocator failed: {reason}"),
            Self::Panicked { message } => write!(f, "deallocator panicked: {message}"),
        }
    }
}

impl Error for DeallocError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineError> for DeallocError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

/// Errors from the deallocator registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// A wrapper with this identity is already registered. This is a
    /// programmer error: the same buffer was handed to the registry twice.
    DuplicateRegistration {
        /// The duplicated identity.
        instance: InstanceId,
    },
    /// The registry has been drained and accepts no new registrations.
    ShutDown,
    /// The background reaper thread could not be spawned.
    ReaperSpawnFailed {
        /// The OS error message.
        reason: String,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateRegistration { instance } => {
                write!(f, "instance {instance} is already registered")
            }
            Self::ShutDown => write!(f, "deallocator registry is shut down"),
            Self::ReaperSpawnFailed { reason } => {
                write!(f, "failed to spawn reaper thread: {reason}")
            }
        }
    }
}

impl Error for RegistryError {}

/// Errors returned to callers that request or use native memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The native engine could not allocate. Surfaced synchronously, never
    /// retried.
    NativeAllocationFailure {
        /// Bytes that were requested.
        requested: usize,
        /// The engine's error.
        source: EngineError,
    },
    /// The buffer's native memory has already been freed.
    Released {
        /// The released buffer.
        instance: InstanceId,
    },
    /// A workspace-backed buffer from a cycle that has since been reset.
    StaleHandle {
        /// Workspace generation when the buffer was carved out.
        handle_generation: u64,
        /// The workspace's current generation.
        current_generation: u64,
    },
    /// The workspace backing this buffer has been destroyed.
    WorkspaceDestroyed {
        /// The destroyed workspace.
        workspace: WorkspaceId,
    },
    /// The workspace is full and its spill policy forbids overflow.
    WorkspaceExhausted {
        /// The workspace that ran out of room.
        workspace: WorkspaceId,
        /// Aligned bytes requested.
        requested: usize,
        /// Bytes left in the current cycle.
        remaining: usize,
    },
    /// The request itself is unusable (size overflow, invalid workspace
    /// configuration).
    InvalidRequest {
        /// Why the request was rejected.
        reason: String,
    },
    /// The allocator service is shutting down.
    ShuttingDown,
    /// Registering the new buffer failed.
    Registry(RegistryError),
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NativeAllocationFailure { requested, source } => {
                write!(f, "native allocation of {requested} bytes failed: {source}")
            }
            Self::Released { instance } => {
                write!(f, "buffer {instance} was already released")
            }
            Self::StaleHandle {
                handle_generation,
                current_generation,
            } => write!(
                f,
                "stale workspace buffer: generation {handle_generation}, workspace at {current_generation}"
            ),
            Self::WorkspaceDestroyed { workspace } => {
                write!(f, "workspace '{workspace}' was destroyed")
            }
            Self::WorkspaceExhausted {
                workspace,
                requested,
                remaining,
            } => write!(
                f,
                "workspace '{workspace}' exhausted: requested {requested} bytes, {remaining} remaining"
            ),
            Self::InvalidRequest { reason } => write!(f, "invalid request: {reason}"),
            Self::ShuttingDown => write!(f, "allocator service is shutting down"),
            Self::Registry(e) => write!(f, "registry: {e}"),
        }
    }
}

impl Error for AllocError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NativeAllocationFailure { source, .. } => Some(source),
            Self::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RegistryError> for AllocError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::ShutDown => Self::ShuttingDown,
            other => Self::Registry(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_memory_display_includes_available_when_known() {
        let e = EngineError::OutOfMemory {
            requested: 64,
            available: Some(16),
        };
        assert_eq!(
            e.to_string(),
            "out of native memory: requested 64 bytes, 16 available"
        );
    }

    #[test]
    fn alloc_failure_exposes_engine_source() {
        let e = AllocError::NativeAllocationFailure {
            requested: 64,
            source: EngineError::OutOfMemory {
                requested: 64,
                available: None,
            },
        };
        assert!(e.source().is_some());
    }

    #[test]
    fn registry_shutdown_maps_to_shutting_down() {
        assert_eq!(
            AllocError::from(RegistryError::ShutDown),
            AllocError::ShuttingDown
        );
        let dup = RegistryError::DuplicateRegistration {
            instance: InstanceId(7),
        };
        assert_eq!(AllocError::from(dup.clone()), AllocError::Registry(dup));
    }
}
