//! Service and workspace configuration, validation, and error types.
//!
//! [`ServiceConfig`] is the builder-input for
//! [`AllocatorService::new`](crate::AllocatorService::new), which calls
//! [`validate()`](ServiceConfig::validate) before spawning anything.
//! [`WorkspaceConfig`] is validated by
//! [`create_workspace`](crate::AllocatorService::create_workspace).

use std::error::Error;
use std::fmt;

use ndbuf_core::{DeviceId, MemoryKind};
use ndbuf_registry::ReaperConfig;

// ── ReclaimMode ────────────────────────────────────────────────────

/// When native memory behind an unreachable buffer is freed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReclaimMode {
    /// The last handle's destructor frees immediately.
    #[default]
    Scoped,
    /// Frees happen only when the registry is polled, either by the
    /// reaper thread or by [`poll`](crate::AllocatorService::poll).
    Tracked,
}

// ── ServiceConfig ──────────────────────────────────────────────────

/// Configuration for an [`AllocatorService`](crate::AllocatorService).
#[derive(Clone, Debug, Default)]
pub struct ServiceConfig {
    /// Reclamation strategy. Default: [`ReclaimMode::Scoped`].
    pub reclaim: ReclaimMode,
    /// Background reaper. `None` (the default) runs no thread; dead
    /// entries are then only collected by explicit polls.
    pub reaper: Option<ReaperConfig>,
    /// Device used when a request does not name one. Default: host.
    pub default_device: DeviceId,
}

impl ServiceConfig {
    /// Tracked reclamation with a reaper polling at the default interval.
    pub fn tracked() -> Self {
        Self {
            reclaim: ReclaimMode::Tracked,
            reaper: Some(ReaperConfig::default()),
            ..Self::default()
        }
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(reaper) = &self.reaper {
            if reaper.poll_interval.is_zero() {
                return Err(ConfigError::ZeroPollInterval);
            }
            if reaper.thread_name.contains('\0') {
                return Err(ConfigError::InvalidThreadName {
                    name: reaper.thread_name.clone(),
                });
            }
        }
        Ok(())
    }
}

// ── WorkspaceConfig ────────────────────────────────────────────────

/// What a workspace does with a request that does not fit the chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpillPolicy {
    /// Serve it with an ordinary native allocation tagged with the
    /// workspace.
    #[default]
    External,
    /// Refuse with [`AllocError::WorkspaceExhausted`](ndbuf_core::AllocError::WorkspaceExhausted).
    Fail,
}

/// Configuration for one workspace.
#[derive(Clone, Debug)]
pub struct WorkspaceConfig {
    /// Usable chunk size in bytes. Must be non-zero.
    pub initial_size: usize,
    /// Overflow handling. Default: [`SpillPolicy::External`].
    pub spill: SpillPolicy,
    /// Memory the chunk lives in. Default: host.
    pub memory_kind: MemoryKind,
    /// Device for the chunk. `None` uses the service default.
    pub device: Option<DeviceId>,
}

impl WorkspaceConfig {
    /// A host workspace of `initial_size` usable bytes.
    pub fn new(initial_size: usize) -> Self {
        Self {
            initial_size,
            spill: SpillPolicy::default(),
            memory_kind: MemoryKind::default(),
            device: None,
        }
    }

    /// Same configuration with a different spill policy.
    pub fn with_spill(mut self, spill: SpillPolicy) -> Self {
        self.spill = spill;
        self
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_size == 0 {
            return Err(ConfigError::ZeroWorkspaceSize);
        }
        if self
            .initial_size
            .checked_add(crate::workspace::SAFETY_OFFSET)
            .is_none()
        {
            return Err(ConfigError::WorkspaceTooLarge {
                requested: self.initial_size,
            });
        }
        Ok(())
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected while validating configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The reaper's poll interval is zero.
    ZeroPollInterval,
    /// The reaper thread name contains a NUL byte.
    InvalidThreadName {
        /// The rejected name.
        name: String,
    },
    /// A workspace was configured with no usable bytes.
    ZeroWorkspaceSize,
    /// Chunk size plus the safety offset overflows `usize`.
    WorkspaceTooLarge {
        /// The configured size.
        requested: usize,
    },
    /// The reaper thread could not be spawned.
    ReaperSpawnFailed {
        /// The OS error message.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroPollInterval => write!(f, "reaper poll interval must be non-zero"),
            Self::InvalidThreadName { name } => {
                write!(f, "reaper thread name {name:?} contains a NUL byte")
            }
            Self::ZeroWorkspaceSize => write!(f, "workspace initial_size must be non-zero"),
            Self::WorkspaceTooLarge { requested } => {
                write!(f, "workspace of {requested} bytes is too large")
            }
            Self::ReaperSpawnFailed { reason } => {
                write!(f, "failed to spawn reaper thread: {reason}")
            }
        }
    }
}

impl Error for ConfigError {}
