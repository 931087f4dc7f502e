//! Error taxonomy shared by discovery, reconciliation, and provisioning.

use thiserror::Error;

use crate::inventory::{CallError, ResourceKind};

/// Errors that end a provisioning session.
///
/// Transient compute failures never appear here: the fallback loop absorbs
/// them and records them in the session's attempt log instead.
#[derive(Debug, Error)]
pub enum ProvisionError<E>
where
    E: std::error::Error + 'static,
{
    /// The gateway could not be reached or rejected a read.
    #[error(
        "inventory unavailable during {operation}: {source}{}",
        teardown_note(.teardown.as_deref())
    )]
    InventoryUnavailable {
        /// Gateway operation that failed.
        operation: &'static str,
        /// Underlying gateway error.
        #[source]
        source: CallError<E>,
        /// Cleanup failure, when releasing an instance created by the
        /// session failed as well.
        teardown: Option<String>,
    },
    /// No instance type satisfies the CPU and memory constraints.
    #[error("no instance type offers {cpu} with {memory}")]
    NoMatchingInstanceType {
        /// Requested CPU range.
        cpu: String,
        /// Requested memory range.
        memory: String,
    },
    /// No image matches the configured pattern.
    #[error("no image matches '{pattern}'")]
    ImageNotFound {
        /// Pattern that matched nothing.
        pattern: String,
    },
    /// A resource with the expected name exists but cannot be reused.
    #[error("existing {kind} '{name}' conflicts with the profile: {reason}")]
    ResourceConflict {
        /// Kind of the conflicting resource.
        kind: ResourceKind,
        /// Deterministic name that collided.
        name: String,
        /// Human-readable incompatibility.
        reason: String,
    },
    /// No completed snapshot matches the configured prefix.
    #[error("no completed data snapshot named '{prefix}*'")]
    SnapshotNotFound {
        /// Prefix that matched nothing.
        prefix: String,
    },
    /// The provider rejected instance creation with a fatal error.
    #[error("creating {instance_type} in {zone} was rejected: {message}")]
    CreateRejected {
        /// Candidate instance type.
        instance_type: String,
        /// Candidate zone.
        zone: String,
        /// Error text, including any cleanup note.
        message: String,
        /// Underlying gateway error.
        #[source]
        source: CallError<E>,
    },
    /// The data disk could not be attached or never became ready.
    #[error("failed to attach data disk '{disk}' to instance {instance_id}: {message}")]
    StorageAttachFailed {
        /// Instance the disk was meant for.
        instance_id: String,
        /// Disk name.
        disk: String,
        /// Error text, including any cleanup note.
        message: String,
        /// Underlying gateway error, when there was one.
        #[source]
        source: Option<CallError<E>>,
    },
    /// An existing instance is in a state the engine cannot start from.
    #[error("existing instance {instance_id} in state {state} cannot be started")]
    InstanceNotStartable {
        /// Existing instance.
        instance_id: String,
        /// State reported by the provider.
        state: String,
    },
    /// An existing instance did not reach Running in time.
    #[error("instance {instance_id} did not become ready: {message}")]
    InstanceNotReady {
        /// Instance being awaited.
        instance_id: String,
        /// Human-readable reason.
        message: String,
    },
    /// The session was cancelled by the user or its timeout.
    #[error("provisioning cancelled while {stage}")]
    Cancelled {
        /// What the engine was doing when it noticed.
        stage: String,
    },
}

impl<E> ProvisionError<E>
where
    E: std::error::Error + 'static,
{
    pub(crate) const fn unavailable(operation: &'static str, source: CallError<E>) -> Self {
        Self::InventoryUnavailable {
            operation,
            source,
            teardown: None,
        }
    }
}

fn teardown_note(teardown: Option<&str>) -> String {
    teardown.map_or_else(String::new, |note| {
        format!(" (teardown also failed: {note})")
    })
}
