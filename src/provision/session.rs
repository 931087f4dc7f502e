//! Per-invocation session state and the outcome it produces.

use std::fmt;
use std::time::Instant;

use tracing::info;

use crate::error::ProvisionError;
use crate::profile::ProvisioningProfile;
use crate::ranking::RankedCandidate;

/// States of the provisioning state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Nothing has happened yet.
    Idle,
    /// Ensuring prerequisites and looking for an existing instance.
    Reconciling,
    /// An instance with the profile's name already exists.
    RelaunchDetected,
    /// Pulling the next ranked candidate.
    SelectingCandidate,
    /// Waiting for the provider to create and boot an instance.
    CreatingInstance,
    /// Attaching the data disk and waiting for readiness.
    AttachingStorage,
    /// The dev server is running.
    Running,
    /// Every candidate failed transiently, or none existed.
    Exhausted,
    /// The session stopped on a fatal error.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Reconciling => "reconciling",
            Self::RelaunchDetected => "relaunch-detected",
            Self::SelectingCandidate => "selecting-candidate",
            Self::CreatingInstance => "creating-instance",
            Self::AttachingStorage => "attaching-storage",
            Self::Running => "running",
            Self::Exhausted => "exhausted",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// How a single candidate attempt ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttemptResult {
    /// The candidate was not submitted (for example, above the price ceiling).
    Skipped(String),
    /// The provider rejected or failed the candidate.
    Failed(String),
}

/// One entry of the session's attempt log.
#[derive(Clone, Debug, PartialEq)]
pub struct AttemptRecord {
    /// Candidate instance type.
    pub instance_type: String,
    /// Candidate zone.
    pub zone: String,
    /// Quoted spot price.
    pub price: f64,
    /// How the attempt ended.
    pub result: AttemptResult,
}

impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (verb, reason) = match &self.result {
            AttemptResult::Skipped(reason) => ("skipped", reason),
            AttemptResult::Failed(reason) => ("failed", reason),
        };
        write!(
            f,
            "{} in {} at {}: {verb}: {reason}",
            self.instance_type, self.zone, self.price
        )
    }
}

/// Everything a caller needs to reach the running dev server.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceDescriptor {
    /// Provider instance id.
    pub instance_id: String,
    /// Instance name.
    pub name: String,
    /// Instance type.
    pub instance_type: String,
    /// Zone.
    pub zone: String,
    /// Spot price quoted at creation; `None` for a reused instance.
    pub price: Option<f64>,
    /// Currency of `price`.
    pub currency: Option<String>,
    /// Attached data disk, when one was found or created.
    pub disk_id: Option<String>,
    /// Public IPv4 address.
    pub public_ip: Option<String>,
    /// Whether an existing instance was reused.
    pub relaunched: bool,
}

/// Report for a session whose candidates all failed transiently.
#[derive(Clone, Debug, PartialEq)]
pub struct ExhaustedReport {
    /// Instance name of the profile.
    pub profile: String,
    /// Every attempt, in order.
    pub attempts: Vec<AttemptRecord>,
}

impl fmt::Display for ExhaustedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no spot candidate for '{}' could be created after {} attempt(s)",
            self.profile,
            self.attempts.len()
        )
    }
}

/// Report for a session that stopped on a fatal error.
#[derive(Debug)]
pub struct FailureReport<E>
where
    E: std::error::Error + 'static,
{
    /// Instance name of the profile.
    pub profile: String,
    /// Last candidate tried, as `type@zone`.
    pub last_candidate: Option<String>,
    /// Attempts made before the failure.
    pub attempts: Vec<AttemptRecord>,
    /// The error that ended the session.
    pub error: ProvisionError<E>,
}

impl<E> fmt::Display for FailureReport<E>
where
    E: std::error::Error + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provisioning '{}' failed: {}", self.profile, self.error)?;
        if let Some(candidate) = &self.last_candidate {
            write!(f, " (last candidate: {candidate})")?;
        }
        Ok(())
    }
}

/// Result of one provisioning session.
#[derive(Debug)]
pub enum Outcome<E>
where
    E: std::error::Error + 'static,
{
    /// The dev server is running.
    Running(InstanceDescriptor),
    /// No candidate could be created.
    Exhausted(ExhaustedReport),
    /// The session stopped on a fatal error.
    Failed(FailureReport<E>),
}

impl<E> Outcome<E>
where
    E: std::error::Error + 'static,
{
    /// Process exit code conventionally associated with the outcome.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Running(_) => 0,
            Self::Failed(_) => 1,
            Self::Exhausted(_) => 3,
        }
    }
}

/// Ephemeral coordination object for one invocation. Never persisted.
#[derive(Clone, Debug)]
pub struct ProvisioningSession {
    profile: ProvisioningProfile,
    state: SessionState,
    history: Vec<SessionState>,
    attempts: Vec<AttemptRecord>,
    last_candidate: Option<String>,
    pub(super) deadline: Option<Instant>,
}

impl ProvisioningSession {
    /// Starts an idle session for `profile`.
    #[must_use]
    pub fn new(profile: ProvisioningProfile) -> Self {
        Self {
            profile,
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
            attempts: Vec::new(),
            last_candidate: None,
            deadline: None,
        }
    }

    /// Profile driving the session.
    #[must_use]
    pub const fn profile(&self) -> &ProvisioningProfile {
        &self.profile
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Every state entered so far, in order.
    #[must_use]
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Attempt log.
    #[must_use]
    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub(super) fn enter(&mut self, next: SessionState) {
        info!(from = %self.state, to = %next, instance_name = %self.profile.instance_name, "session transition");
        self.state = next;
        self.history.push(next);
    }

    pub(super) fn select(&mut self, candidate: &RankedCandidate) {
        self.last_candidate = Some(format!("{}@{}", candidate.instance_type(), candidate.zone()));
    }

    pub(super) fn record(&mut self, candidate: &RankedCandidate, result: AttemptResult) {
        self.attempts.push(AttemptRecord {
            instance_type: candidate.instance_type().to_owned(),
            zone: candidate.zone().to_owned(),
            price: candidate.price(),
            result,
        });
    }

    pub(super) fn exhausted(&self) -> ExhaustedReport {
        ExhaustedReport {
            profile: self.profile.instance_name.clone(),
            attempts: self.attempts.clone(),
        }
    }

    pub(super) fn failed<E>(&self, error: ProvisionError<E>) -> FailureReport<E>
    where
        E: std::error::Error + 'static,
    {
        FailureReport {
            profile: self.profile.instance_name.clone(),
            last_candidate: self.last_candidate.clone(),
            attempts: self.attempts.clone(),
            error,
        }
    }
}
