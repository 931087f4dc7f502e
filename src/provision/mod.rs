//! Provisioning state machine.
//!
//! A [`Provisioner`] drives one [`ProvisioningSession`] from reconciliation,
//! through candidate fallback, to a running spot instance with its data disk
//! attached. Transient compute failures advance the session to the next
//! ranked candidate; anything else ends it. Instances created by the engine
//! are released again when a later step fails, while reconciled network
//! resources are always kept for the next run.

mod session;

pub use session::{
    AttemptRecord, AttemptResult, ExhaustedReport, FailureReport, InstanceDescriptor, Outcome,
    ProvisioningSession, SessionState,
};

use std::fmt::Display;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::discovery::{DEFAULT_QUOTE_CONCURRENCY, Discovery};
use crate::error::ProvisionError;
use crate::inventory::{
    CallError, FailureClass, FailureClassification, GatewayFuture, Image, InstanceState,
    InstanceStatus, InventoryGateway, LaunchRequest, Resource, ResourceKind, ResourceSpec,
    Snapshot, bounded,
};
use crate::profile::ProvisioningProfile;
use crate::ranking::{RankedCandidate, RankedCandidates, rank};
use crate::reconcile::{Prerequisites, Reconciler};

/// Exponential delay between status polls.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Backoff {
    /// First delay.
    pub initial: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
}

impl Backoff {
    /// Delay following `current`: doubled, capped at [`Self::max`].
    #[must_use]
    pub fn next_delay(self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
        }
    }
}

/// Timeouts and tuning for a provisioning session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EngineSettings {
    /// Limit on any single gateway call.
    pub call_timeout: Duration,
    /// Limit on a new instance reaching Running.
    pub create_timeout: Duration,
    /// Limit on disk attachment and on an existing instance becoming ready.
    pub readiness_timeout: Duration,
    /// Optional limit on the whole session.
    pub session_timeout: Option<Duration>,
    /// Status poll pacing.
    pub backoff: Backoff,
    /// Concurrent price quotes.
    pub quote_concurrency: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            create_timeout: Duration::from_secs(300),
            readiness_timeout: Duration::from_secs(300),
            session_timeout: None,
            backoff: Backoff::default(),
            quote_concurrency: DEFAULT_QUOTE_CONCURRENCY,
        }
    }
}

/// Requests cancellation of the sessions observing the paired
/// [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signals cancellation. Sessions stop at their next checkpoint.
    pub fn cancel(&self) {
        self.sender.send_modify(|cancelled| *cancelled = true);
    }
}

/// Observes cancellation requested through a [`CancelHandle`].
#[derive(Clone, Debug)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that is never raised.
    #[must_use]
    pub fn never() -> Self {
        let (_sender, receiver) = watch::channel(false);
        Self { receiver }
    }

    /// Returns `true` once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    async fn pause(&self, delay: Duration) {
        let mut receiver = self.receiver.clone();
        tokio::select! {
            () = sleep(delay) => {}
            Ok(_) = receiver.wait_for(|cancelled| *cancelled) => {}
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}

/// Creates a connected cancellation pair.
#[must_use]
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (sender, receiver) = watch::channel(false);
    (CancelHandle { sender }, CancelSignal { receiver })
}

#[derive(Debug, Error)]
enum WaitError<E>
where
    E: std::error::Error + 'static,
{
    #[error("instance disappeared while waiting")]
    Vanished,
    #[error("instance reported {state} while waiting for {target}")]
    Unexpected {
        state: InstanceState,
        target: InstanceState,
    },
    #[error("{target} did not complete within {limit:?}")]
    TimedOut { target: String, limit: Duration },
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Call(CallError<E>),
}

enum AttemptError<E>
where
    E: std::error::Error + 'static,
{
    Skipped(String),
    Transient(String),
    Fatal(ProvisionError<E>),
}

#[derive(Debug)]
struct Poller {
    deadline: Instant,
    delay: Duration,
    backoff: Backoff,
}

impl Poller {
    fn new(limit: Duration, backoff: Backoff) -> Self {
        Self {
            deadline: Instant::now() + limit,
            delay: backoff.initial.min(backoff.max),
            backoff,
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    async fn pause(&mut self, cancel: &CancelSignal) {
        let delay = self.delay.min(self.remaining());
        self.delay = self.backoff.next_delay(self.delay);
        cancel.pause(delay).await;
    }
}

struct LaunchContext<'a> {
    profile: &'a ProvisioningProfile,
    prerequisites: &'a Prerequisites,
    image: &'a Image,
    snapshot: &'a Snapshot,
}

/// Drives provisioning sessions against an [`InventoryGateway`].
#[derive(Debug)]
pub struct Provisioner<G> {
    gateway: G,
    settings: EngineSettings,
    cancel: CancelSignal,
    replace: bool,
}

impl<G> Provisioner<G>
where
    G: InventoryGateway,
{
    /// Creates a provisioner over `gateway`.
    #[must_use]
    pub fn new(gateway: G, settings: EngineSettings) -> Self {
        Self {
            gateway,
            settings,
            cancel: CancelSignal::never(),
            replace: false,
        }
    }

    /// Observes `cancel` at every checkpoint.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Releases an existing instance with the profile's name instead of
    /// reusing it.
    #[must_use]
    pub const fn with_replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    /// Gateway the provisioner drives.
    #[must_use]
    pub const fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Runs a fresh session for `profile`.
    pub async fn provision(&self, profile: &ProvisioningProfile) -> Outcome<G::Error> {
        let mut session = ProvisioningSession::new(profile.clone());
        self.run(&mut session).await
    }

    /// Runs `session` to a terminal state.
    pub async fn run(&self, session: &mut ProvisioningSession) -> Outcome<G::Error> {
        session.deadline = self
            .settings
            .session_timeout
            .map(|limit| Instant::now() + limit);

        match self.drive(session).await {
            Ok(Some(descriptor)) => {
                session.enter(SessionState::Running);
                info!(
                    instance_id = %descriptor.instance_id,
                    instance_type = %descriptor.instance_type,
                    zone = %descriptor.zone,
                    public_ip = descriptor.public_ip.as_deref().unwrap_or("-"),
                    relaunched = descriptor.relaunched,
                    "dev server running"
                );
                Outcome::Running(descriptor)
            }
            Ok(None) => {
                session.enter(SessionState::Exhausted);
                warn!(
                    attempts = session.attempts().len(),
                    "every candidate failed; no instance was created"
                );
                Outcome::Exhausted(session.exhausted())
            }
            Err(err) => {
                session.enter(SessionState::Failed);
                error!(error = %err, "provisioning failed");
                Outcome::Failed(session.failed(err))
            }
        }
    }

    /// Discovers, quotes, and ranks candidates for `profile` without
    /// creating anything.
    ///
    /// # Errors
    ///
    /// Returns the discovery error that stopped the search.
    pub async fn rank_candidates(
        &self,
        profile: &ProvisioningProfile,
    ) -> Result<RankedCandidates, ProvisionError<G::Error>> {
        let discovery = self.discovery();
        let candidates = discovery.discover(profile).await?;
        let quoted = discovery.quote_all(candidates, &profile.region).await?;
        Ok(rank(quoted))
    }

    fn discovery(&self) -> Discovery<'_, G> {
        Discovery::new(&self.gateway, self.settings.call_timeout)
            .with_concurrency(self.settings.quote_concurrency)
    }

    const fn reconciler(&self) -> Reconciler<'_, G> {
        Reconciler::new(&self.gateway, self.settings.call_timeout)
    }

    async fn drive(
        &self,
        session: &mut ProvisioningSession,
    ) -> Result<Option<InstanceDescriptor>, ProvisionError<G::Error>> {
        let profile = session.profile().clone();
        let reconciler = self.reconciler();

        session.enter(SessionState::Reconciling);
        self.checkpoint(session, "reconciling prerequisites")?;
        let prerequisites = reconciler.ensure_prerequisites(&profile).await?;

        let existing = self
            .call(
                "find_instance",
                self.gateway.find_instance(&profile.instance_name),
            )
            .await?;
        if let Some(instance) = existing {
            if !self.replace {
                return self.relaunch(session, instance).await.map(Some);
            }
            self.replace_existing(session, &instance).await?;
        }

        let snapshot = reconciler.resolve_snapshot(&profile.snapshot_prefix).await?;
        session.enter(SessionState::SelectingCandidate);
        self.checkpoint(session, "selecting a candidate")?;
        let image = self.discovery().resolve_image(&profile.image_pattern).await?;
        let ranked = self.rank_candidates(&profile).await?;
        info!(candidates = ranked.len(), "ranked spot candidates");

        let context = LaunchContext {
            profile: &profile,
            prerequisites: &prerequisites,
            image: &image,
            snapshot: &snapshot,
        };
        for candidate in ranked.cursor() {
            self.checkpoint(session, "selecting a candidate")?;
            session.select(candidate);
            match self.attempt(session, &context, candidate).await {
                Ok(descriptor) => return Ok(Some(descriptor)),
                Err(AttemptError::Skipped(reason)) => {
                    info!(instance_type = candidate.instance_type(), zone = candidate.zone(), %reason, "skipping candidate");
                    session.record(candidate, AttemptResult::Skipped(reason));
                }
                Err(AttemptError::Transient(reason)) => {
                    warn!(instance_type = candidate.instance_type(), zone = candidate.zone(), %reason, "candidate failed; trying the next one");
                    session.record(candidate, AttemptResult::Failed(reason));
                    session.enter(SessionState::SelectingCandidate);
                }
                Err(AttemptError::Fatal(err)) => {
                    session.record(candidate, AttemptResult::Failed(err.to_string()));
                    return Err(err);
                }
            }
        }
        Ok(None)
    }

    async fn attempt(
        &self,
        session: &mut ProvisioningSession,
        context: &LaunchContext<'_>,
        candidate: &RankedCandidate,
    ) -> Result<InstanceDescriptor, AttemptError<G::Error>> {
        let profile = context.profile;
        if let Some(ceiling) = profile
            .max_spot_price
            .filter(|ceiling| candidate.price() > *ceiling)
        {
            return Err(AttemptError::Skipped(format!(
                "price {} exceeds the ceiling of {ceiling}",
                candidate.price()
            )));
        }

        let vswitch = self
            .reconciler()
            .ensure_vswitch(profile, context.prerequisites, candidate.zone())
            .await
            .map_err(AttemptError::Fatal)?;

        session.enter(SessionState::CreatingInstance);
        let request = LaunchRequest {
            name: profile.instance_name.clone(),
            instance_type: candidate.instance_type().to_owned(),
            zone: candidate.zone().to_owned(),
            image_id: context.image.id.clone(),
            vswitch_id: vswitch.id,
            security_group_id: context.prerequisites.security_group.id.clone(),
            resource_group_id: context.prerequisites.resource_group.id.clone(),
            system_disk_category: candidate.quote.disk_category().to_owned(),
            system_disk_size_gb: profile.system_disk_size_gb,
            max_spot_price: profile.max_spot_price,
            internet_max_bandwidth_out: profile.internet_max_bandwidth_out,
            tag: profile.automation_tag.clone(),
            client_token: Uuid::new_v4().to_string(),
        };
        let instance = self.launch(session, &request).await?;

        session.enter(SessionState::AttachingStorage);
        let (disk_id, ready) = self
            .attach_storage(session, context, &instance)
            .await
            .map_err(AttemptError::Fatal)?;

        Ok(InstanceDescriptor {
            instance_id: ready.id,
            name: ready.name,
            instance_type: ready.instance_type,
            zone: ready.zone,
            price: Some(candidate.price()),
            currency: Some(candidate.quote.currency().to_owned()),
            disk_id: Some(disk_id),
            public_ip: ready.public_ip,
            relaunched: false,
        })
    }

    async fn launch(
        &self,
        session: &ProvisioningSession,
        request: &LaunchRequest,
    ) -> Result<InstanceStatus, AttemptError<G::Error>> {
        let created = bounded(
            "create_instance",
            self.settings.call_timeout,
            self.gateway.create_instance(request),
        )
        .await;
        let instance_id = match created {
            Ok(id) => id,
            Err(err @ CallError::TimedOut { .. }) => {
                let teardown = self.release_by_name(&request.name).await;
                return Err(AttemptError::Transient(append_teardown_note(
                    err.to_string(),
                    teardown.as_ref(),
                )));
            }
            Err(err) if err.classify() == FailureClass::Transient => {
                return Err(AttemptError::Transient(err.to_string()));
            }
            Err(err) => {
                return Err(AttemptError::Fatal(ProvisionError::CreateRejected {
                    instance_type: request.instance_type.clone(),
                    zone: request.zone.clone(),
                    message: err.to_string(),
                    source: err,
                }));
            }
        };
        info!(%instance_id, instance_type = %request.instance_type, zone = %request.zone, "instance created");

        let waited = self
            .wait_for_instance(
                session,
                &instance_id,
                &InstanceState::Running,
                self.settings.create_timeout,
            )
            .await;
        match waited {
            Ok(status) => Ok(status),
            Err(WaitError::Cancelled) => {
                let teardown = self.release(&instance_id).await;
                Err(AttemptError::Fatal(ProvisionError::Cancelled {
                    stage: append_teardown_note(
                        String::from("waiting for a new instance"),
                        teardown.as_ref(),
                    ),
                }))
            }
            Err(WaitError::Call(err)) if err.classify() == FailureClass::Fatal => {
                let teardown = self.release(&instance_id).await;
                Err(AttemptError::Fatal(ProvisionError::InventoryUnavailable {
                    operation: "instance_status",
                    source: err,
                    teardown: teardown.map(|failure| failure.to_string()),
                }))
            }
            Err(other) => {
                let teardown = self.release(&instance_id).await;
                Err(AttemptError::Transient(append_teardown_note(
                    other.to_string(),
                    teardown.as_ref(),
                )))
            }
        }
    }

    async fn attach_storage(
        &self,
        session: &ProvisioningSession,
        context: &LaunchContext<'_>,
        instance: &InstanceStatus,
    ) -> Result<(String, InstanceStatus), ProvisionError<G::Error>> {
        let disk_name = context.profile.data_disk_name();
        let spec = ResourceSpec::DataDisk {
            name: disk_name.clone(),
            zone: instance.zone.clone(),
            snapshot_id: context.snapshot.id.clone(),
            resource_group_id: context.prerequisites.resource_group.id.clone(),
            tag: context.profile.automation_tag.clone(),
        };
        let ensured = match self.reconciler().ensure(&spec).await {
            Ok(ensured) => ensured,
            Err(ProvisionError::InventoryUnavailable { source, .. }) => {
                let message = source.to_string();
                return Err(self
                    .storage_failure(instance, &disk_name, None, message, Some(source))
                    .await);
            }
            Err(ProvisionError::ResourceConflict { kind, name, reason }) => {
                let teardown = self.release(&instance.id).await;
                return Err(ProvisionError::ResourceConflict {
                    kind,
                    name,
                    reason: append_teardown_note(reason, teardown.as_ref()),
                });
            }
            Err(err) => {
                return Err(self
                    .storage_failure(instance, &disk_name, None, err.to_string(), None)
                    .await);
            }
        };
        let disk = ensured.resource;
        let created = ensured.created.then_some(&disk);

        if let Some(owner) = disk
            .attached_to
            .as_deref()
            .filter(|owner| *owner != instance.id)
        {
            let message = format!("disk {} is attached to instance {owner}", disk.id);
            return Err(self
                .storage_failure(instance, &disk_name, created, message, None)
                .await);
        }

        if !is_attached(&disk, &instance.id) {
            let attached = bounded(
                "attach_disk",
                self.settings.call_timeout,
                self.gateway.attach_disk(&instance.id, &disk.id),
            )
            .await;
            if let Err(err) = attached {
                return Err(self
                    .storage_failure(instance, &disk_name, created, err.to_string(), Some(err))
                    .await);
            }
            info!(instance_id = %instance.id, disk_id = %disk.id, "data disk attached");
        }

        match self.wait_for_disk(session, instance, &disk_name).await {
            Ok(ready) => Ok((disk.id.clone(), ready)),
            Err(WaitError::Cancelled) => {
                let teardown = self.teardown(&instance.id, created).await;
                Err(ProvisionError::Cancelled {
                    stage: append_teardown_note(
                        String::from("attaching the data disk"),
                        teardown.as_ref(),
                    ),
                })
            }
            Err(WaitError::Call(err)) => Err(self
                .storage_failure(instance, &disk_name, created, err.to_string(), Some(err))
                .await),
            Err(other) => Err(self
                .storage_failure(instance, &disk_name, created, other.to_string(), None)
                .await),
        }
    }

    async fn storage_failure(
        &self,
        instance: &InstanceStatus,
        disk_name: &str,
        created_disk: Option<&Resource>,
        message: String,
        source: Option<CallError<G::Error>>,
    ) -> ProvisionError<G::Error> {
        let teardown = self.teardown(&instance.id, created_disk).await;
        ProvisionError::StorageAttachFailed {
            instance_id: instance.id.clone(),
            disk: disk_name.to_owned(),
            message: append_teardown_note(message, teardown.as_ref()),
            source,
        }
    }

    /// Releases the attempt's instance and, when this attempt created it, its
    /// data disk. Returns every cleanup failure joined into one note.
    async fn teardown(&self, instance_id: &str, created_disk: Option<&Resource>) -> Option<String> {
        let mut failures: Vec<String> = self
            .release(instance_id)
            .await
            .map(|err| err.to_string())
            .into_iter()
            .collect();
        if let Some(disk) = created_disk {
            let discarded = self.discard_disk(instance_id, disk).await;
            failures.extend(discarded.map(|err| err.to_string()));
        }
        (!failures.is_empty()).then(|| failures.join("; "))
    }

    /// Deletes a disk created by the current attempt unless it already went
    /// away with the released instance.
    async fn discard_disk(
        &self,
        instance_id: &str,
        disk: &Resource,
    ) -> Option<CallError<G::Error>> {
        let found = bounded(
            "find_resource",
            self.settings.call_timeout,
            self.gateway.find_resource(ResourceKind::DataDisk, &disk.name),
        )
        .await;
        let remaining = match found {
            Ok(remaining) => remaining,
            Err(err) => {
                warn!(disk_id = %disk.id, error = %err, "failed to look up data disk for cleanup");
                return Some(err);
            }
        };
        let left_behind = remaining.is_some_and(|current| {
            current.id == disk.id && current.attached_to.as_deref() != Some(instance_id)
        });
        if !left_behind {
            debug!(disk_id = %disk.id, "data disk already released with its instance");
            return None;
        }

        let deleted = bounded(
            "delete_resource",
            self.settings.call_timeout,
            self.gateway.delete_resource(ResourceKind::DataDisk, &disk.id),
        )
        .await;
        match deleted {
            Ok(()) => {
                info!(disk_id = %disk.id, "deleted data disk created by this attempt");
                None
            }
            Err(err) => {
                warn!(disk_id = %disk.id, error = %err, "failed to delete data disk");
                Some(err)
            }
        }
    }

    async fn wait_for_disk(
        &self,
        session: &ProvisioningSession,
        instance: &InstanceStatus,
        disk_name: &str,
    ) -> Result<InstanceStatus, WaitError<G::Error>> {
        let limit = self.settings.readiness_timeout;
        let mut poller = Poller::new(limit, self.settings.backoff);
        loop {
            if self.interrupted(session) {
                return Err(WaitError::Cancelled);
            }
            let polled = bounded(
                "find_resource",
                self.settings.call_timeout,
                self.gateway.find_resource(ResourceKind::DataDisk, disk_name),
            )
            .await;
            match polled {
                Ok(Some(disk)) if is_attached(&disk, &instance.id) => break,
                Ok(_) => debug!(instance_id = %instance.id, disk = disk_name, "waiting for data disk"),
                Err(err) if err.classify() == FailureClass::Transient => {
                    warn!(disk = disk_name, error = %err, "disk poll failed; retrying");
                }
                Err(err) => return Err(WaitError::Call(err)),
            }
            if poller.expired() {
                return Err(WaitError::TimedOut {
                    target: String::from("data disk attachment"),
                    limit,
                });
            }
            poller.pause(&self.cancel).await;
        }
        self.wait_for_instance(
            session,
            &instance.id,
            &InstanceState::Running,
            poller.remaining(),
        )
        .await
    }

    async fn wait_for_instance(
        &self,
        session: &ProvisioningSession,
        instance_id: &str,
        target: &InstanceState,
        limit: Duration,
    ) -> Result<InstanceStatus, WaitError<G::Error>> {
        let mut poller = Poller::new(limit, self.settings.backoff);
        loop {
            if self.interrupted(session) {
                return Err(WaitError::Cancelled);
            }
            let polled = bounded(
                "instance_status",
                self.settings.call_timeout,
                self.gateway.instance_status(instance_id),
            )
            .await;
            match polled {
                Ok(None) => return Err(WaitError::Vanished),
                Ok(Some(status)) if status.state == *target => return Ok(status),
                Ok(Some(status)) if leads_to(&status.state, target) => {
                    debug!(instance_id, state = %status.state, %target, "waiting for instance");
                }
                Ok(Some(status)) => {
                    return Err(WaitError::Unexpected {
                        state: status.state,
                        target: target.clone(),
                    });
                }
                Err(err) if err.classify() == FailureClass::Transient => {
                    warn!(instance_id, error = %err, "status poll failed; retrying");
                }
                Err(err) => return Err(WaitError::Call(err)),
            }
            if poller.expired() {
                return Err(WaitError::TimedOut {
                    target: format!("transition to {target}"),
                    limit,
                });
            }
            poller.pause(&self.cancel).await;
        }
    }

    async fn relaunch(
        &self,
        session: &mut ProvisioningSession,
        existing: InstanceStatus,
    ) -> Result<InstanceDescriptor, ProvisionError<G::Error>> {
        session.enter(SessionState::RelaunchDetected);
        info!(instance_id = %existing.id, state = %existing.state, "found existing instance");
        let disk_name = session.profile().data_disk_name();

        let ready = match existing.state.clone() {
            InstanceState::Running => existing,
            InstanceState::Pending | InstanceState::Starting => {
                self.await_existing(session, &existing.id, &InstanceState::Running)
                    .await?
            }
            InstanceState::Stopped => {
                warn!(
                    instance_id = %existing.id,
                    "instance is stopped, most likely reclaimed by the spot market; starting it"
                );
                self.start_existing(session, &existing.id).await?
            }
            InstanceState::Stopping => {
                self.await_existing(session, &existing.id, &InstanceState::Stopped)
                    .await?;
                self.start_existing(session, &existing.id).await?
            }
            InstanceState::Other(state) => {
                return Err(ProvisionError::InstanceNotStartable {
                    instance_id: existing.id,
                    state,
                });
            }
        };

        let disk_id = self
            .call(
                "find_resource",
                self.gateway.find_resource(ResourceKind::DataDisk, &disk_name),
            )
            .await?
            .filter(|disk| is_attached(disk, &ready.id))
            .map(|disk| disk.id);
        if disk_id.is_none() {
            warn!(instance_id = %ready.id, disk = %disk_name, "existing instance has no data disk attached");
        }

        Ok(InstanceDescriptor {
            instance_id: ready.id,
            name: ready.name,
            instance_type: ready.instance_type,
            zone: ready.zone,
            price: None,
            currency: None,
            disk_id,
            public_ip: ready.public_ip,
            relaunched: true,
        })
    }

    async fn start_existing(
        &self,
        session: &ProvisioningSession,
        instance_id: &str,
    ) -> Result<InstanceStatus, ProvisionError<G::Error>> {
        self.call("start_instance", self.gateway.start_instance(instance_id))
            .await?;
        self.await_existing(session, instance_id, &InstanceState::Running)
            .await
    }

    async fn await_existing(
        &self,
        session: &ProvisioningSession,
        instance_id: &str,
        target: &InstanceState,
    ) -> Result<InstanceStatus, ProvisionError<G::Error>> {
        let waited = self
            .wait_for_instance(session, instance_id, target, self.settings.readiness_timeout)
            .await;
        waited.map_err(|err| match err {
            WaitError::Cancelled => ProvisionError::Cancelled {
                stage: String::from("waiting for the existing instance"),
            },
            WaitError::Call(source) => ProvisionError::unavailable("instance_status", source),
            other => ProvisionError::InstanceNotReady {
                instance_id: instance_id.to_owned(),
                message: other.to_string(),
            },
        })
    }

    async fn replace_existing(
        &self,
        session: &ProvisioningSession,
        existing: &InstanceStatus,
    ) -> Result<(), ProvisionError<G::Error>> {
        info!(instance_id = %existing.id, "releasing existing instance before replacing it");
        self.call("delete_instance", self.gateway.delete_instance(&existing.id))
            .await?;

        let limit = self.settings.create_timeout;
        let mut poller = Poller::new(limit, self.settings.backoff);
        loop {
            self.checkpoint(session, "releasing the existing instance")?;
            let remaining = self
                .call("instance_status", self.gateway.instance_status(&existing.id))
                .await?;
            if remaining.is_none() {
                return Ok(());
            }
            if poller.expired() {
                return Err(ProvisionError::InstanceNotReady {
                    instance_id: existing.id.clone(),
                    message: format!("still present {limit:?} after release"),
                });
            }
            poller.pause(&self.cancel).await;
        }
    }

    async fn release(&self, instance_id: &str) -> Option<CallError<G::Error>> {
        let released = bounded(
            "delete_instance",
            self.settings.call_timeout,
            self.gateway.delete_instance(instance_id),
        )
        .await;
        match released {
            Ok(()) => {
                info!(instance_id, "released instance");
                None
            }
            Err(err) => {
                warn!(instance_id, error = %err, "failed to release instance");
                Some(err)
            }
        }
    }

    async fn release_by_name(&self, name: &str) -> Option<CallError<G::Error>> {
        let found = bounded(
            "find_instance",
            self.settings.call_timeout,
            self.gateway.find_instance(name),
        )
        .await;
        match found {
            Ok(Some(instance)) => self.release(&instance.id).await,
            Ok(None) => None,
            Err(err) => Some(err),
        }
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        call: GatewayFuture<'_, T, G::Error>,
    ) -> Result<T, ProvisionError<G::Error>> {
        bounded(operation, self.settings.call_timeout, call)
            .await
            .map_err(|err| ProvisionError::unavailable(operation, err))
    }

    fn interrupted(&self, session: &ProvisioningSession) -> bool {
        self.cancel.is_cancelled()
            || session
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn checkpoint(
        &self,
        session: &ProvisioningSession,
        stage: &str,
    ) -> Result<(), ProvisionError<G::Error>> {
        if self.interrupted(session) {
            return Err(ProvisionError::Cancelled {
                stage: stage.to_owned(),
            });
        }
        Ok(())
    }
}

const fn leads_to(state: &InstanceState, target: &InstanceState) -> bool {
    match target {
        InstanceState::Running => matches!(state, InstanceState::Pending | InstanceState::Starting),
        InstanceState::Stopped => matches!(state, InstanceState::Stopping),
        _ => false,
    }
}

fn is_attached(disk: &Resource, instance_id: &str) -> bool {
    disk.status.eq_ignore_ascii_case("in_use") && disk.attached_to.as_deref() == Some(instance_id)
}

fn append_teardown_note<E: Display>(message: String, teardown_error: Option<&E>) -> String {
    if let Some(teardown) = teardown_error {
        format!("{message} (teardown also failed: {teardown})")
    } else {
        message
    }
}

#[cfg(test)]
mod tests;
