//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::inventory::{
    FailureClass, FailureClassification, GatewayFuture, Image, InstanceState, InstanceStatus,
    InstanceTypeCandidate, InstanceTypeQuery, InventoryGateway, LaunchRequest, Resource,
    ResourceKind, ResourceSpec, Snapshot, SpotOffer, ZoneOffering,
};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the value following `flag`, if present.
    #[must_use]
    pub fn flag_value(&self, flag: &str) -> Option<String> {
        self.args
            .iter()
            .skip_while(|arg| arg.as_os_str() != flag)
            .nth(1)
            .map(|arg| arg.to_string_lossy().into_owned())
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pushes a successful response with `stdout` as the JSON body.
    pub fn push_json(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a provider error in the CLI's stderr format.
    pub fn push_api_error(&self, code: &str, message: &str) {
        self.push_output(
            Some(1),
            "",
            format!("ERROR: SDK.ServerError\nErrorCode: {code}\nRecommend: https://api.aliyun.com/troubleshoot\nRequestId: 00000000-0000-0000-0000-000000000000\nMessage: {message}\n"),
        );
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
            });
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Scripted provider error with an explicit classification.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{code}")]
pub struct FakeError {
    /// Provider error code.
    pub code: String,
    /// Classification reported to the engine.
    pub class: FailureClass,
}

impl FakeError {
    /// A failure the engine should fall back from.
    #[must_use]
    pub fn transient(code: &str) -> Self {
        Self {
            code: code.to_owned(),
            class: FailureClass::Transient,
        }
    }

    /// A failure the engine should stop on.
    #[must_use]
    pub fn fatal(code: &str) -> Self {
        Self {
            code: code.to_owned(),
            class: FailureClass::Fatal,
        }
    }
}

impl FailureClassification for FakeError {
    fn classify(&self) -> FailureClass {
        self.class
    }
}

/// Scripted result of one `create_instance` call.
#[derive(Clone, Debug, PartialEq)]
pub enum CreateOutcome {
    /// The instance is created and reaches Running after one Pending poll.
    Succeed,
    /// The provider rejects the request.
    Reject(FakeError),
    /// The instance is created but reports Stopped instead of Running.
    StopBeforeRunning,
    /// The instance is created but the response arrives after `delay`.
    Stall(Duration),
}

#[derive(Debug, Default)]
struct FakeState {
    instance_types: Vec<InstanceTypeCandidate>,
    images: Vec<Image>,
    zones: Vec<ZoneOffering>,
    prices: BTreeMap<(String, String), SpotOffer>,
    resources: Vec<(ResourceKind, Resource)>,
    snapshots: Vec<Snapshot>,
    instances: Vec<FakeInstance>,
    create_outcomes: BTreeMap<String, VecDeque<CreateOutcome>>,
    failures: BTreeMap<String, FakeError>,
    attachments_ignored: bool,
    calls: Vec<String>,
    next_id: u32,
}

#[derive(Clone, Debug)]
struct FakeInstance {
    status: InstanceStatus,
    polls_until_running: u32,
    stop_on_boot: bool,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn check(&mut self, operation: &str, call: String) -> Result<(), FakeError> {
        self.calls.push(call);
        self.failures
            .get(operation)
            .cloned()
            .map_or(Ok(()), Err)
    }
}

/// In-memory [`InventoryGateway`] that records every call.
///
/// Instances move from Pending to Running after one status poll unless
/// scripted otherwise.
#[derive(Debug, Default)]
pub struct FakeInventory {
    state: Mutex<FakeState>,
}

/// Fixed timestamp helper: 2024-01-01 plus `minutes`.
#[must_use]
pub fn timestamp(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
        + chrono::Duration::minutes(minutes)
}

impl FakeInventory {
    /// Creates an empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an instance type.
    #[must_use]
    pub fn with_instance_type(self, id: &str, cpu_cores: u32, memory_gib: f64) -> Self {
        self.lock().instance_types.push(InstanceTypeCandidate {
            id: id.to_owned(),
            cpu_cores,
            memory_gib,
            family: id.rsplit_once('.').map_or(id, |(family, _)| family).to_owned(),
            generation: None,
            architecture: Some(String::from("X86")),
        });
        self
    }

    /// Adds an image created `minutes` after the reference time.
    #[must_use]
    pub fn with_image(self, id: &str, name: &str, minutes: i64) -> Self {
        self.lock().images.push(Image {
            id: id.to_owned(),
            name: name.to_owned(),
            created_at: timestamp(minutes),
        });
        self
    }

    /// Offers `price` for `instance_type` in `zone`, registering the zone.
    #[must_use]
    pub fn with_price(self, instance_type: &str, zone: &str, price: f64) -> Self {
        {
            let mut state = self.lock();
            if let Some(offering) = state.zones.iter_mut().find(|o| o.zone == zone) {
                offering.instance_types.push(instance_type.to_owned());
            } else {
                state.zones.push(ZoneOffering {
                    zone: zone.to_owned(),
                    instance_types: vec![instance_type.to_owned()],
                });
            }
            state.prices.insert(
                (instance_type.to_owned(), zone.to_owned()),
                SpotOffer {
                    price,
                    origin_price: price,
                    currency: String::from("CNY"),
                    disk_category: String::from("cloud_auto"),
                },
            );
        }
        self
    }

    /// Seeds an existing resource.
    #[must_use]
    pub fn with_resource(self, kind: ResourceKind, resource: Resource) -> Self {
        self.lock().resources.push((kind, resource));
        self
    }

    /// Seeds a completed snapshot created `minutes` after the reference time.
    #[must_use]
    pub fn with_snapshot(self, id: &str, name: &str, minutes: i64) -> Self {
        self.lock().snapshots.push(Snapshot {
            id: id.to_owned(),
            name: name.to_owned(),
            created_at: timestamp(minutes),
            completed: true,
        });
        self
    }

    /// Seeds an existing instance.
    #[must_use]
    pub fn with_instance(self, status: InstanceStatus) -> Self {
        self.lock().instances.push(FakeInstance {
            status,
            polls_until_running: 1,
            stop_on_boot: false,
        });
        self
    }

    /// Queues the result of the next `create_instance` for `instance_type`.
    #[must_use]
    pub fn script_create(self, instance_type: &str, outcome: CreateOutcome) -> Self {
        self.lock()
            .create_outcomes
            .entry(instance_type.to_owned())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Makes every call to `operation` fail with `error`.
    #[must_use]
    pub fn fail_operation(self, operation: &str, error: FakeError) -> Self {
        self.lock().failures.insert(operation.to_owned(), error);
        self
    }

    /// Accepts `attach_disk` calls without ever attaching the disk.
    #[must_use]
    pub fn ignore_attachments(self) -> Self {
        self.lock().attachments_ignored = true;
        self
    }

    /// Returns every call recorded so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Counts recorded calls starting with `prefix`.
    #[must_use]
    pub fn count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    /// Returns the instances that currently exist.
    #[must_use]
    pub fn instances(&self) -> Vec<InstanceStatus> {
        self.lock()
            .instances
            .iter()
            .map(|instance| instance.status.clone())
            .collect()
    }

    /// Returns the resources of `kind` that currently exist.
    #[must_use]
    pub fn resources(&self, kind: ResourceKind) -> Vec<Resource> {
        self.lock()
            .resources
            .iter()
            .filter(|(existing, _)| *existing == kind)
            .map(|(_, resource)| resource.clone())
            .collect()
    }
}

fn resource_from_spec(id: String, spec: &ResourceSpec) -> Resource {
    let base = Resource {
        id,
        name: spec.name().to_owned(),
        status: String::from("Available"),
        ..Resource::default()
    };
    match spec {
        ResourceSpec::ResourceGroup { .. } => Resource {
            status: String::from("OK"),
            ..base
        },
        ResourceSpec::Vpc {
            cidr_block,
            resource_group_id,
            ..
        } => Resource {
            cidr_block: Some(cidr_block.clone()),
            resource_group_id: Some(resource_group_id.clone()),
            ..base
        },
        ResourceSpec::VSwitch {
            vpc_id,
            zone,
            cidr_block,
            ..
        } => Resource {
            vpc_id: Some(vpc_id.clone()),
            zone: Some(zone.clone()),
            cidr_block: Some(cidr_block.clone()),
            ..base
        },
        ResourceSpec::SecurityGroup {
            vpc_id,
            resource_group_id,
            ..
        } => Resource {
            vpc_id: Some(vpc_id.clone()),
            resource_group_id: Some(resource_group_id.clone()),
            ..base
        },
        ResourceSpec::DataDisk {
            zone,
            resource_group_id,
            ..
        } => Resource {
            zone: Some(zone.clone()),
            resource_group_id: Some(resource_group_id.clone()),
            ..base
        },
    }
}

const fn id_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::ResourceGroup => "rg",
        ResourceKind::Vpc => "vpc",
        ResourceKind::VSwitch => "vsw",
        ResourceKind::SecurityGroup => "sg",
        ResourceKind::DataDisk => "d",
    }
}

impl InventoryGateway for FakeInventory {
    type Error = FakeError;

    fn list_instance_types<'a>(
        &'a self,
        _query: &'a InstanceTypeQuery,
    ) -> GatewayFuture<'a, Vec<InstanceTypeCandidate>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check("list_instance_types", String::from("list_instance_types"))?;
            Ok(state.instance_types.clone())
        })
    }

    fn find_images<'a>(&'a self, pattern: &'a str) -> GatewayFuture<'a, Vec<Image>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check("find_images", format!("find_images:{pattern}"))?;
            Ok(state.images.clone())
        })
    }

    fn spot_zones<'a>(
        &'a self,
        region: &'a str,
    ) -> GatewayFuture<'a, Vec<ZoneOffering>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check("spot_zones", format!("spot_zones:{region}"))?;
            Ok(state.zones.clone())
        })
    }

    fn spot_price<'a>(
        &'a self,
        instance_type: &'a str,
        zone: &'a str,
    ) -> GatewayFuture<'a, Option<SpotOffer>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check("spot_price", format!("spot_price:{instance_type}:{zone}"))?;
            Ok(state
                .prices
                .get(&(instance_type.to_owned(), zone.to_owned()))
                .cloned())
        })
    }

    fn find_resource<'a>(
        &'a self,
        kind: ResourceKind,
        name: &'a str,
    ) -> GatewayFuture<'a, Option<Resource>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check("find_resource", format!("find_resource:{kind}:{name}"))?;
            Ok(state
                .resources
                .iter()
                .find(|(existing, resource)| *existing == kind && resource.name == name)
                .map(|(_, resource)| resource.clone()))
        })
    }

    fn create_resource<'a>(
        &'a self,
        spec: &'a ResourceSpec,
    ) -> GatewayFuture<'a, Resource, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            let kind = spec.kind();
            state.check(
                "create_resource",
                format!("create_resource:{kind}:{}", spec.name()),
            )?;
            let id = state.next_id(id_prefix(kind));
            let resource = resource_from_spec(id, spec);
            state.resources.push((kind, resource.clone()));
            Ok(resource)
        })
    }

    fn delete_resource<'a>(
        &'a self,
        kind: ResourceKind,
        id: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check("delete_resource", format!("delete_resource:{kind}:{id}"))?;
            state
                .resources
                .retain(|(existing, resource)| !(*existing == kind && resource.id == id));
            Ok(())
        })
    }

    fn find_snapshots<'a>(
        &'a self,
        prefix: &'a str,
    ) -> GatewayFuture<'a, Vec<Snapshot>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check("find_snapshots", format!("find_snapshots:{prefix}"))?;
            Ok(state
                .snapshots
                .iter()
                .filter(|snapshot| snapshot.name.starts_with(prefix))
                .cloned()
                .collect())
        })
    }

    fn find_instance<'a>(
        &'a self,
        name: &'a str,
    ) -> GatewayFuture<'a, Option<InstanceStatus>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check("find_instance", format!("find_instance:{name}"))?;
            Ok(state
                .instances
                .iter()
                .find(|instance| instance.status.name == name)
                .map(|instance| instance.status.clone()))
        })
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> GatewayFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let (id, stall) = {
                let mut state = self.lock();
                state.check(
                    "create_instance",
                    format!("create_instance:{}:{}", request.instance_type, request.zone),
                )?;
                let outcome = state
                    .create_outcomes
                    .get_mut(&request.instance_type)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or(CreateOutcome::Succeed);
                if let CreateOutcome::Reject(err) = outcome {
                    return Err(err);
                }
                let id = state.next_id("i");
                state.instances.push(FakeInstance {
                    status: InstanceStatus {
                        id: id.clone(),
                        name: request.name.clone(),
                        instance_type: request.instance_type.clone(),
                        zone: request.zone.clone(),
                        state: InstanceState::Pending,
                        public_ip: None,
                    },
                    polls_until_running: 1,
                    stop_on_boot: outcome == CreateOutcome::StopBeforeRunning,
                });
                let stall = match outcome {
                    CreateOutcome::Stall(delay) => Some(delay),
                    _ => None,
                };
                (id, stall)
            };
            if let Some(delay) = stall {
                tokio::time::sleep(delay).await;
            }
            Ok(id)
        })
    }

    fn instance_status<'a>(
        &'a self,
        id: &'a str,
    ) -> GatewayFuture<'a, Option<InstanceStatus>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check("instance_status", format!("instance_status:{id}"))?;
            let Some(instance) = state
                .instances
                .iter_mut()
                .find(|instance| instance.status.id == id)
            else {
                return Ok(None);
            };
            if matches!(
                instance.status.state,
                InstanceState::Pending | InstanceState::Starting | InstanceState::Stopping
            ) {
                if instance.polls_until_running > 0 {
                    instance.polls_until_running -= 1;
                } else if instance.stop_on_boot || instance.status.state == InstanceState::Stopping
                {
                    instance.status.state = InstanceState::Stopped;
                } else {
                    instance.status.state = InstanceState::Running;
                    instance.status.public_ip = Some(String::from("203.0.113.10"));
                }
            }
            Ok(Some(instance.status.clone()))
        })
    }

    fn start_instance<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check("start_instance", format!("start_instance:{id}"))?;
            if let Some(instance) = state
                .instances
                .iter_mut()
                .find(|instance| instance.status.id == id)
            {
                instance.status.state = InstanceState::Starting;
                instance.polls_until_running = 1;
            }
            Ok(())
        })
    }

    fn delete_instance<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check("delete_instance", format!("delete_instance:{id}"))?;
            state.instances.retain(|instance| instance.status.id != id);
            state.resources.retain(|(kind, resource)| {
                !(*kind == ResourceKind::DataDisk && resource.attached_to.as_deref() == Some(id))
            });
            Ok(())
        })
    }

    fn attach_disk<'a>(
        &'a self,
        instance_id: &'a str,
        disk_id: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check("attach_disk", format!("attach_disk:{instance_id}:{disk_id}"))?;
            if state.attachments_ignored {
                return Ok(());
            }
            if let Some((_, disk)) = state
                .resources
                .iter_mut()
                .find(|(kind, resource)| *kind == ResourceKind::DataDisk && resource.id == disk_id)
            {
                disk.status = String::from("In_use");
                disk.attached_to = Some(instance_id.to_owned());
            }
            Ok(())
        })
    }
}
