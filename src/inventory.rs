//! Cloud inventory gateway abstraction.
//!
//! The provisioning engine talks to the cloud exclusively through
//! [`InventoryGateway`]. Provider responses are mapped into the typed entities
//! below at the gateway boundary, and every provider error carries a
//! [`FailureClass`] so the engine can decide between falling back to the next
//! candidate and aborting the session.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::profile::{CpuRange, MemoryRange, Tag};

/// Future returned by gateway operations.
pub type GatewayFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Whether a failure is worth retrying with a different candidate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureClass {
    /// Capacity, price, availability, or throttling; another candidate may
    /// succeed.
    Transient,
    /// Authorization, quota, or malformed request; no candidate will succeed.
    Fatal,
}

/// Implemented by gateway errors so the engine can classify them.
pub trait FailureClassification {
    /// Classifies the failure.
    fn classify(&self) -> FailureClass;
}

/// Wraps a gateway error with the engine's per-call timeout.
#[derive(Debug, Error)]
pub enum CallError<E>
where
    E: std::error::Error + 'static,
{
    /// Error returned by the gateway.
    #[error(transparent)]
    Provider(E),
    /// The call did not complete before the per-call timeout.
    #[error("{operation} did not complete within {timeout:?}")]
    TimedOut {
        /// Gateway operation that timed out.
        operation: &'static str,
        /// Limit that was exceeded.
        timeout: Duration,
    },
}

impl<E> FailureClassification for CallError<E>
where
    E: FailureClassification + std::error::Error + 'static,
{
    fn classify(&self) -> FailureClass {
        match self {
            Self::Provider(err) => err.classify(),
            Self::TimedOut { .. } => FailureClass::Transient,
        }
    }
}

/// Awaits a gateway call, failing with [`CallError::TimedOut`] after `limit`.
///
/// # Errors
///
/// Returns [`CallError::Provider`] when the call fails and
/// [`CallError::TimedOut`] when it exceeds `limit`.
pub async fn bounded<T, E, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, CallError<E>>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(CallError::Provider),
        Err(_elapsed) => Err(CallError::TimedOut {
            operation,
            timeout: limit,
        }),
    }
}

/// Filter passed to [`InventoryGateway::list_instance_types`].
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceTypeQuery {
    /// Accepted CPU core counts.
    pub cpu: CpuRange,
    /// Accepted memory sizes.
    pub memory: MemoryRange,
    /// Optional allow-list; empty means any type.
    pub instance_types: Vec<String>,
}

/// An instance type that satisfies the profile's constraints.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceTypeCandidate {
    /// Provider identifier (for example `ecs.g7.4xlarge`).
    pub id: String,
    /// Number of vCPU cores.
    pub cpu_cores: u32,
    /// Memory size in GiB.
    pub memory_gib: f64,
    /// Instance family (for example `ecs.g7`).
    pub family: String,
    /// Family level or generation reported by the provider.
    pub generation: Option<String>,
    /// CPU architecture reported by the provider.
    pub architecture: Option<String>,
}

/// Boot image resolved from the profile's pattern.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Image {
    /// Provider identifier.
    pub id: String,
    /// Image name.
    pub name: String,
    /// Creation time used to pick the newest match.
    pub created_at: DateTime<Utc>,
}

/// Instance types offered on the spot market in one zone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ZoneOffering {
    /// Zone identifier.
    pub zone: String,
    /// Instance types with spot stock in the zone.
    pub instance_types: Vec<String>,
}

impl ZoneOffering {
    /// Returns `true` when the zone offers `instance_type`.
    #[must_use]
    pub fn offers(&self, instance_type: &str) -> bool {
        self.instance_types.iter().any(|id| id == instance_type)
    }
}

/// Raw spot price returned by the gateway for one type in one zone.
#[derive(Clone, Debug, PartialEq)]
pub struct SpotOffer {
    /// Hourly spot price.
    pub price: f64,
    /// Hourly on-demand price for comparison.
    pub origin_price: f64,
    /// Currency code.
    pub currency: String,
    /// System disk category the price was obtained for.
    pub disk_category: String,
}

/// Kinds of prerequisite resources managed by the reconciler.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResourceKind {
    /// Resource group owning the other resources.
    ResourceGroup,
    /// Virtual private cloud.
    Vpc,
    /// Zonal subnet inside the VPC.
    VSwitch,
    /// Security group inside the VPC.
    SecurityGroup,
    /// Persistent data disk restored from a snapshot.
    DataDisk,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ResourceGroup => "resource group",
            Self::Vpc => "VPC",
            Self::VSwitch => "VSwitch",
            Self::SecurityGroup => "security group",
            Self::DataDisk => "data disk",
        };
        f.write_str(label)
    }
}

/// Desired attributes for a resource, keyed by its deterministic name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResourceSpec {
    /// Resource group.
    ResourceGroup {
        /// Group name.
        name: String,
    },
    /// VPC.
    Vpc {
        /// VPC name.
        name: String,
        /// IPv4 block.
        cidr_block: String,
        /// Owning resource group.
        resource_group_id: String,
    },
    /// VSwitch.
    VSwitch {
        /// VSwitch name.
        name: String,
        /// Parent VPC.
        vpc_id: String,
        /// Zone the VSwitch serves.
        zone: String,
        /// IPv4 block carved from the VPC.
        cidr_block: String,
    },
    /// Security group.
    SecurityGroup {
        /// Group name.
        name: String,
        /// Parent VPC.
        vpc_id: String,
        /// Owning resource group.
        resource_group_id: String,
        /// TCP ports opened to the internet.
        ingress_ports: Vec<u16>,
    },
    /// Data disk.
    DataDisk {
        /// Disk name.
        name: String,
        /// Zone the disk must live in.
        zone: String,
        /// Snapshot the disk is restored from.
        snapshot_id: String,
        /// Owning resource group.
        resource_group_id: String,
        /// Tag marking the disk for later snapshotting.
        tag: Tag,
    },
}

impl ResourceSpec {
    /// Kind of resource this describes.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::ResourceGroup { .. } => ResourceKind::ResourceGroup,
            Self::Vpc { .. } => ResourceKind::Vpc,
            Self::VSwitch { .. } => ResourceKind::VSwitch,
            Self::SecurityGroup { .. } => ResourceKind::SecurityGroup,
            Self::DataDisk { .. } => ResourceKind::DataDisk,
        }
    }

    /// Deterministic name of the resource.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::ResourceGroup { name }
            | Self::Vpc { name, .. }
            | Self::VSwitch { name, .. }
            | Self::SecurityGroup { name, .. }
            | Self::DataDisk { name, .. } => name,
        }
    }

    /// Describes why `existing` cannot stand in for this spec, or `None` when
    /// it is compatible.
    #[must_use]
    pub fn incompatibility(&self, existing: &Resource) -> Option<String> {
        match self {
            Self::ResourceGroup { .. } => (!existing.status.eq_ignore_ascii_case("ok"))
                .then(|| format!("status is {}, expected OK", existing.status)),
            Self::Vpc {
                cidr_block,
                resource_group_id,
                ..
            } => mismatch("CIDR block", existing.cidr_block.as_deref(), cidr_block).or_else(
                || {
                    mismatch(
                        "resource group",
                        existing.resource_group_id.as_deref(),
                        resource_group_id,
                    )
                },
            ),
            Self::VSwitch { vpc_id, zone, .. } => {
                mismatch("VPC", existing.vpc_id.as_deref(), vpc_id)
                    .or_else(|| mismatch("zone", existing.zone.as_deref(), zone))
            }
            Self::SecurityGroup { vpc_id, .. } => {
                mismatch("VPC", existing.vpc_id.as_deref(), vpc_id)
            }
            Self::DataDisk { zone, .. } => mismatch("zone", existing.zone.as_deref(), zone),
        }
    }
}

fn mismatch(attribute: &str, actual: Option<&str>, expected: &str) -> Option<String> {
    match actual {
        Some(value) if value == expected => None,
        Some(value) => Some(format!("{attribute} is {value}, expected {expected}")),
        None => Some(format!("{attribute} is unset, expected {expected}")),
    }
}

/// A resource as reported by the provider.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Resource {
    /// Provider identifier.
    pub id: String,
    /// Resource name.
    pub name: String,
    /// Provider status string (for example `Available` or `In_use`).
    pub status: String,
    /// Zone, for zonal resources.
    pub zone: Option<String>,
    /// Parent VPC, for VSwitches and security groups.
    pub vpc_id: Option<String>,
    /// IPv4 block, for VPCs and VSwitches.
    pub cidr_block: Option<String>,
    /// Owning resource group.
    pub resource_group_id: Option<String>,
    /// Instance the resource is attached to, for disks.
    pub attached_to: Option<String>,
}

/// A data snapshot candidate for restoring the dev-server disk.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// Provider identifier.
    pub id: String,
    /// Snapshot name.
    pub name: String,
    /// Creation time used to pick the newest match.
    pub created_at: DateTime<Utc>,
    /// Whether the snapshot finished and can be restored.
    pub completed: bool,
}

/// Lifecycle state of an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceState {
    /// Accepted but not yet booting.
    Pending,
    /// Booting.
    Starting,
    /// Running.
    Running,
    /// Shutting down.
    Stopping,
    /// Stopped, including after spot reclamation with stop-on-interruption.
    Stopped,
    /// Any other provider state.
    Other(String),
}

impl InstanceState {
    /// Maps a provider status string.
    #[must_use]
    pub fn from_provider(status: &str) -> Self {
        match status {
            "Pending" => Self::Pending,
            "Starting" => Self::Starting,
            "Running" => Self::Running,
            "Stopping" => Self::Stopping,
            "Stopped" => Self::Stopped,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("Pending"),
            Self::Starting => f.write_str("Starting"),
            Self::Running => f.write_str("Running"),
            Self::Stopping => f.write_str("Stopping"),
            Self::Stopped => f.write_str("Stopped"),
            Self::Other(status) => f.write_str(status),
        }
    }
}

/// Provider view of an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceStatus {
    /// Provider identifier.
    pub id: String,
    /// Instance name.
    pub name: String,
    /// Instance type.
    pub instance_type: String,
    /// Zone.
    pub zone: String,
    /// Lifecycle state.
    pub state: InstanceState,
    /// Public IPv4 address, once assigned.
    pub public_ip: Option<String>,
}

/// Spot instance creation request.
#[derive(Clone, Debug, PartialEq)]
pub struct LaunchRequest {
    /// Instance name.
    pub name: String,
    /// Instance type.
    pub instance_type: String,
    /// Zone.
    pub zone: String,
    /// Boot image.
    pub image_id: String,
    /// VSwitch in `zone`.
    pub vswitch_id: String,
    /// Security group.
    pub security_group_id: String,
    /// Owning resource group.
    pub resource_group_id: String,
    /// System disk category matching the quote.
    pub system_disk_category: String,
    /// System disk size in GiB.
    pub system_disk_size_gb: u32,
    /// Spot price ceiling; `None` follows the market price.
    pub max_spot_price: Option<f64>,
    /// Public bandwidth cap in Mbit/s.
    pub internet_max_bandwidth_out: u32,
    /// Tag applied to the instance.
    pub tag: Tag,
    /// Idempotency token unique to this attempt.
    pub client_token: String,
}

/// Capabilities the provisioning engine consumes from a cloud provider.
pub trait InventoryGateway {
    /// Provider specific error type.
    type Error: FailureClassification + std::error::Error + Send + Sync + 'static;

    /// Lists instance types matching `query`.
    fn list_instance_types<'a>(
        &'a self,
        query: &'a InstanceTypeQuery,
    ) -> GatewayFuture<'a, Vec<InstanceTypeCandidate>, Self::Error>;

    /// Lists images whose name matches `pattern`.
    fn find_images<'a>(&'a self, pattern: &'a str) -> GatewayFuture<'a, Vec<Image>, Self::Error>;

    /// Lists zones of `region` with the instance types they offer as spot.
    fn spot_zones<'a>(
        &'a self,
        region: &'a str,
    ) -> GatewayFuture<'a, Vec<ZoneOffering>, Self::Error>;

    /// Fetches the spot price of `instance_type` in `zone`, or `None` when the
    /// zone has no spot offering for it.
    fn spot_price<'a>(
        &'a self,
        instance_type: &'a str,
        zone: &'a str,
    ) -> GatewayFuture<'a, Option<SpotOffer>, Self::Error>;

    /// Finds a resource by its exact name.
    fn find_resource<'a>(
        &'a self,
        kind: ResourceKind,
        name: &'a str,
    ) -> GatewayFuture<'a, Option<Resource>, Self::Error>;

    /// Creates a resource from `spec`.
    fn create_resource<'a>(
        &'a self,
        spec: &'a ResourceSpec,
    ) -> GatewayFuture<'a, Resource, Self::Error>;

    /// Deletes a resource.
    fn delete_resource<'a>(
        &'a self,
        kind: ResourceKind,
        id: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error>;

    /// Lists data snapshots whose name starts with `prefix`.
    fn find_snapshots<'a>(
        &'a self,
        prefix: &'a str,
    ) -> GatewayFuture<'a, Vec<Snapshot>, Self::Error>;

    /// Finds an instance by its exact name.
    fn find_instance<'a>(
        &'a self,
        name: &'a str,
    ) -> GatewayFuture<'a, Option<InstanceStatus>, Self::Error>;

    /// Submits a spot instance creation request and returns the instance id.
    fn create_instance<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> GatewayFuture<'a, String, Self::Error>;

    /// Polls an instance by id; `None` once it no longer exists.
    fn instance_status<'a>(
        &'a self,
        id: &'a str,
    ) -> GatewayFuture<'a, Option<InstanceStatus>, Self::Error>;

    /// Starts a stopped instance.
    fn start_instance<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, (), Self::Error>;

    /// Releases an instance regardless of its state.
    fn delete_instance<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, (), Self::Error>;

    /// Attaches a data disk to an instance.
    fn attach_disk<'a>(
        &'a self,
        instance_id: &'a str,
        disk_id: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error>;
}
