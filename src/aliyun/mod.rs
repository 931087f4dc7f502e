//! Inventory gateway backed by the `aliyun` CLI.
//!
//! Every operation shells out to `aliyun <product> <Action> --Param value`
//! on a blocking worker and parses the JSON the CLI prints. API failures are
//! recognised from the `ErrorCode:` line the CLI writes to stderr and are
//! classified by code, so the engine can tell stock and price problems from
//! authorization or quota problems.

mod error;
mod types;

pub use error::{AliyunError, classify_code};

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::debug;

use crate::command::{CommandRunner, ProcessCommandRunner, render_command};
use crate::inventory::{
    GatewayFuture, Image, InstanceState, InstanceStatus, InstanceTypeCandidate,
    InstanceTypeQuery, InventoryGateway, LaunchRequest, Resource, ResourceKind, ResourceSpec,
    Snapshot, SpotOffer, ZoneOffering,
};
use crate::profile::Tag;
use types::{
    AvailableResourceResponse, CreateResourceGroupResponse, DiskCreated, DiskEntry,
    DisksResponse, ImagesResponse, InstanceEntry, InstanceTypesResponse, InstancesResponse,
    PriceResponse, ResourceGroupsResponse, RunInstancesResponse, SecurityGroupCreated,
    SecurityGroupsResponse, SnapshotsResponse, VSwitchCreated, VSwitchesResponse, VpcCreated,
    VpcsResponse,
};

/// Default CLI binary name.
pub const DEFAULT_ALIYUN_BIN: &str = "aliyun";

/// Category used for the restored data disk.
pub const DEFAULT_DATA_DISK_CATEGORY: &str = "cloud_auto";

/// System disk categories tried, in order, when quoting a spot price.
pub const SYSTEM_DISK_CATEGORIES: [&str; 6] = [
    "cloud_auto",
    "cloud_essd",
    "cloud_efficiency",
    "cloud_ssd",
    "cloud_essd_entry",
    "ephemeral_ssd",
];

const SPOT_AS_PRICE_GO: &str = "SpotAsPriceGo";
const SPOT_WITH_PRICE_LIMIT: &str = "SpotWithPriceLimit";
const PAGE_SIZE: usize = 100;
const UNSUPPORTED_DISK_CATEGORY: &str = "InvalidSystemDiskCategory.ValueNotSupported";

/// Codes meaning the type has no spot offering in the zone.
const UNOFFERED_CODES: &[&str] = &[
    "OperationDenied.NoStock",
    "Zone.NotOnSale",
    "InvalidInstanceType.ValueNotSupported",
    "InvalidResourceType.NotSupported",
];

/// Settings for [`AliyunGateway`].
#[derive(Clone, Debug, PartialEq)]
pub struct AliyunSettings {
    /// Path to the `aliyun` binary.
    pub binary: String,
    /// Region every regional call targets.
    pub region: String,
    /// Named CLI credential profile; `None` uses the CLI default.
    pub profile: Option<String>,
    /// Category of the restored data disk.
    pub data_disk_category: String,
    /// System disk categories tried when quoting.
    pub system_disk_categories: Vec<String>,
    /// Number of polls while waiting for a created resource.
    pub ready_attempts: u32,
    /// Delay between those polls.
    pub ready_interval: Duration,
}

impl AliyunSettings {
    /// Default settings for `region`.
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            binary: String::from(DEFAULT_ALIYUN_BIN),
            region: region.into(),
            profile: None,
            data_disk_category: String::from(DEFAULT_DATA_DISK_CATEGORY),
            system_disk_categories: SYSTEM_DISK_CATEGORIES
                .iter()
                .map(|category| (*category).to_owned())
                .collect(),
            ready_attempts: 10,
            ready_interval: Duration::from_secs(1),
        }
    }
}

struct Call {
    product: &'static str,
    action: &'static str,
    params: Vec<(String, String)>,
}

impl Call {
    const fn new(product: &'static str, action: &'static str) -> Self {
        Self {
            product,
            action,
            params: Vec::new(),
        }
    }

    fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    fn tag(self, tag: &Tag) -> Self {
        self.param("Tag.1.Key", tag.key.as_str())
            .param("Tag.1.Value", tag.value.as_str())
    }
}

/// [`InventoryGateway`] that drives the `aliyun` CLI.
#[derive(Debug)]
pub struct AliyunGateway<R> {
    settings: AliyunSettings,
    runner: Arc<R>,
}

impl AliyunGateway<ProcessCommandRunner> {
    /// Creates a gateway wired to the real process runner.
    #[must_use]
    pub fn with_process_runner(settings: AliyunSettings) -> Self {
        Self::new(settings, ProcessCommandRunner)
    }
}

impl<R> AliyunGateway<R>
where
    R: CommandRunner + 'static,
{
    /// Creates a gateway using `runner` to invoke the CLI.
    #[must_use]
    pub fn new(settings: AliyunSettings, runner: R) -> Self {
        Self {
            settings,
            runner: Arc::new(runner),
        }
    }

    /// Settings the gateway was built with.
    #[must_use]
    pub const fn settings(&self) -> &AliyunSettings {
        &self.settings
    }

    fn ecs(&self, action: &'static str) -> Call {
        Call::new("ecs", action).param("RegionId", self.settings.region.as_str())
    }

    fn vpc(&self, action: &'static str) -> Call {
        Call::new("vpc", action).param("RegionId", self.settings.region.as_str())
    }

    fn build_args(&self, call: &Call) -> Vec<OsString> {
        let mut args = vec![OsString::from(call.product), OsString::from(call.action)];
        if let Some(profile) = &self.settings.profile {
            args.push(OsString::from("--profile"));
            args.push(OsString::from(profile));
        }
        for (name, value) in &call.params {
            args.push(OsString::from(format!("--{name}")));
            args.push(OsString::from(value));
        }
        args
    }

    async fn run(&self, call: Call) -> Result<String, AliyunError> {
        let args = self.build_args(&call);
        debug!(command = %render_command(&self.settings.binary, &args), "invoking aliyun");
        let runner = Arc::clone(&self.runner);
        let program = self.settings.binary.clone();
        let output = tokio::task::spawn_blocking(move || runner.run(&program, &args))
            .await
            .map_err(|err| AliyunError::Join {
                action: call.action.to_owned(),
                message: err.to_string(),
            })??;
        if output.is_success() {
            Ok(output.stdout)
        } else {
            Err(AliyunError::from_output(call.action, &output))
        }
    }

    async fn query<T>(&self, call: Call) -> Result<T, AliyunError>
    where
        T: DeserializeOwned,
    {
        let action = call.action;
        let stdout = self.run(call).await?;
        serde_json::from_str(&stdout).map_err(|err| AliyunError::Parse {
            action: action.to_owned(),
            message: err.to_string(),
        })
    }

    async fn instance_types(
        &self,
        query: &InstanceTypeQuery,
    ) -> Result<Vec<InstanceTypeCandidate>, AliyunError> {
        let mut found = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut call = self
                .ecs("DescribeInstanceTypes")
                .param("MinimumCpuCoreCount", query.cpu.min().to_string())
                .param("MaximumCpuCoreCount", query.cpu.max().to_string())
                .param("MinimumMemorySize", query.memory.min_gib().to_string())
                .param("MaximumMemorySize", query.memory.max_gib().to_string())
                .param("MaxResults", "1600");
            for (position, id) in (1..).zip(&query.instance_types) {
                call = call.param(format!("InstanceTypes.{position}"), id.as_str());
            }
            if let Some(token) = next_token.take() {
                call = call.param("NextToken", token);
            }

            let page: InstanceTypesResponse = self.query(call).await?;
            found.extend(page.instance_types.instance_type.into_iter().map(|entry| {
                InstanceTypeCandidate {
                    id: entry.instance_type_id,
                    cpu_cores: entry.cpu_core_count,
                    memory_gib: entry.memory_size,
                    family: entry.instance_type_family,
                    generation: entry.instance_family_level,
                    architecture: entry.cpu_architecture,
                }
            }));
            next_token = page.next_token.filter(|token| !token.is_empty());
            if next_token.is_none() {
                return Ok(found);
            }
        }
    }

    async fn images(&self, pattern: &str) -> Result<Vec<Image>, AliyunError> {
        let mut images = Vec::new();
        for page_number in 1.. {
            let call = self
                .ecs("DescribeImages")
                .param("ImageName", pattern)
                .param("Status", "Available")
                .param("PageSize", PAGE_SIZE.to_string())
                .param("PageNumber", page_number.to_string());
            let page: ImagesResponse = self.query(call).await?;
            let fetched = page.images.image.len();
            images.extend(
                page.images
                    .image
                    .into_iter()
                    .filter(|entry| glob_matches(pattern, &entry.image_name))
                    .map(|entry| Image {
                        id: entry.image_id,
                        name: entry.image_name,
                        created_at: parse_time(&entry.creation_time),
                    }),
            );
            if fetched < PAGE_SIZE {
                break;
            }
        }
        Ok(images)
    }

    async fn zones(&self, region: &str) -> Result<Vec<ZoneOffering>, AliyunError> {
        let call = Call::new("ecs", "DescribeAvailableResource")
            .param("RegionId", region)
            .param("DestinationResource", "InstanceType")
            .param("InstanceChargeType", "PostPaid")
            .param("SpotStrategy", SPOT_AS_PRICE_GO);
        let response: AvailableResourceResponse = self.query(call).await?;
        Ok(response
            .available_zones
            .available_zone
            .into_iter()
            .filter(|zone| zone.status == "Available")
            .map(|zone| ZoneOffering {
                zone: zone.zone_id,
                instance_types: zone
                    .available_resources
                    .available_resource
                    .into_iter()
                    .flat_map(|resource| resource.supported_resources.supported_resource)
                    .filter(|supported| supported.status == "Available")
                    .map(|supported| supported.value)
                    .collect(),
            })
            .collect())
    }

    async fn price(
        &self,
        instance_type: &str,
        zone: &str,
    ) -> Result<Option<SpotOffer>, AliyunError> {
        for category in &self.settings.system_disk_categories {
            let call = self
                .ecs("DescribePrice")
                .param("ResourceType", "instance")
                .param("InstanceType", instance_type)
                .param("ZoneId", zone)
                .param("SpotStrategy", SPOT_AS_PRICE_GO)
                .param("SystemDisk.Category", category.as_str());
            match self.query::<PriceResponse>(call).await {
                Ok(response) => {
                    let price = response.price_info.price;
                    return Ok(Some(SpotOffer {
                        price: price.trade_price,
                        origin_price: price.original_price,
                        currency: price.currency,
                        disk_category: category.clone(),
                    }));
                }
                Err(err) if err.code() == Some(UNSUPPORTED_DISK_CATEGORY) => {
                    debug!(instance_type, zone, %category, "system disk category not offered");
                }
                Err(err) if err.code().is_some_and(|code| UNOFFERED_CODES.contains(&code)) => {
                    debug!(instance_type, zone, error = %err, "no spot offering");
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    async fn lookup(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Option<Resource>, AliyunError> {
        let found = match kind {
            ResourceKind::ResourceGroup => {
                let call = Call::new("resourcemanager", "ListResourceGroups")
                    .param("Name", name)
                    .param("PageSize", PAGE_SIZE.to_string());
                let response: ResourceGroupsResponse = self.query(call).await?;
                response
                    .resource_groups
                    .resource_group
                    .into_iter()
                    .find(|group| group.name == name)
                    .map(|group| Resource {
                        id: group.id,
                        name: group.name,
                        status: group.status,
                        ..Resource::default()
                    })
            }
            ResourceKind::Vpc => {
                let call = self.vpc("DescribeVpcs").param("VpcName", name);
                let response: VpcsResponse = self.query(call).await?;
                response
                    .vpcs
                    .vpc
                    .into_iter()
                    .find(|vpc| vpc.vpc_name == name)
                    .map(|vpc| Resource {
                        id: vpc.vpc_id,
                        name: vpc.vpc_name,
                        status: vpc.status,
                        cidr_block: vpc.cidr_block,
                        resource_group_id: vpc.resource_group_id,
                        ..Resource::default()
                    })
            }
            ResourceKind::VSwitch => {
                let call = self.vpc("DescribeVSwitches").param("VSwitchName", name);
                let response: VSwitchesResponse = self.query(call).await?;
                response
                    .vswitches
                    .vswitch
                    .into_iter()
                    .find(|vswitch| vswitch.vswitch_name == name)
                    .map(|vswitch| Resource {
                        id: vswitch.vswitch_id,
                        name: vswitch.vswitch_name,
                        status: vswitch.status,
                        zone: vswitch.zone_id,
                        vpc_id: vswitch.vpc_id,
                        cidr_block: vswitch.cidr_block,
                        ..Resource::default()
                    })
            }
            ResourceKind::SecurityGroup => {
                let call = self
                    .ecs("DescribeSecurityGroups")
                    .param("SecurityGroupName", name);
                let response: SecurityGroupsResponse = self.query(call).await?;
                response
                    .security_groups
                    .security_group
                    .into_iter()
                    .find(|group| group.security_group_name == name)
                    .map(|group| Resource {
                        id: group.security_group_id,
                        name: group.security_group_name,
                        status: String::from("Available"),
                        vpc_id: group.vpc_id,
                        resource_group_id: group.resource_group_id,
                        ..Resource::default()
                    })
            }
            ResourceKind::DataDisk => {
                let call = self.ecs("DescribeDisks").param("DiskName", name);
                let response: DisksResponse = self.query(call).await?;
                response
                    .disks
                    .disk
                    .into_iter()
                    .find(|disk| disk.disk_name == name)
                    .map(disk_resource)
            }
        };
        Ok(found)
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<Resource, AliyunError> {
        match spec {
            ResourceSpec::ResourceGroup { name } => {
                let call = Call::new("resourcemanager", "CreateResourceGroup")
                    .param("Name", name.as_str())
                    .param("DisplayName", name.as_str());
                let response: CreateResourceGroupResponse = self.query(call).await?;
                self.await_ready(ResourceKind::ResourceGroup, name, &response.resource_group.id)
                    .await
            }
            ResourceSpec::Vpc {
                name,
                cidr_block,
                resource_group_id,
            } => {
                let call = self
                    .vpc("CreateVpc")
                    .param("VpcName", name.as_str())
                    .param("CidrBlock", cidr_block.as_str())
                    .param("ResourceGroupId", resource_group_id.as_str());
                let created: VpcCreated = self.query(call).await?;
                self.await_ready(ResourceKind::Vpc, name, &created.vpc_id)
                    .await
            }
            ResourceSpec::VSwitch {
                name,
                vpc_id,
                zone,
                cidr_block,
            } => {
                let call = self
                    .vpc("CreateVSwitch")
                    .param("VSwitchName", name.as_str())
                    .param("VpcId", vpc_id.as_str())
                    .param("ZoneId", zone.as_str())
                    .param("CidrBlock", cidr_block.as_str());
                let created: VSwitchCreated = self.query(call).await?;
                self.await_ready(ResourceKind::VSwitch, name, &created.vswitch_id)
                    .await
            }
            ResourceSpec::SecurityGroup {
                name,
                vpc_id,
                resource_group_id,
                ingress_ports,
            } => {
                let call = self
                    .ecs("CreateSecurityGroup")
                    .param("SecurityGroupName", name.as_str())
                    .param("VpcId", vpc_id.as_str())
                    .param("ResourceGroupId", resource_group_id.as_str());
                let created: SecurityGroupCreated = self.query(call).await?;
                for port in ingress_ports {
                    let rule = self
                        .ecs("AuthorizeSecurityGroup")
                        .param("SecurityGroupId", created.security_group_id.as_str())
                        .param("IpProtocol", "tcp")
                        .param("PortRange", format!("{port}/{port}"))
                        .param("SourceCidrIp", "0.0.0.0/0");
                    self.run(rule).await?;
                }
                Ok(Resource {
                    id: created.security_group_id,
                    name: name.clone(),
                    status: String::from("Available"),
                    vpc_id: Some(vpc_id.clone()),
                    resource_group_id: Some(resource_group_id.clone()),
                    ..Resource::default()
                })
            }
            ResourceSpec::DataDisk {
                name,
                zone,
                snapshot_id,
                resource_group_id,
                tag,
            } => {
                let call = self
                    .ecs("CreateDisk")
                    .param("ZoneId", zone.as_str())
                    .param("DiskName", name.as_str())
                    .param("SnapshotId", snapshot_id.as_str())
                    .param("DiskCategory", self.settings.data_disk_category.as_str())
                    .param("BurstingEnabled", "true")
                    .param("ResourceGroupId", resource_group_id.as_str())
                    .tag(tag);
                let created: DiskCreated = self.query(call).await?;
                self.await_ready(ResourceKind::DataDisk, name, &created.disk_id)
                    .await
            }
        }
    }

    async fn await_ready(
        &self,
        kind: ResourceKind,
        name: &str,
        id: &str,
    ) -> Result<Resource, AliyunError> {
        for attempt in 1..=self.settings.ready_attempts {
            if let Some(resource) = self
                .lookup(kind, name)
                .await?
                .filter(|resource| resource.id == id && is_ready(kind, &resource.status))
            {
                return Ok(resource);
            }
            debug!(%kind, id, attempt, "waiting for resource to become available");
            sleep(self.settings.ready_interval).await;
        }
        Err(AliyunError::NotReady {
            resource: kind.to_string(),
            id: id.to_owned(),
        })
    }

    async fn remove(&self, kind: ResourceKind, id: &str) -> Result<(), AliyunError> {
        let call = match kind {
            ResourceKind::ResourceGroup => {
                Call::new("resourcemanager", "DeleteResourceGroup").param("ResourceGroupId", id)
            }
            ResourceKind::Vpc => self.vpc("DeleteVpc").param("VpcId", id),
            ResourceKind::VSwitch => self.vpc("DeleteVSwitch").param("VSwitchId", id),
            ResourceKind::SecurityGroup => {
                self.ecs("DeleteSecurityGroup").param("SecurityGroupId", id)
            }
            ResourceKind::DataDisk => Call::new("ecs", "DeleteDisk").param("DiskId", id),
        };
        self.run(call).await.map(drop)
    }

    async fn snapshots(&self, prefix: &str) -> Result<Vec<Snapshot>, AliyunError> {
        let mut snapshots = Vec::new();
        for page_number in 1.. {
            let call = self
                .ecs("DescribeSnapshots")
                .param("SourceDiskType", "data")
                .param("PageSize", PAGE_SIZE.to_string())
                .param("PageNumber", page_number.to_string());
            let page: SnapshotsResponse = self.query(call).await?;
            let fetched = page.snapshots.snapshot.len();
            snapshots.extend(
                page.snapshots
                    .snapshot
                    .into_iter()
                    .filter(|entry| entry.snapshot_name.starts_with(prefix))
                    .map(|entry| Snapshot {
                        completed: entry.status == "accomplished",
                        created_at: parse_time(&entry.creation_time),
                        id: entry.snapshot_id,
                        name: entry.snapshot_name,
                    }),
            );
            if fetched < PAGE_SIZE {
                break;
            }
        }
        Ok(snapshots)
    }

    async fn instance_by_name(&self, name: &str) -> Result<Option<InstanceStatus>, AliyunError> {
        let call = self.ecs("DescribeInstances").param("InstanceName", name);
        let response: InstancesResponse = self.query(call).await?;
        Ok(response
            .instances
            .instance
            .into_iter()
            .find(|instance| instance.instance_name == name)
            .map(instance_status))
    }

    async fn instance_by_id(&self, id: &str) -> Result<Option<InstanceStatus>, AliyunError> {
        let ids = serde_json::to_string(&[id]).map_err(|err| AliyunError::Parse {
            action: String::from("DescribeInstances"),
            message: err.to_string(),
        })?;
        let call = self.ecs("DescribeInstances").param("InstanceIds", ids);
        let response: InstancesResponse = self.query(call).await?;
        Ok(response
            .instances
            .instance
            .into_iter()
            .find(|instance| instance.instance_id == id)
            .map(instance_status))
    }

    async fn launch(&self, request: &LaunchRequest) -> Result<String, AliyunError> {
        let mut call = self
            .ecs("RunInstances")
            .param("ZoneId", request.zone.as_str())
            .param("InstanceType", request.instance_type.as_str())
            .param("ImageId", request.image_id.as_str())
            .param("InstanceName", request.name.as_str())
            .param("VSwitchId", request.vswitch_id.as_str())
            .param("SecurityGroupId", request.security_group_id.as_str())
            .param("ResourceGroupId", request.resource_group_id.as_str())
            .param("InstanceChargeType", "PostPaid")
            .param("SpotDuration", "0")
            .param("SpotInterruptionBehavior", "Stop")
            .param("SystemDisk.Category", request.system_disk_category.as_str())
            .param("SystemDisk.Size", request.system_disk_size_gb.to_string())
            .param(
                "InternetMaxBandwidthOut",
                request.internet_max_bandwidth_out.to_string(),
            )
            .param("InternetChargeType", "PayByTraffic")
            .param("Amount", "1")
            .param("ClientToken", request.client_token.as_str())
            .tag(&request.tag);
        call = match request.max_spot_price {
            Some(limit) => call
                .param("SpotStrategy", SPOT_WITH_PRICE_LIMIT)
                .param("SpotPriceLimit", limit.to_string()),
            None => call.param("SpotStrategy", SPOT_AS_PRICE_GO),
        };
        if request.system_disk_category == "cloud_essd" {
            call = call.param("SystemDisk.PerformanceLevel", "PL0");
        }

        let response: RunInstancesResponse = self.query(call).await?;
        response
            .instance_id_sets
            .instance_id_set
            .into_iter()
            .next()
            .ok_or_else(|| AliyunError::MissingField {
                action: String::from("RunInstances"),
                field: "InstanceIdSets.InstanceIdSet",
            })
    }

    async fn start(&self, id: &str) -> Result<(), AliyunError> {
        let call = Call::new("ecs", "StartInstance").param("InstanceId", id);
        self.run(call).await.map(drop)
    }

    async fn release(&self, id: &str) -> Result<(), AliyunError> {
        let call = Call::new("ecs", "DeleteInstance")
            .param("InstanceId", id)
            .param("Force", "true");
        self.run(call).await.map(drop)
    }

    async fn attach(&self, instance_id: &str, disk_id: &str) -> Result<(), AliyunError> {
        let call = Call::new("ecs", "AttachDisk")
            .param("InstanceId", instance_id)
            .param("DiskId", disk_id)
            .param("DeleteWithInstance", "true");
        self.run(call).await.map(drop)
    }
}

impl<R> InventoryGateway for AliyunGateway<R>
where
    R: CommandRunner + 'static,
{
    type Error = AliyunError;

    fn list_instance_types<'a>(
        &'a self,
        query: &'a InstanceTypeQuery,
    ) -> GatewayFuture<'a, Vec<InstanceTypeCandidate>, Self::Error> {
        Box::pin(self.instance_types(query))
    }

    fn find_images<'a>(&'a self, pattern: &'a str) -> GatewayFuture<'a, Vec<Image>, Self::Error> {
        Box::pin(self.images(pattern))
    }

    fn spot_zones<'a>(
        &'a self,
        region: &'a str,
    ) -> GatewayFuture<'a, Vec<ZoneOffering>, Self::Error> {
        Box::pin(self.zones(region))
    }

    fn spot_price<'a>(
        &'a self,
        instance_type: &'a str,
        zone: &'a str,
    ) -> GatewayFuture<'a, Option<SpotOffer>, Self::Error> {
        Box::pin(self.price(instance_type, zone))
    }

    fn find_resource<'a>(
        &'a self,
        kind: ResourceKind,
        name: &'a str,
    ) -> GatewayFuture<'a, Option<Resource>, Self::Error> {
        Box::pin(self.lookup(kind, name))
    }

    fn create_resource<'a>(
        &'a self,
        spec: &'a ResourceSpec,
    ) -> GatewayFuture<'a, Resource, Self::Error> {
        Box::pin(self.create(spec))
    }

    fn delete_resource<'a>(
        &'a self,
        kind: ResourceKind,
        id: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(self.remove(kind, id))
    }

    fn find_snapshots<'a>(
        &'a self,
        prefix: &'a str,
    ) -> GatewayFuture<'a, Vec<Snapshot>, Self::Error> {
        Box::pin(self.snapshots(prefix))
    }

    fn find_instance<'a>(
        &'a self,
        name: &'a str,
    ) -> GatewayFuture<'a, Option<InstanceStatus>, Self::Error> {
        Box::pin(self.instance_by_name(name))
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> GatewayFuture<'a, String, Self::Error> {
        Box::pin(self.launch(request))
    }

    fn instance_status<'a>(
        &'a self,
        id: &'a str,
    ) -> GatewayFuture<'a, Option<InstanceStatus>, Self::Error> {
        Box::pin(self.instance_by_id(id))
    }

    fn start_instance<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(self.start(id))
    }

    fn delete_instance<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(self.release(id))
    }

    fn attach_disk<'a>(
        &'a self,
        instance_id: &'a str,
        disk_id: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(self.attach(instance_id, disk_id))
    }
}

fn disk_resource(disk: DiskEntry) -> Resource {
    Resource {
        id: disk.disk_id,
        name: disk.disk_name,
        status: disk.status,
        zone: disk.zone_id,
        resource_group_id: disk.resource_group_id,
        attached_to: disk.instance_id.filter(|id| !id.is_empty()),
        ..Resource::default()
    }
}

fn instance_status(instance: InstanceEntry) -> InstanceStatus {
    InstanceStatus {
        state: InstanceState::from_provider(&instance.status),
        public_ip: instance.public_ip_address.ip_address.into_iter().next(),
        id: instance.instance_id,
        name: instance.instance_name,
        instance_type: instance.instance_type,
        zone: instance.zone_id,
    }
}

fn is_ready(kind: ResourceKind, status: &str) -> bool {
    match kind {
        ResourceKind::ResourceGroup => status.eq_ignore_ascii_case("ok"),
        _ => status.eq_ignore_ascii_case("available"),
    }
}

/// Parses a provider timestamp. Unparsable values sort before everything.
fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|time| time.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%MZ").map(|time| time.and_utc())
        })
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Matches `text` against a pattern where `*` spans any run of characters
/// and `?` matches exactly one.
fn glob_matches(pattern: &str, text: &str) -> bool {
    let mut pattern_chars = pattern.chars();
    let mut text_chars = text.chars();
    match pattern_chars.next() {
        None => text.is_empty(),
        Some('*') => {
            let rest = pattern_chars.as_str();
            text.char_indices()
                .map(|(offset, _)| offset)
                .chain(std::iter::once(text.len()))
                .any(|offset| {
                    text.get(offset..)
                        .is_some_and(|tail| glob_matches(rest, tail))
                })
        }
        Some('?') => {
            text_chars.next().is_some()
                && glob_matches(pattern_chars.as_str(), text_chars.as_str())
        }
        Some(expected) => {
            text_chars.next() == Some(expected)
                && glob_matches(pattern_chars.as_str(), text_chars.as_str())
        }
    }
}

#[cfg(test)]
mod tests;
