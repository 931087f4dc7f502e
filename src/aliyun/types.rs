//! JSON shapes returned by the Aliyun CLI.
//!
//! Only the fields the gateway reads are modelled; everything else in the
//! responses is ignored.

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct InstanceTypesResponse {
    #[serde(default)]
    pub(super) instance_types: InstanceTypeList,
    #[serde(default)]
    pub(super) next_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct InstanceTypeList {
    #[serde(default)]
    pub(super) instance_type: Vec<InstanceTypeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct InstanceTypeEntry {
    pub(super) instance_type_id: String,
    #[serde(default)]
    pub(super) cpu_core_count: u32,
    #[serde(default)]
    pub(super) memory_size: f64,
    #[serde(default)]
    pub(super) instance_type_family: String,
    #[serde(default)]
    pub(super) instance_family_level: Option<String>,
    #[serde(default)]
    pub(super) cpu_architecture: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct ImagesResponse {
    #[serde(default)]
    pub(super) images: ImageList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct ImageList {
    #[serde(default)]
    pub(super) image: Vec<ImageEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct ImageEntry {
    pub(super) image_id: String,
    #[serde(default)]
    pub(super) image_name: String,
    #[serde(default)]
    pub(super) creation_time: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AvailableResourceResponse {
    #[serde(default)]
    pub(super) available_zones: AvailableZoneList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AvailableZoneList {
    #[serde(default)]
    pub(super) available_zone: Vec<AvailableZone>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AvailableZone {
    pub(super) zone_id: String,
    #[serde(default)]
    pub(super) status: String,
    #[serde(default)]
    pub(super) available_resources: AvailableResourceList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AvailableResourceList {
    #[serde(default)]
    pub(super) available_resource: Vec<AvailableResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AvailableResource {
    #[serde(default)]
    pub(super) supported_resources: SupportedResourceList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct SupportedResourceList {
    #[serde(default)]
    pub(super) supported_resource: Vec<SupportedResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct SupportedResource {
    pub(super) value: String,
    #[serde(default)]
    pub(super) status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct PriceResponse {
    pub(super) price_info: PriceInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct PriceInfo {
    pub(super) price: PriceEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct PriceEntry {
    pub(super) trade_price: f64,
    #[serde(default)]
    pub(super) original_price: f64,
    #[serde(default)]
    pub(super) currency: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct ResourceGroupsResponse {
    #[serde(default)]
    pub(super) resource_groups: ResourceGroupList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct ResourceGroupList {
    #[serde(default)]
    pub(super) resource_group: Vec<ResourceGroupEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct ResourceGroupEntry {
    pub(super) id: String,
    pub(super) name: String,
    #[serde(default)]
    pub(super) status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct CreateResourceGroupResponse {
    pub(super) resource_group: ResourceGroupEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct VpcsResponse {
    #[serde(default)]
    pub(super) vpcs: VpcList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct VpcList {
    #[serde(default)]
    pub(super) vpc: Vec<VpcEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct VpcEntry {
    pub(super) vpc_id: String,
    #[serde(default)]
    pub(super) vpc_name: String,
    #[serde(default)]
    pub(super) cidr_block: Option<String>,
    #[serde(default)]
    pub(super) resource_group_id: Option<String>,
    #[serde(default)]
    pub(super) status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct VSwitchesResponse {
    #[serde(default, rename = "VSwitches")]
    pub(super) vswitches: VSwitchList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct VSwitchList {
    #[serde(default, rename = "VSwitch")]
    pub(super) vswitch: Vec<VSwitchEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct VSwitchEntry {
    #[serde(rename = "VSwitchId")]
    pub(super) vswitch_id: String,
    #[serde(default, rename = "VSwitchName")]
    pub(super) vswitch_name: String,
    #[serde(default)]
    pub(super) vpc_id: Option<String>,
    #[serde(default)]
    pub(super) zone_id: Option<String>,
    #[serde(default)]
    pub(super) cidr_block: Option<String>,
    #[serde(default)]
    pub(super) status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct SecurityGroupsResponse {
    #[serde(default)]
    pub(super) security_groups: SecurityGroupList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct SecurityGroupList {
    #[serde(default)]
    pub(super) security_group: Vec<SecurityGroupEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct SecurityGroupEntry {
    pub(super) security_group_id: String,
    #[serde(default)]
    pub(super) security_group_name: String,
    #[serde(default)]
    pub(super) vpc_id: Option<String>,
    #[serde(default)]
    pub(super) resource_group_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DisksResponse {
    #[serde(default)]
    pub(super) disks: DiskList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DiskList {
    #[serde(default)]
    pub(super) disk: Vec<DiskEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DiskEntry {
    pub(super) disk_id: String,
    #[serde(default)]
    pub(super) disk_name: String,
    #[serde(default)]
    pub(super) zone_id: Option<String>,
    #[serde(default)]
    pub(super) status: String,
    #[serde(default)]
    pub(super) instance_id: Option<String>,
    #[serde(default)]
    pub(super) resource_group_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct SnapshotsResponse {
    #[serde(default)]
    pub(super) snapshots: SnapshotList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct SnapshotList {
    #[serde(default)]
    pub(super) snapshot: Vec<SnapshotEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct SnapshotEntry {
    pub(super) snapshot_id: String,
    #[serde(default)]
    pub(super) snapshot_name: String,
    #[serde(default)]
    pub(super) creation_time: String,
    #[serde(default)]
    pub(super) status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct InstancesResponse {
    #[serde(default)]
    pub(super) instances: InstanceList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct InstanceList {
    #[serde(default)]
    pub(super) instance: Vec<InstanceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct InstanceEntry {
    pub(super) instance_id: String,
    #[serde(default)]
    pub(super) instance_name: String,
    #[serde(default)]
    pub(super) instance_type: String,
    #[serde(default)]
    pub(super) zone_id: String,
    #[serde(default)]
    pub(super) status: String,
    #[serde(default)]
    pub(super) public_ip_address: IpAddressList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct IpAddressList {
    #[serde(default)]
    pub(super) ip_address: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct RunInstancesResponse {
    #[serde(default)]
    pub(super) instance_id_sets: InstanceIdSets,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct InstanceIdSets {
    #[serde(default)]
    pub(super) instance_id_set: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct VpcCreated {
    pub(super) vpc_id: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct VSwitchCreated {
    #[serde(rename = "VSwitchId")]
    pub(super) vswitch_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct SecurityGroupCreated {
    pub(super) security_group_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DiskCreated {
    pub(super) disk_id: String,
}
