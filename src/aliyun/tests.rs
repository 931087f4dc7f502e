//! Unit tests for the Aliyun CLI gateway.

use std::time::Duration;

use rstest::rstest;

use super::*;
use crate::inventory::{FailureClass, FailureClassification};
use crate::profile::{CpuRange, MemoryRange};
use crate::test_support::ScriptedRunner;

fn gateway() -> (AliyunGateway<ScriptedRunner>, ScriptedRunner) {
    let runner = ScriptedRunner::new();
    let settings = AliyunSettings {
        ready_interval: Duration::from_millis(1),
        ready_attempts: 3,
        ..AliyunSettings::new("cn-hangzhou")
    };
    (AliyunGateway::new(settings, runner.clone()), runner)
}

fn launch_request(max_spot_price: Option<f64>) -> LaunchRequest {
    LaunchRequest {
        name: String::from("dev-server"),
        instance_type: String::from("ecs.g7.4xlarge"),
        zone: String::from("cn-hangzhou-h"),
        image_id: String::from("m-1"),
        vswitch_id: String::from("vsw-1"),
        security_group_id: String::from("sg-1"),
        resource_group_id: String::from("rg-1"),
        system_disk_category: String::from("cloud_essd"),
        system_disk_size_gb: 20,
        max_spot_price,
        internet_max_bandwidth_out: 10,
        tag: Tag::parse("managed-by=devserver").unwrap_or_else(|err| panic!("tag: {err}")),
        client_token: String::from("token-1"),
    }
}

#[tokio::test]
async fn instance_types_follow_pagination_tokens() {
    let (gateway, runner) = gateway();
    runner.push_json(
        r#"{"InstanceTypes":{"InstanceType":[{"InstanceTypeId":"ecs.g7.4xlarge","CpuCoreCount":16,"MemorySize":64.0,"InstanceTypeFamily":"ecs.g7"}]},"NextToken":"page-2"}"#,
    );
    runner.push_json(
        r#"{"InstanceTypes":{"InstanceType":[{"InstanceTypeId":"ecs.c7.4xlarge","CpuCoreCount":16,"MemorySize":32.0,"InstanceTypeFamily":"ecs.c7","CpuArchitecture":"X86"}]},"NextToken":""}"#,
    );
    let query = InstanceTypeQuery {
        cpu: CpuRange::new(16, 32).unwrap_or_else(|err| panic!("cpu: {err}")),
        memory: MemoryRange::new(16.0, 64.0).unwrap_or_else(|err| panic!("memory: {err}")),
        instance_types: vec![String::from("ecs.g7.4xlarge"), String::from("ecs.c7.4xlarge")],
    };

    let types = gateway
        .list_instance_types(&query)
        .await
        .unwrap_or_else(|err| panic!("list: {err}"));

    let ids: Vec<_> = types.iter().map(|candidate| candidate.id.as_str()).collect();
    assert_eq!(ids, ["ecs.g7.4xlarge", "ecs.c7.4xlarge"]);
    let calls = runner.invocations();
    assert_eq!(calls.len(), 2);
    let first = calls.first().unwrap_or_else(|| panic!("first call"));
    assert_eq!(first.program, "aliyun");
    assert!(first.command_string().starts_with("aliyun ecs DescribeInstanceTypes"));
    assert_eq!(first.flag_value("--RegionId").as_deref(), Some("cn-hangzhou"));
    assert_eq!(first.flag_value("--MinimumCpuCoreCount").as_deref(), Some("16"));
    assert_eq!(first.flag_value("--MaximumMemorySize").as_deref(), Some("64"));
    assert_eq!(
        first.flag_value("--InstanceTypes.2").as_deref(),
        Some("ecs.c7.4xlarge")
    );
    assert_eq!(first.flag_value("--NextToken"), None);
    let second = calls.get(1).unwrap_or_else(|| panic!("second call"));
    assert_eq!(second.flag_value("--NextToken").as_deref(), Some("page-2"));
}

#[tokio::test]
async fn images_are_filtered_by_glob() {
    let (gateway, runner) = gateway();
    runner.push_json(
        r#"{"Images":{"Image":[
            {"ImageId":"m-1","ImageName":"dev-base-2024","CreationTime":"2024-05-01T10:00Z"},
            {"ImageId":"m-2","ImageName":"ubuntu_22_04","CreationTime":"2024-06-01T10:00:00Z"}
        ]}}"#,
    );

    let images = gateway
        .find_images("dev-base-*")
        .await
        .unwrap_or_else(|err| panic!("images: {err}"));

    assert_eq!(images.len(), 1);
    let image = images.first().unwrap_or_else(|| panic!("image"));
    assert_eq!(image.id, "m-1");
    assert_eq!(image.created_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    let calls = runner.invocations();
    let call = calls.first().unwrap_or_else(|| panic!("DescribeImages call"));
    assert!(call.command_string().starts_with("aliyun ecs DescribeImages"));
    assert_eq!(call.flag_value("--ImageName").as_deref(), Some("dev-base-*"));
    assert_eq!(call.flag_value("--Status").as_deref(), Some("Available"));
}

#[tokio::test]
async fn spot_zones_keep_available_stock_only() {
    let (gateway, runner) = gateway();
    runner.push_json(
        r#"{"AvailableZones":{"AvailableZone":[
            {"ZoneId":"cn-hangzhou-h","Status":"Available","AvailableResources":{"AvailableResource":[
                {"SupportedResources":{"SupportedResource":[
                    {"Value":"ecs.g7.4xlarge","Status":"Available"},
                    {"Value":"ecs.c7.4xlarge","Status":"SoldOut"}
                ]}}
            ]}},
            {"ZoneId":"cn-hangzhou-i","Status":"SoldOut"}
        ]}}"#,
    );

    let zones = gateway
        .spot_zones("cn-hangzhou")
        .await
        .unwrap_or_else(|err| panic!("zones: {err}"));

    assert_eq!(
        zones,
        vec![ZoneOffering {
            zone: String::from("cn-hangzhou-h"),
            instance_types: vec![String::from("ecs.g7.4xlarge")],
        }]
    );
    let calls = runner.invocations();
    let call = calls.first().unwrap_or_else(|| panic!("call"));
    assert_eq!(call.flag_value("--SpotStrategy").as_deref(), Some("SpotAsPriceGo"));
}

#[tokio::test]
async fn spot_price_falls_back_through_disk_categories() {
    let (gateway, runner) = gateway();
    runner.push_api_error(
        "InvalidSystemDiskCategory.ValueNotSupported",
        "The specified disk category is not supported.",
    );
    runner.push_json(
        r#"{"PriceInfo":{"Price":{"TradePrice":0.42,"OriginalPrice":2.1,"Currency":"CNY"}}}"#,
    );

    let offer = gateway
        .spot_price("ecs.g7.4xlarge", "cn-hangzhou-h")
        .await
        .unwrap_or_else(|err| panic!("price: {err}"))
        .unwrap_or_else(|| panic!("expected an offer"));

    assert_eq!(offer.disk_category, "cloud_essd");
    assert_eq!(offer.currency, "CNY");
    let categories: Vec<_> = runner
        .invocations()
        .iter()
        .filter_map(|call| call.flag_value("--SystemDisk.Category"))
        .collect();
    assert_eq!(categories, ["cloud_auto", "cloud_essd"]);
}

#[tokio::test]
async fn spot_price_without_stock_is_not_an_error() {
    let (gateway, runner) = gateway();
    runner.push_api_error("OperationDenied.NoStock", "Sold out.");

    let offer = gateway
        .spot_price("ecs.g7.4xlarge", "cn-hangzhou-h")
        .await
        .unwrap_or_else(|err| panic!("price: {err}"));

    assert!(offer.is_none());
    assert_eq!(runner.invocations().len(), 1);
}

#[tokio::test]
async fn spot_price_propagates_other_errors() {
    let (gateway, runner) = gateway();
    runner.push_api_error("Forbidden.RAM", "User not authorized.");

    let Err(err) = gateway.spot_price("ecs.g7.4xlarge", "cn-hangzhou-h").await else {
        panic!("authorization failure should propagate");
    };
    assert_eq!(err.code(), Some("Forbidden.RAM"));
    assert_eq!(err.classify(), FailureClass::Fatal);
}

#[tokio::test]
async fn vpc_lookup_requires_exact_name() {
    let (gateway, runner) = gateway();
    runner.push_json(
        r#"{"Vpcs":{"Vpc":[
            {"VpcId":"vpc-2","VpcName":"dev-server-vpc-old","CidrBlock":"10.0.0.0/8","Status":"Available"},
            {"VpcId":"vpc-1","VpcName":"dev-server-vpc","CidrBlock":"172.16.0.0/12","ResourceGroupId":"rg-1","Status":"Available"}
        ]}}"#,
    );

    let vpc = gateway
        .find_resource(ResourceKind::Vpc, "dev-server-vpc")
        .await
        .unwrap_or_else(|err| panic!("lookup: {err}"))
        .unwrap_or_else(|| panic!("vpc should exist"));

    assert_eq!(vpc.id, "vpc-1");
    assert_eq!(vpc.cidr_block.as_deref(), Some("172.16.0.0/12"));
    assert_eq!(vpc.resource_group_id.as_deref(), Some("rg-1"));
    let calls = runner.invocations();
    let call = calls.first().unwrap_or_else(|| panic!("call"));
    assert!(call.command_string().starts_with("aliyun vpc DescribeVpcs"));
}

#[tokio::test]
async fn disk_lookup_reports_attachment() {
    let (gateway, runner) = gateway();
    runner.push_json(
        r#"{"Disks":{"Disk":[{"DiskId":"d-1","DiskName":"dev-server-data","ZoneId":"cn-hangzhou-h","Status":"In_use","InstanceId":"i-9"}]}}"#,
    );

    let disk = gateway
        .find_resource(ResourceKind::DataDisk, "dev-server-data")
        .await
        .unwrap_or_else(|err| panic!("lookup: {err}"))
        .unwrap_or_else(|| panic!("disk should exist"));

    assert_eq!(disk.attached_to.as_deref(), Some("i-9"));
    assert_eq!(disk.zone.as_deref(), Some("cn-hangzhou-h"));
}

#[tokio::test]
async fn created_vswitch_is_polled_until_available() {
    let (gateway, runner) = gateway();
    runner.push_json(r#"{"VSwitchId":"vsw-1"}"#);
    runner.push_json(
        r#"{"VSwitches":{"VSwitch":[{"VSwitchId":"vsw-1","VSwitchName":"dev-server-vsw-h","VpcId":"vpc-1","ZoneId":"cn-hangzhou-h","Status":"Pending"}]}}"#,
    );
    runner.push_json(
        r#"{"VSwitches":{"VSwitch":[{"VSwitchId":"vsw-1","VSwitchName":"dev-server-vsw-h","VpcId":"vpc-1","ZoneId":"cn-hangzhou-h","Status":"Available"}]}}"#,
    );
    let spec = ResourceSpec::VSwitch {
        name: String::from("dev-server-vsw-h"),
        vpc_id: String::from("vpc-1"),
        zone: String::from("cn-hangzhou-h"),
        cidr_block: String::from("172.16.8.0/24"),
    };

    let vswitch = gateway
        .create_resource(&spec)
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    assert_eq!(vswitch.id, "vsw-1");
    assert_eq!(vswitch.status, "Available");
    let calls = runner.invocations();
    assert_eq!(calls.len(), 3);
    let create = calls.first().unwrap_or_else(|| panic!("create call"));
    assert_eq!(create.flag_value("--CidrBlock").as_deref(), Some("172.16.8.0/24"));
}

#[tokio::test]
async fn resource_that_never_settles_is_not_ready() {
    let (gateway, runner) = gateway();
    runner.push_json(r#"{"VpcId":"vpc-1"}"#);
    for _ in 0..3 {
        runner.push_json(r#"{"Vpcs":{"Vpc":[]}}"#);
    }
    let spec = ResourceSpec::Vpc {
        name: String::from("dev-server-vpc"),
        cidr_block: String::from("172.16.0.0/12"),
        resource_group_id: String::from("rg-1"),
    };

    let Err(err) = gateway.create_resource(&spec).await else {
        panic!("vpc should not become ready");
    };
    assert!(matches!(err, AliyunError::NotReady { .. }));
    assert_eq!(err.classify(), FailureClass::Transient);
}

#[tokio::test]
async fn security_group_opens_each_ingress_port() {
    let (gateway, runner) = gateway();
    runner.push_json(r#"{"SecurityGroupId":"sg-1"}"#);
    runner.push_json("{}");
    runner.push_json("{}");
    let spec = ResourceSpec::SecurityGroup {
        name: String::from("dev-server-sg"),
        vpc_id: String::from("vpc-1"),
        resource_group_id: String::from("rg-1"),
        ingress_ports: vec![22, 8080],
    };

    let group = gateway
        .create_resource(&spec)
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    assert_eq!(group.id, "sg-1");
    let ranges: Vec<_> = runner
        .invocations()
        .iter()
        .filter_map(|call| call.flag_value("--PortRange"))
        .collect();
    assert_eq!(ranges, ["22/22", "8080/8080"]);
}

#[tokio::test]
async fn snapshots_are_filtered_by_prefix() {
    let (gateway, runner) = gateway();
    runner.push_json(
        r#"{"Snapshots":{"Snapshot":[
            {"SnapshotId":"s-1","SnapshotName":"dev-data-1","CreationTime":"2024-05-01T10:00Z","Status":"accomplished"},
            {"SnapshotId":"s-2","SnapshotName":"dev-data-2","CreationTime":"2024-05-02T10:00Z","Status":"progressing"},
            {"SnapshotId":"s-3","SnapshotName":"other","CreationTime":"2024-05-03T10:00Z","Status":"accomplished"}
        ]}}"#,
    );

    let snapshots = gateway
        .find_snapshots("dev-data")
        .await
        .unwrap_or_else(|err| panic!("snapshots: {err}"));

    let summary: Vec<_> = snapshots
        .iter()
        .map(|snapshot| (snapshot.id.as_str(), snapshot.completed))
        .collect();
    assert_eq!(summary, [("s-1", true), ("s-2", false)]);
}

#[tokio::test]
async fn instance_status_maps_state_and_address() {
    let (gateway, runner) = gateway();
    runner.push_json(
        r#"{"Instances":{"Instance":[{"InstanceId":"i-1","InstanceName":"dev-server","InstanceType":"ecs.g7.4xlarge","ZoneId":"cn-hangzhou-h","Status":"Running","PublicIpAddress":{"IpAddress":["203.0.113.7"]}}]}}"#,
    );

    let status = gateway
        .instance_status("i-1")
        .await
        .unwrap_or_else(|err| panic!("status: {err}"))
        .unwrap_or_else(|| panic!("instance should exist"));

    assert_eq!(status.state, InstanceState::Running);
    assert_eq!(status.public_ip.as_deref(), Some("203.0.113.7"));
    let calls = runner.invocations();
    let call = calls.first().unwrap_or_else(|| panic!("call"));
    assert_eq!(call.flag_value("--InstanceIds").as_deref(), Some(r#"["i-1"]"#));
}

#[tokio::test]
async fn launch_follows_market_price_without_ceiling() {
    let (gateway, runner) = gateway();
    runner.push_json(r#"{"InstanceIdSets":{"InstanceIdSet":["i-1"]}}"#);

    let id = gateway
        .create_instance(&launch_request(None))
        .await
        .unwrap_or_else(|err| panic!("launch: {err}"));

    assert_eq!(id, "i-1");
    let calls = runner.invocations();
    let call = calls.first().unwrap_or_else(|| panic!("call"));
    assert_eq!(call.flag_value("--SpotStrategy").as_deref(), Some("SpotAsPriceGo"));
    assert_eq!(call.flag_value("--SpotPriceLimit"), None);
    assert_eq!(call.flag_value("--SpotInterruptionBehavior").as_deref(), Some("Stop"));
    assert_eq!(call.flag_value("--SystemDisk.PerformanceLevel").as_deref(), Some("PL0"));
    assert_eq!(call.flag_value("--ClientToken").as_deref(), Some("token-1"));
    assert_eq!(call.flag_value("--Tag.1.Key").as_deref(), Some("managed-by"));
    assert_eq!(call.flag_value("--Tag.1.Value").as_deref(), Some("devserver"));
}

#[tokio::test]
async fn launch_with_ceiling_sets_price_limit() {
    let (gateway, runner) = gateway();
    runner.push_json(r#"{"InstanceIdSets":{"InstanceIdSet":["i-1"]}}"#);

    gateway
        .create_instance(&launch_request(Some(0.5)))
        .await
        .unwrap_or_else(|err| panic!("launch: {err}"));

    let calls = runner.invocations();
    let call = calls.first().unwrap_or_else(|| panic!("call"));
    assert_eq!(
        call.flag_value("--SpotStrategy").as_deref(),
        Some("SpotWithPriceLimit")
    );
    assert_eq!(call.flag_value("--SpotPriceLimit").as_deref(), Some("0.5"));
}

#[tokio::test]
async fn launch_without_instance_id_is_an_error() {
    let (gateway, runner) = gateway();
    runner.push_json(r#"{"InstanceIdSets":{"InstanceIdSet":[]}}"#);

    let Err(err) = gateway.create_instance(&launch_request(None)).await else {
        panic!("empty id set should fail");
    };
    assert!(matches!(err, AliyunError::MissingField { .. }));
}

#[rstest]
#[case("OperationDenied.NoStock", FailureClass::Transient)]
#[case("InvalidSpotPriceLimit.LowerThanPublicPrice", FailureClass::Transient)]
#[case("Throttling.User", FailureClass::Transient)]
#[case("Forbidden.RAM", FailureClass::Fatal)]
#[case("QuotaExceed.PostPaidInstance", FailureClass::Fatal)]
#[case("InvalidParameter", FailureClass::Fatal)]
fn provider_codes_are_classified(#[case] code: &str, #[case] expected: FailureClass) {
    assert_eq!(classify_code(code), expected);
}

#[tokio::test]
async fn failure_without_error_code_keeps_stderr() {
    let (gateway, runner) = gateway();
    runner.push_output(Some(2), "", "aliyun: credentials not configured\n");

    let Err(err) = gateway.start_instance("i-1").await else {
        panic!("start should fail");
    };
    assert_eq!(
        err,
        AliyunError::CommandFailure {
            action: String::from("StartInstance"),
            status_text: String::from("2"),
            stderr: String::from("aliyun: credentials not configured"),
        }
    );
    assert_eq!(err.classify(), FailureClass::Fatal);
}

#[tokio::test]
async fn profile_is_passed_to_every_call() {
    let runner = ScriptedRunner::new();
    let settings = AliyunSettings {
        profile: Some(String::from("dev")),
        ..AliyunSettings::new("cn-hangzhou")
    };
    let gateway = AliyunGateway::new(settings, runner.clone());
    runner.push_json("{}");

    gateway
        .delete_instance("i-1")
        .await
        .unwrap_or_else(|err| panic!("delete: {err}"));

    let calls = runner.invocations();
    let call = calls.first().unwrap_or_else(|| panic!("call"));
    assert_eq!(call.flag_value("--profile").as_deref(), Some("dev"));
    assert_eq!(call.flag_value("--Force").as_deref(), Some("true"));
    assert_eq!(call.flag_value("--RegionId"), None);
}

#[tokio::test]
async fn unparsable_output_is_reported() {
    let (gateway, runner) = gateway();
    runner.push_json("not json");

    let Err(err) = gateway.find_instance("dev-server").await else {
        panic!("parse should fail");
    };
    assert!(matches!(err, AliyunError::Parse { .. }));
}

#[rstest]
#[case("dev-base-*", "dev-base-2024", true)]
#[case("dev-base-*", "dev-base-", true)]
#[case("dev-base-*", "prod-base-2024", false)]
#[case("ubuntu_2?_04*", "ubuntu_22_04_x64", true)]
#[case("exact", "exact", true)]
#[case("exact", "exactly", false)]
fn glob_patterns(#[case] pattern: &str, #[case] name: &str, #[case] expected: bool) {
    assert_eq!(glob_matches(pattern, name), expected);
}

#[rstest]
#[case("2024-05-01T10:00:00Z", "2024-05-01T10:00:00+00:00")]
#[case("2024-05-01T10:00Z", "2024-05-01T10:00:00+00:00")]
fn timestamps_accept_both_formats(#[case] raw: &str, #[case] expected: &str) {
    assert_eq!(parse_time(raw).to_rfc3339(), expected);
}

#[test]
fn garbage_timestamps_sort_first() {
    assert_eq!(parse_time("yesterday"), DateTime::<Utc>::MIN_UTC);
}
