//! Tests for configuration loading and validation.

use std::time::Duration;

use devserver::test_support::EnvGuard;
use devserver::{ConfigError, DevServerConfig};
use rstest::{fixture, rstest};
use tempfile::TempDir;

#[fixture]
fn valid_config() -> DevServerConfig {
    DevServerConfig {
        region_id: String::from("cn-hangzhou"),
        image_name_pattern: String::from("dev-image-*"),
        min_cpu_count: 16,
        max_cpu_count: 32,
        min_memory_gib: 16.0,
        max_memory_gib: 64.0,
        instance_types_checklist: None,
        resource_group_name: String::from("dev-resource-group"),
        instance_name: String::from("dev-server"),
        data_snapshot_prefix: String::from("dev-data"),
        automation_tag: String::from("managed-by=devserver"),
        vpc_cidr: String::from("172.16.0.0/12"),
        ingress_ports: String::from("22"),
        system_disk_size_gb: 20,
        max_spot_price: None,
        internet_max_bandwidth_out: 10,
        aliyun_bin: String::from("aliyun"),
        aliyun_profile: None,
        call_timeout_secs: 30,
        create_timeout_secs: 300,
        readiness_timeout_secs: 300,
        session_timeout_secs: None,
        quote_concurrency: 8,
    }
}

#[rstest]
fn missing_image_pattern_is_actionable(valid_config: DevServerConfig) {
    let cfg = DevServerConfig {
        image_name_pattern: String::from("  "),
        ..valid_config
    };

    let Err(ConfigError::MissingField(message)) = cfg.validate() else {
        panic!("image pattern is required");
    };
    assert!(message.contains("DEVSERVER_IMAGE_NAME_PATTERN"), "message: {message}");
    assert!(message.contains("image_name_pattern"), "message: {message}");
    assert!(message.contains("devserver.toml"), "message: {message}");
}

#[rstest]
#[case::snapshot_prefix(
    |cfg: &mut DevServerConfig| cfg.data_snapshot_prefix.clear(),
    "DEVSERVER_DATA_SNAPSHOT_PREFIX"
)]
#[case::region(|cfg: &mut DevServerConfig| cfg.region_id.clear(), "DEVSERVER_REGION_ID")]
#[case::instance_name(
    |cfg: &mut DevServerConfig| cfg.instance_name.clear(),
    "DEVSERVER_INSTANCE_NAME"
)]
fn required_fields_name_their_env_var(
    valid_config: DevServerConfig,
    #[case] mutate: fn(&mut DevServerConfig),
    #[case] env_var: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let message = cfg
        .validate()
        .err()
        .unwrap_or_else(|| panic!("validation should fail"))
        .to_string();
    assert!(message.contains(env_var), "message: {message}");
}

#[rstest]
#[case("22,http")]
#[case("0")]
#[case("70000")]
fn bad_ingress_ports_are_rejected(valid_config: DevServerConfig, #[case] ports: &str) {
    let cfg = DevServerConfig {
        ingress_ports: ports.to_owned(),
        ..valid_config
    };

    assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
}

#[rstest]
fn zero_quote_concurrency_is_rejected(valid_config: DevServerConfig) {
    let cfg = DevServerConfig {
        quote_concurrency: 0,
        ..valid_config
    };

    assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
}

#[rstest]
fn profile_reflects_configuration(valid_config: DevServerConfig) {
    let cfg = DevServerConfig {
        instance_types_checklist: Some(String::from("ecs.g7.4xlarge, ecs.c7.4xlarge,")),
        ingress_ports: String::from("22, 8080"),
        max_spot_price: Some(1.5),
        ..valid_config
    };

    let profile = cfg
        .as_profile()
        .unwrap_or_else(|err| panic!("profile: {err}"));

    assert_eq!(profile.instance_types, ["ecs.g7.4xlarge", "ecs.c7.4xlarge"]);
    assert_eq!(profile.ingress_ports, [22, 8080]);
    assert_eq!(profile.max_spot_price, Some(1.5));
    assert_eq!(profile.automation_tag.key, "managed-by");
    assert_eq!(profile.data_disk_name(), "dev-server-data");
}

#[rstest]
fn inverted_cpu_range_is_invalid(valid_config: DevServerConfig) {
    let cfg = DevServerConfig {
        min_cpu_count: 64,
        ..valid_config
    };

    assert!(matches!(cfg.as_profile(), Err(ConfigError::Invalid(_))));
}

#[rstest]
fn engine_and_gateway_settings_follow_configuration(valid_config: DevServerConfig) {
    let cfg = DevServerConfig {
        session_timeout_secs: Some(900),
        aliyun_profile: Some(String::from("dev")),
        aliyun_bin: String::from("/opt/aliyun/bin/aliyun"),
        ..valid_config
    };

    let engine = cfg.engine_settings();
    assert_eq!(engine.call_timeout, Duration::from_secs(30));
    assert_eq!(engine.session_timeout, Some(Duration::from_secs(900)));
    assert_eq!(engine.quote_concurrency, 8);

    let aliyun = cfg.aliyun_settings();
    assert_eq!(aliyun.binary, "/opt/aliyun/bin/aliyun");
    assert_eq!(aliyun.profile.as_deref(), Some("dev"));
    assert_eq!(aliyun.region, "cn-hangzhou");
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let config_path = tmp.path().join("devserver.toml");
    std::fs::write(&config_path, "instance_name = \"from-file\"\n")
        .unwrap_or_else(|err| panic!("write config: {err}"));
    let config_path_str = config_path
        .to_str()
        .unwrap_or_else(|| panic!("temp path should be utf8"));

    let _guard = EnvGuard::set_vars(&[
        ("DEVSERVER_CONFIG_PATH", config_path_str),
        ("DEVSERVER_IMAGE_NAME_PATTERN", "dev-image-*"),
        ("DEVSERVER_DATA_SNAPSHOT_PREFIX", "dev-data"),
        ("DEVSERVER_REGION_ID", "cn-shanghai"),
    ])
    .await;

    let cfg = DevServerConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("load config: {err}"));

    assert_eq!(cfg.region_id, "cn-shanghai");
    assert_eq!(cfg.instance_name, "from-file");
    assert_eq!(cfg.image_name_pattern, "dev-image-*");
    assert_eq!(cfg.min_cpu_count, 16);
    assert_eq!(cfg.aliyun_bin, "aliyun");
    assert!(cfg.validate().is_ok());
}
