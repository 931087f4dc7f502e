//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::aliyun::AliyunSettings;
use crate::provision::{Backoff, EngineSettings};
use crate::profile::ProvisioningProfile;

/// Name of the configuration file searched for by discovery.
pub const CONFIG_FILE_NAME: &str = "devserver.toml";

/// Dev-server settings derived from defaults, configuration files, and
/// `DEVSERVER_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq)]
#[ortho_config(
    prefix = "DEVSERVER",
    discovery(
        app_name = "devserver",
        env_var = "DEVSERVER_CONFIG_PATH",
        config_file_name = "devserver.toml",
        dotfile_name = ".devserver.toml",
        project_file_name = "devserver.toml"
    )
)]
pub struct DevServerConfig {
    /// Region hosting the dev server. Defaults to `cn-hangzhou`.
    #[ortho_config(default = "cn-hangzhou".to_owned())]
    pub region_id: String,
    /// Glob matched against image names; the newest match boots the server.
    pub image_name_pattern: String,
    /// Smallest acceptable vCPU count.
    #[ortho_config(default = 16)]
    pub min_cpu_count: u32,
    /// Largest acceptable vCPU count.
    #[ortho_config(default = 32)]
    pub max_cpu_count: u32,
    /// Smallest acceptable memory size in GiB.
    #[ortho_config(default = 16.0)]
    pub min_memory_gib: f64,
    /// Largest acceptable memory size in GiB.
    #[ortho_config(default = 32.0)]
    pub max_memory_gib: f64,
    /// Comma separated allow-list of instance types. Unset accepts any type
    /// within the CPU and memory bounds.
    pub instance_types_checklist: Option<String>,
    /// Resource group owning every managed resource.
    #[ortho_config(default = "dev-resource-group".to_owned())]
    pub resource_group_name: String,
    /// Instance name; every other resource name derives from it.
    #[ortho_config(default = "dev-server".to_owned())]
    pub instance_name: String,
    /// Prefix of the data snapshots the disk is restored from.
    pub data_snapshot_prefix: String,
    /// `key=value` tag marking the data disk for snapshot automation.
    #[ortho_config(default = "managed-by=devserver".to_owned())]
    pub automation_tag: String,
    /// IPv4 block for the VPC.
    #[ortho_config(default = "172.16.0.0/12".to_owned())]
    pub vpc_cidr: String,
    /// Comma separated TCP ports opened to the internet.
    #[ortho_config(default = "22".to_owned())]
    pub ingress_ports: String,
    /// System disk size in GiB.
    #[ortho_config(default = 20)]
    pub system_disk_size_gb: u32,
    /// Hourly spot price ceiling. Unset follows the market price.
    pub max_spot_price: Option<f64>,
    /// Public bandwidth cap in Mbit/s.
    #[ortho_config(default = 10)]
    pub internet_max_bandwidth_out: u32,
    /// Path to the `aliyun` executable.
    #[ortho_config(default = "aliyun".to_owned())]
    pub aliyun_bin: String,
    /// Named `aliyun` credential profile.
    pub aliyun_profile: Option<String>,
    /// Limit on any single cloud call, in seconds.
    #[ortho_config(default = 30)]
    pub call_timeout_secs: u64,
    /// Limit on a new instance reaching Running, in seconds.
    #[ortho_config(default = 300)]
    pub create_timeout_secs: u64,
    /// Limit on disk attachment and restarts, in seconds.
    #[ortho_config(default = 300)]
    pub readiness_timeout_secs: u64,
    /// Optional limit on the whole session, in seconds.
    pub session_timeout_secs: Option<u64>,
    /// Number of price quotes fetched concurrently.
    #[ortho_config(default = 8)]
    pub quote_concurrency: usize,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl DevServerConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to {CONFIG_FILE_NAME}",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("devserver")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages name
    /// the environment variable and configuration key that supply the value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.region_id,
            &FieldMetadata::new("region", "DEVSERVER_REGION_ID", "region_id"),
        )?;
        Self::require_field(
            &self.image_name_pattern,
            &FieldMetadata::new(
                "image name pattern",
                "DEVSERVER_IMAGE_NAME_PATTERN",
                "image_name_pattern",
            ),
        )?;
        Self::require_field(
            &self.data_snapshot_prefix,
            &FieldMetadata::new(
                "data snapshot prefix",
                "DEVSERVER_DATA_SNAPSHOT_PREFIX",
                "data_snapshot_prefix",
            ),
        )?;
        Self::require_field(
            &self.instance_name,
            &FieldMetadata::new("instance name", "DEVSERVER_INSTANCE_NAME", "instance_name"),
        )?;
        Self::require_field(
            &self.aliyun_bin,
            &FieldMetadata::new("aliyun CLI path", "DEVSERVER_ALIYUN_BIN", "aliyun_bin"),
        )?;
        if self.quote_concurrency == 0 {
            return Err(ConfigError::Invalid(String::from(
                "quote_concurrency must be at least 1",
            )));
        }
        if self.call_timeout_secs == 0 || self.create_timeout_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "call_timeout_secs and create_timeout_secs must be positive",
            )));
        }
        self.parsed_ports().map(drop)
    }

    /// Builds the [`ProvisioningProfile`] described by the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or the profile rejects a
    /// value.
    pub fn as_profile(&self) -> Result<ProvisioningProfile, ConfigError> {
        self.validate()?;
        ProvisioningProfile::builder()
            .region(&self.region_id)
            .image_pattern(&self.image_name_pattern)
            .cpu(self.min_cpu_count, self.max_cpu_count)
            .memory_gib(self.min_memory_gib, self.max_memory_gib)
            .instance_types(split_list(
                self.instance_types_checklist.as_deref().unwrap_or_default(),
            ))
            .resource_group_name(&self.resource_group_name)
            .instance_name(&self.instance_name)
            .snapshot_prefix(&self.data_snapshot_prefix)
            .automation_tag(&self.automation_tag)
            .vpc_cidr(&self.vpc_cidr)
            .ingress_ports(self.parsed_ports()?)
            .system_disk_size_gb(self.system_disk_size_gb)
            .max_spot_price(self.max_spot_price)
            .internet_max_bandwidth_out(self.internet_max_bandwidth_out)
            .build()
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Timeouts and fan-out for the provisioning engine.
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            create_timeout: Duration::from_secs(self.create_timeout_secs),
            readiness_timeout: Duration::from_secs(self.readiness_timeout_secs),
            session_timeout: self.session_timeout_secs.map(Duration::from_secs),
            backoff: Backoff::default(),
            quote_concurrency: self.quote_concurrency,
        }
    }

    /// Settings for the `aliyun` CLI gateway.
    #[must_use]
    pub fn aliyun_settings(&self) -> AliyunSettings {
        AliyunSettings {
            binary: self.aliyun_bin.clone(),
            profile: self.aliyun_profile.clone(),
            ..AliyunSettings::new(self.region_id.as_str())
        }
    }

    fn parsed_ports(&self) -> Result<Vec<u16>, ConfigError> {
        split_list(&self.ingress_ports)
            .into_iter()
            .map(|port| {
                port.parse::<u16>()
                    .ok()
                    .filter(|value| *value > 0)
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!(
                            "ingress_ports: '{port}' is not a TCP port number"
                        ))
                    })
            })
            .collect()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
