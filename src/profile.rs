//! Desired-state profile consumed by the provisioning engine.
//!
//! A [`ProvisioningProfile`] is built once per invocation and treated as a
//! read-only value afterwards. Every cloud resource the engine touches is
//! addressed by a name derived from the profile's instance name, so the
//! profile alone is enough to find what a previous run left behind.

use std::fmt;
use std::net::Ipv4Addr;

use thiserror::Error;

/// Widest VSwitch carve-out supported inside the VPC block.
const MAX_VPC_PREFIX: u8 = 16;

/// Errors raised while assembling a [`ProvisioningProfile`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProfileError {
    /// Raised when a required field is blank.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when a range has its bounds inverted or out of domain.
    #[error("invalid {field} range: {min}..={max}")]
    InvalidRange {
        /// Name of the range (`cpu` or `memory`).
        field: String,
        /// Lower bound as supplied.
        min: String,
        /// Upper bound as supplied.
        max: String,
    },
    /// Raised when a tag is not in `key=value` form.
    #[error("invalid tag '{0}': expected key=value")]
    InvalidTag(String),
    /// Raised when the VPC block cannot host per-zone `/24` VSwitches.
    #[error("invalid VPC CIDR block '{0}': expected an IPv4 network of /16 or wider")]
    InvalidCidr(String),
    /// Raised when the spot price ceiling is negative or not finite.
    #[error("invalid spot price ceiling: {0}")]
    InvalidPriceCeiling(String),
}

/// Inclusive CPU core count range.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CpuRange {
    min: u32,
    max: u32,
}

impl CpuRange {
    /// Creates a range, rejecting `min > max`.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::InvalidRange`] when the bounds are inverted.
    pub fn new(min: u32, max: u32) -> Result<Self, ProfileError> {
        if min > max {
            return Err(ProfileError::InvalidRange {
                field: String::from("cpu"),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(Self { min, max })
    }

    /// Lower bound.
    #[must_use]
    pub const fn min(&self) -> u32 {
        self.min
    }

    /// Upper bound.
    #[must_use]
    pub const fn max(&self) -> u32 {
        self.max
    }

    /// Returns `true` when `cores` lies within the range.
    #[must_use]
    pub const fn contains(&self, cores: u32) -> bool {
        cores >= self.min && cores <= self.max
    }
}

impl fmt::Display for CpuRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={} cores", self.min, self.max)
    }
}

/// Inclusive memory range in GiB.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemoryRange {
    min_gib: f64,
    max_gib: f64,
}

impl MemoryRange {
    /// Creates a range, rejecting negative, non-finite, or inverted bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::InvalidRange`] when the bounds are unusable.
    pub fn new(min_gib: f64, max_gib: f64) -> Result<Self, ProfileError> {
        let usable = min_gib.is_finite()
            && max_gib.is_finite()
            && min_gib >= 0.0
            && min_gib.total_cmp(&max_gib).is_le();
        if !usable {
            return Err(ProfileError::InvalidRange {
                field: String::from("memory"),
                min: min_gib.to_string(),
                max: max_gib.to_string(),
            });
        }
        Ok(Self { min_gib, max_gib })
    }

    /// Lower bound in GiB.
    #[must_use]
    pub const fn min_gib(&self) -> f64 {
        self.min_gib
    }

    /// Upper bound in GiB.
    #[must_use]
    pub const fn max_gib(&self) -> f64 {
        self.max_gib
    }

    /// Returns `true` when `gib` lies within the range.
    #[must_use]
    pub fn contains(&self, gib: f64) -> bool {
        gib >= self.min_gib && gib <= self.max_gib
    }
}

impl fmt::Display for MemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={} GiB", self.min_gib, self.max_gib)
    }
}

/// Provider tag applied to resources created by the engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Parses a `key=value` pair, trimming both halves.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::InvalidTag`] when the separator or key is
    /// missing.
    pub fn parse(raw: &str) -> Result<Self, ProfileError> {
        let Some((key, value)) = raw.split_once('=') else {
            return Err(ProfileError::InvalidTag(raw.to_owned()));
        };
        let trimmed_key = key.trim();
        if trimmed_key.is_empty() {
            return Err(ProfileError::InvalidTag(raw.to_owned()));
        }
        Ok(Self {
            key: trimmed_key.to_owned(),
            value: value.trim().to_owned(),
        })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// User-declared desired state for one dev-server slot.
#[derive(Clone, Debug, PartialEq)]
pub struct ProvisioningProfile {
    /// Target region (for example `cn-hangzhou`).
    pub region: String,
    /// Image name pattern; the newest matching image is used.
    pub image_pattern: String,
    /// Accepted CPU core counts.
    pub cpu: CpuRange,
    /// Accepted memory sizes.
    pub memory: MemoryRange,
    /// Optional allow-list of instance type identifiers. Empty means any.
    pub instance_types: Vec<String>,
    /// Resource group that owns everything the engine creates.
    pub resource_group_name: String,
    /// Name of the dev-server instance; other resource names derive from it.
    pub instance_name: String,
    /// Name prefix identifying data snapshots to restore from.
    pub snapshot_prefix: String,
    /// Tag applied to created resources.
    pub automation_tag: Tag,
    /// IPv4 block for the VPC.
    pub vpc_cidr: String,
    /// TCP ports opened to the internet on the security group.
    pub ingress_ports: Vec<u16>,
    /// System disk size in GiB.
    pub system_disk_size_gb: u32,
    /// Optional hourly spot price ceiling.
    pub max_spot_price: Option<f64>,
    /// Public bandwidth cap in Mbit/s; zero disables the public address.
    pub internet_max_bandwidth_out: u32,
}

impl ProvisioningProfile {
    /// Starts a builder for a [`ProvisioningProfile`].
    #[must_use]
    pub fn builder() -> ProvisioningProfileBuilder {
        ProvisioningProfileBuilder::default()
    }

    fn base_name(&self) -> String {
        slugify(&self.instance_name)
    }

    /// Deterministic VPC name.
    #[must_use]
    pub fn vpc_name(&self) -> String {
        format!("{}-vpc", self.base_name())
    }

    /// Deterministic security group name.
    #[must_use]
    pub fn security_group_name(&self) -> String {
        format!("{}-sg", self.base_name())
    }

    /// Deterministic data disk name.
    #[must_use]
    pub fn data_disk_name(&self) -> String {
        format!("{}-data", self.base_name())
    }

    /// Deterministic VSwitch name for `zone`.
    #[must_use]
    pub fn vswitch_name(&self, zone: &str) -> String {
        format!("{}-vsw-{}", self.base_name(), slugify(zone))
    }

    /// Carves a `/24` block for `zone` out of the VPC block.
    ///
    /// The third octet comes from the zone's trailing letter (`cn-hangzhou-k`
    /// maps to 11) so the same zone always receives the same block.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::InvalidCidr`] when the VPC block is unusable.
    pub fn vswitch_cidr(&self, zone: &str) -> Result<String, ProfileError> {
        let network = parse_network(&self.vpc_cidr)?;
        let [first, second, _, _] = network.octets();
        Ok(format!("{first}.{second}.{}.0/24", zone_octet(zone)))
    }
}

/// Builder for [`ProvisioningProfile`] that trims and validates on build.
#[derive(Clone, Debug, Default)]
pub struct ProvisioningProfileBuilder {
    region: String,
    image_pattern: String,
    cpu: Option<(u32, u32)>,
    memory: Option<(f64, f64)>,
    instance_types: Vec<String>,
    resource_group_name: String,
    instance_name: String,
    snapshot_prefix: String,
    automation_tag: String,
    vpc_cidr: String,
    ingress_ports: Vec<u16>,
    system_disk_size_gb: u32,
    max_spot_price: Option<f64>,
    internet_max_bandwidth_out: u32,
}

impl ProvisioningProfileBuilder {
    /// Sets the region.
    #[must_use]
    pub fn region(mut self, value: impl Into<String>) -> Self {
        self.region = value.into();
        self
    }

    /// Sets the image name pattern.
    #[must_use]
    pub fn image_pattern(mut self, value: impl Into<String>) -> Self {
        self.image_pattern = value.into();
        self
    }

    /// Sets the inclusive CPU core range.
    #[must_use]
    pub const fn cpu(mut self, min: u32, max: u32) -> Self {
        self.cpu = Some((min, max));
        self
    }

    /// Sets the inclusive memory range in GiB.
    #[must_use]
    pub const fn memory_gib(mut self, min: f64, max: f64) -> Self {
        self.memory = Some((min, max));
        self
    }

    /// Restricts discovery to the listed instance types.
    #[must_use]
    pub fn instance_types<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instance_types = values.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the resource group name.
    #[must_use]
    pub fn resource_group_name(mut self, value: impl Into<String>) -> Self {
        self.resource_group_name = value.into();
        self
    }

    /// Sets the instance name.
    #[must_use]
    pub fn instance_name(mut self, value: impl Into<String>) -> Self {
        self.instance_name = value.into();
        self
    }

    /// Sets the snapshot name prefix.
    #[must_use]
    pub fn snapshot_prefix(mut self, value: impl Into<String>) -> Self {
        self.snapshot_prefix = value.into();
        self
    }

    /// Sets the automation tag in `key=value` form.
    #[must_use]
    pub fn automation_tag(mut self, value: impl Into<String>) -> Self {
        self.automation_tag = value.into();
        self
    }

    /// Sets the VPC block.
    #[must_use]
    pub fn vpc_cidr(mut self, value: impl Into<String>) -> Self {
        self.vpc_cidr = value.into();
        self
    }

    /// Sets the ingress ports.
    #[must_use]
    pub fn ingress_ports(mut self, ports: impl Into<Vec<u16>>) -> Self {
        self.ingress_ports = ports.into();
        self
    }

    /// Sets the system disk size in GiB.
    #[must_use]
    pub const fn system_disk_size_gb(mut self, value: u32) -> Self {
        self.system_disk_size_gb = value;
        self
    }

    /// Sets the optional spot price ceiling.
    #[must_use]
    pub const fn max_spot_price(mut self, value: Option<f64>) -> Self {
        self.max_spot_price = value;
        self
    }

    /// Sets the public bandwidth cap.
    #[must_use]
    pub const fn internet_max_bandwidth_out(mut self, value: u32) -> Self {
        self.internet_max_bandwidth_out = value;
        self
    }

    /// Builds and validates the profile, trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] when a required field is blank or a range,
    /// tag, CIDR block, or price ceiling is invalid.
    pub fn build(self) -> Result<ProvisioningProfile, ProfileError> {
        let region = required("region", &self.region)?;
        let image_pattern = required("image_pattern", &self.image_pattern)?;
        let resource_group_name = required("resource_group_name", &self.resource_group_name)?;
        let instance_name = required("instance_name", &self.instance_name)?;
        if slugify(&instance_name).is_empty() {
            return Err(ProfileError::Validation(String::from("instance_name")));
        }
        let snapshot_prefix = required("snapshot_prefix", &self.snapshot_prefix)?;
        let vpc_cidr = required("vpc_cidr", &self.vpc_cidr)?;
        parse_network(&vpc_cidr)?;

        let (cpu_min, cpu_max) = self
            .cpu
            .ok_or_else(|| ProfileError::Validation(String::from("cpu")))?;
        let (memory_min, memory_max) = self
            .memory
            .ok_or_else(|| ProfileError::Validation(String::from("memory")))?;

        if let Some(ceiling) = self.max_spot_price
            && (!ceiling.is_finite() || ceiling < 0.0)
        {
            return Err(ProfileError::InvalidPriceCeiling(ceiling.to_string()));
        }
        if self.system_disk_size_gb == 0 {
            return Err(ProfileError::Validation(String::from(
                "system_disk_size_gb",
            )));
        }

        Ok(ProvisioningProfile {
            region,
            image_pattern,
            cpu: CpuRange::new(cpu_min, cpu_max)?,
            memory: MemoryRange::new(memory_min, memory_max)?,
            instance_types: self
                .instance_types
                .iter()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .collect(),
            resource_group_name,
            instance_name,
            snapshot_prefix,
            automation_tag: Tag::parse(&self.automation_tag)?,
            vpc_cidr,
            ingress_ports: self.ingress_ports,
            system_disk_size_gb: self.system_disk_size_gb,
            max_spot_price: self.max_spot_price,
            internet_max_bandwidth_out: self.internet_max_bandwidth_out,
        })
    }
}

fn required(field: &str, value: &str) -> Result<String, ProfileError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ProfileError::Validation(field.to_owned()));
    }
    Ok(trimmed.to_owned())
}

fn parse_network(cidr: &str) -> Result<Ipv4Addr, ProfileError> {
    let invalid = || ProfileError::InvalidCidr(cidr.to_owned());
    let (address, prefix) = cidr.trim().split_once('/').ok_or_else(invalid)?;
    let network: Ipv4Addr = address.parse().map_err(|_| invalid())?;
    let bits: u8 = prefix.parse().map_err(|_| invalid())?;
    if bits == 0 || bits > MAX_VPC_PREFIX {
        return Err(invalid());
    }
    Ok(network)
}

fn zone_octet(zone: &str) -> u8 {
    let suffix = zone.rsplit('-').next().unwrap_or(zone);
    match suffix.as_bytes() {
        [letter @ b'a'..=b'z'] => letter.wrapping_sub(b'a').wrapping_add(1),
        _ => zone
            .bytes()
            .fold(0_u8, |acc, byte| acc.wrapping_mul(31).wrapping_add(byte)),
    }
}

/// Lowercases `value` and collapses runs of non-alphanumeric characters into
/// single hyphens, trimming hyphens from both ends.
#[must_use]
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_hyphen = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    slug
}
