//! Core library for the `devserver` spot provisioning tool.
//!
//! The crate discovers instance types that satisfy a CPU and memory profile,
//! ranks their spot prices across zones, reconciles the network and storage
//! prerequisites by name, and drives a state machine that falls back through
//! the ranked candidates until one instance is running with its data disk
//! attached. Cloud access goes through the [`InventoryGateway`] trait; the
//! [`AliyunGateway`] implementation shells out to the `aliyun` CLI.

pub mod aliyun;
pub mod command;
pub mod config;
pub mod config_store;
pub mod discovery;
pub mod error;
pub mod inventory;
pub mod profile;
pub mod provision;
pub mod ranking;
pub mod reconcile;
pub mod test_support;

pub use aliyun::{AliyunError, AliyunGateway, AliyunSettings};
pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, DevServerConfig};
pub use config_store::{ConfigStore, ConfigStoreError, ConfigTemplate, ConfigWriter};
pub use discovery::{Discovery, PriceQuote, QuotedCandidate};
pub use error::ProvisionError;
pub use inventory::{
    CallError, FailureClass, FailureClassification, GatewayFuture, InstanceState, InstanceStatus,
    InventoryGateway, Resource, ResourceKind, ResourceSpec,
};
pub use profile::{ProfileError, ProvisioningProfile, ProvisioningProfileBuilder};
pub use provision::{
    AttemptRecord, AttemptResult, Backoff, CancelHandle, CancelSignal, EngineSettings,
    ExhaustedReport, FailureReport, InstanceDescriptor, Outcome, Provisioner,
    ProvisioningSession, SessionState, cancellation,
};
pub use ranking::{RankedCandidate, RankedCandidates, rank};
pub use reconcile::{Ensured, Prerequisites, Reconciler};
