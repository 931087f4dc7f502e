//! Command-line interface definitions for the `devserver` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `devserver` binary.
#[derive(Debug, Parser)]
#[command(
    name = "devserver",
    about = "Bring up a spot dev server on Alibaba Cloud with its data disk restored",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Reconcile prerequisites and launch or restart the dev server.
    #[command(
        name = "provision",
        about = "Reconcile prerequisites and launch or restart the dev server"
    )]
    Provision(ProvisionCommand),
    /// List ranked spot candidates without creating anything.
    #[command(
        name = "candidates",
        about = "List ranked spot candidates without creating anything"
    )]
    Candidates(CandidatesCommand),
    /// Write the required keys into the configuration file.
    #[command(name = "init", about = "Write the required keys into the configuration file")]
    Init(InitCommand),
}

/// Arguments for the `devserver provision` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ProvisionCommand {
    /// Release an existing dev-server instance and launch a fresh one.
    ///
    /// The data disk survives the release only when it was not attached with
    /// delete-with-instance; a new disk is restored from the latest snapshot
    /// otherwise.
    #[arg(long)]
    pub(crate) replace: bool,
}

/// Arguments for the `devserver candidates` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CandidatesCommand {
    /// Show at most this many candidates.
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub(crate) limit: usize,
}

/// Arguments for the `devserver init` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct InitCommand {
    /// Glob matched against image names, for example `dev-base-*`.
    #[arg(long, value_name = "PATTERN")]
    pub(crate) image_pattern: String,
    /// Prefix of the data snapshots to restore from.
    #[arg(long, value_name = "PREFIX")]
    pub(crate) snapshot_prefix: String,
    /// Region hosting the dev server.
    #[arg(long, value_name = "REGION", default_value = "cn-hangzhou")]
    pub(crate) region: String,
    /// Overwrite keys already present in the configuration file.
    #[arg(long)]
    pub(crate) force: bool,
}
