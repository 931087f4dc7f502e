//! Binary entry point for the `devserver` CLI.

mod cli;

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use cli::{CandidatesCommand, Cli, InitCommand, ProvisionCommand};
use devserver::{
    AliyunGateway, ConfigStore, ConfigTemplate, ConfigWriter, DevServerConfig, Outcome,
    ProcessCommandRunner, Provisioner, RankedCandidates, cancellation,
};

const LOG_ENV_VAR: &str = "DEVSERVER_LOG";
const DEFAULT_LOG_FILTER: &str = "devserver=info";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("candidate discovery failed: {0}")]
    Discovery(String),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Provision(ProvisionCommand { replace }) => provision(replace).await,
        Cli::Candidates(CandidatesCommand { limit }) => candidates(limit).await,
        Cli::Init(InitCommand {
            image_pattern,
            snapshot_prefix,
            region,
            force,
        }) => init(
            &ConfigTemplate {
                region_id: region,
                image_name_pattern: image_pattern,
                data_snapshot_prefix: snapshot_prefix,
            },
            force,
        ),
    }
}

fn load_config() -> Result<DevServerConfig, CliError> {
    DevServerConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))
}

fn provisioner(config: &DevServerConfig) -> Provisioner<AliyunGateway<ProcessCommandRunner>> {
    Provisioner::new(
        AliyunGateway::with_process_runner(config.aliyun_settings()),
        config.engine_settings(),
    )
}

async fn provision(replace: bool) -> Result<i32, CliError> {
    let config = load_config()?;
    let profile = config
        .as_profile()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let (handle, signal) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping at the next checkpoint");
            handle.cancel();
        }
    });

    let outcome = provisioner(&config)
        .with_cancel(signal)
        .with_replace(replace)
        .provision(&profile)
        .await;
    write_outcome(io::stdout(), io::stderr(), &outcome)?;
    Ok(outcome.exit_code())
}

async fn candidates(limit: usize) -> Result<i32, CliError> {
    let config = load_config()?;
    let profile = config
        .as_profile()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let ranked = provisioner(&config)
        .rank_candidates(&profile)
        .await
        .map_err(|err| CliError::Discovery(err.to_string()))?;
    write_candidates(io::stdout(), &ranked, limit)?;
    Ok(0)
}

fn init(template: &ConfigTemplate, force: bool) -> Result<i32, CliError> {
    let path = ConfigStore::new()
        .write_template(template, force)
        .map_err(|err| CliError::Config(err.to_string()))?;
    writeln!(io::stdout(), "wrote {path}")?;
    Ok(0)
}

fn write_outcome<E>(
    mut out: impl Write,
    mut err: impl Write,
    outcome: &Outcome<E>,
) -> io::Result<()>
where
    E: std::error::Error + 'static,
{
    match outcome {
        Outcome::Running(server) => {
            let verb = if server.relaunched { "reused" } else { "launched" };
            writeln!(
                out,
                "{verb} {} ({}) as {} in {}",
                server.name, server.instance_id, server.instance_type, server.zone
            )?;
            if let (Some(price), Some(currency)) = (server.price, &server.currency) {
                writeln!(out, "spot price: {price:.4} {currency}/hour")?;
            }
            if let Some(disk) = &server.disk_id {
                writeln!(out, "data disk: {disk}")?;
            }
            writeln!(
                out,
                "public ip: {}",
                server.public_ip.as_deref().unwrap_or("not assigned")
            )
        }
        Outcome::Exhausted(report) => {
            writeln!(err, "{report}")?;
            for attempt in &report.attempts {
                writeln!(err, "  {attempt}")?;
            }
            Ok(())
        }
        Outcome::Failed(report) => {
            writeln!(err, "{report}")?;
            for attempt in &report.attempts {
                writeln!(err, "  {attempt}")?;
            }
            Ok(())
        }
    }
}

fn write_candidates(
    mut out: impl Write,
    ranked: &RankedCandidates,
    limit: usize,
) -> io::Result<()> {
    writeln!(
        out,
        "{:<4} {:<24} {:<18} {:>5} {:>8} {:>10} {:>10}",
        "rank", "instance type", "zone", "vcpu", "mem gib", "spot", "on-demand"
    )?;
    for (position, entry) in (1_usize..).zip(ranked.as_slice().iter().take(limit)) {
        writeln!(
            out,
            "{:<4} {:<24} {:<18} {:>5} {:>8.1} {:>10.4} {:>10.4} {}",
            position,
            entry.instance_type(),
            entry.zone(),
            entry.candidate.cpu_cores,
            entry.candidate.memory_gib,
            entry.price(),
            entry.quote.origin_price(),
            entry.quote.currency()
        )?;
    }
    if ranked.is_empty() {
        writeln!(out, "no spot candidates match the configured profile")?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
