//! metapulse CLI entry point

use anyhow::{anyhow, Context, Result};
use log::debug;
use std::io::Write;

use metapulse::config::cli::{Cli, CliMode};
use metapulse::config::{validator, yaml, TestParams};
use metapulse::coordinator::{self, NOTOK};
use metapulse::output::text;
use metapulse::stats::WorkerResult;
use metapulse::sync::{self, SharedDir};
use metapulse::util::caps::Capabilities;
use metapulse::util::short_hostname;
use metapulse::workload::{install_sigint_handler, Invocation};

fn main() {
    let cli = Cli::parse_args();
    init_logging(&cli);

    let outcome = match cli.mode() {
        CliMode::Daemon => run_daemon(&cli),
        CliMode::Worker(tid) => run_worker(&cli, &tid),
        CliMode::Slave => run_slave(&cli),
        CliMode::Master => run_master(&cli),
    };
    let code = match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            NOTOK
        }
    };
    std::process::exit(code);
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.verbose == Some(true) {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_micros()
        .target(env_logger::Target::Stderr)
        .init();
}

/// Coordinator (and, without a host set, the local per-host driver too).
fn run_master(cli: &Cli) -> Result<i32> {
    let mut params = TestParams::default();
    cli.apply_to(&mut params);
    if let Some(path) = &cli.yaml_input_file {
        yaml::parse_yaml(&mut params, path)?;
    }
    validator::validate(&params)?;
    validator::finalize(&mut params);

    println!("metapulse v{}", env!("CARGO_PKG_VERSION"));
    text::print_param_table(&params.human_readable());
    println!();

    if params.is_multi_host() {
        coordinator::run_master(&params, &cli.remote_args())
    } else {
        coordinator::run_local(&params)
    }
}

/// Remote per-host driver started by the coordinator.
fn run_slave(cli: &Cli) -> Result<i32> {
    let mut params = read_param_snapshot(cli)?;
    params.is_slave = true;
    params.as_host = cli.as_host.clone().or_else(|| Some(short_hostname()));
    debug!("slave params: {:?}", params);
    coordinator::run_slave(&params)?;
    Ok(coordinator::OK)
}

/// One worker subprocess: run the engine, then hand the terminal state to
/// the per-host driver over stdout.
fn run_worker(cli: &Cli, tid: &str) -> Result<i32> {
    install_sigint_handler();
    let params = read_param_snapshot(cli)?;
    let host = cli.as_host.clone().unwrap_or_else(short_hostname);

    let mut inv = Invocation::new(
        params.workload.clone(),
        tid.to_string(),
        host,
        Capabilities::detect(),
    );
    inv.apply_worker_subtree();
    inv.starting_gate = Some(inv.shared.starting_gate());
    let status = inv.run();
    debug!("worker {} finished with {:?}", tid, status);

    let result = WorkerResult::from_invocation(&inv);
    let bytes = rmp_serde::to_vec_named(&result).context("serializing worker result")?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes)?;
    stdout.flush()?;
    // exit code is informational; the driver reads the result from stdout
    Ok(if status.is_ok() {
        coordinator::OK
    } else {
        NOTOK
    })
}

/// Long-lived remote launch daemon.
fn run_daemon(cli: &Cli) -> Result<i32> {
    let top = cli
        .top
        .as_ref()
        .ok_or_else(|| anyhow!("--launch-daemon requires --top"))?;
    if top.contains(',') {
        return Err(anyhow!("--launch-daemon takes a single --top directory"));
    }
    let as_host = cli.as_host.clone().unwrap_or_else(short_hostname);
    coordinator::daemon::run(
        std::path::Path::new(top),
        cli.substitute_top.as_deref(),
        &as_host,
    )?;
    Ok(coordinator::OK)
}

/// Locate and read the parameter snapshot for slave and worker modes.
fn read_param_snapshot(cli: &Cli) -> Result<TestParams> {
    let dir = cli
        .network_sync_dir
        .clone()
        .ok_or_else(|| anyhow!("internal invocation requires --network-sync-dir"))?;
    let shared = SharedDir::new(dir);
    let param_file = shared.param_file();
    if !param_file.exists() {
        // the coordinator may still be renaming it into place
        std::thread::sleep(std::time::Duration::from_millis(1100));
    }
    let params: TestParams = sync::read_snapshot(&param_file)?;
    Ok(params)
}
