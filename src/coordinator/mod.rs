//! Coordinator: run lifecycle for local, master and slave modes
//!
//! The master recreates the shared trees, publishes the parameter snapshot,
//! starts one launcher per remote host, releases the starting gate once
//! every host is ready, and finally reads the per-host result snapshots and
//! reports. A slave runs the per-host driver and writes its snapshot back;
//! a single-host run is the master and the driver in one process.

pub mod daemon;
pub mod host;
pub mod launcher;

use anyhow::{bail, Result};
use log::{info, warn};
use std::time::Duration;

use crate::config::{TestParams, PCT_FILES_MIN};
use crate::output::{json, text};
use crate::stats::{self, WorkerResult};
use crate::sync::{self, SharedDir};
use launcher::HostLauncher;

pub const OK: i32 = 0;
pub const NOTOK: i32 = 1;

/// Grace period before reading result snapshots, for network filesystems
/// with attribute caching.
const RESULT_READ_GRACE: Duration = Duration::from_millis(1200);

/// Run a single-host test: this process is coordinator and per-host driver.
pub fn run_local(params: &TestParams) -> Result<i32> {
    let shared = SharedDir::new(params.workload.network_dir());
    sync::create_top_dirs(
        &shared,
        &params.workload.src_dirs(),
        &params.workload.dest_dirs(),
        false,
    )?;
    let local_host = crate::util::short_hostname();
    shared.clean_sentinels(&[local_host])?;
    sync::write_snapshot(&shared.param_file(), params)?;

    let results = host::run_host_workload(params)?;
    Ok(report_results(params, &results, true))
}

/// Run as a remote slave: execute this host's share, then publish the
/// result snapshot for the master.
pub fn run_slave(params: &TestParams) -> Result<()> {
    let host = params
        .as_host
        .clone()
        .unwrap_or_else(crate::util::short_hostname);
    let shared = SharedDir::new(params.workload.network_dir());
    let results = host::run_host_workload(params)?;
    info!("saving {} worker results for host {}", results.len(), host);
    sync::write_snapshot(&shared.result_file(&host), &results)?;
    // let the snapshot settle before the master looks for it
    std::thread::sleep(RESULT_READ_GRACE);
    Ok(())
}

/// Run a multi-host test as the master.
///
/// `remote_workload_args` are the workload flags to forward to every remote
/// invocation; coordination flags are appended here.
pub fn run_master(params: &TestParams, remote_workload_args: &[String]) -> Result<i32> {
    let shared = SharedDir::new(params.workload.network_dir());
    sync::create_top_dirs(
        &shared,
        &params.workload.src_dirs(),
        &params.workload.dest_dirs(),
        true,
    )?;
    shared.clean_sentinels(&params.host_set)?;
    sync::write_snapshot(&shared.param_file(), params)?;

    let host_count = params.host_set.len();
    let mut launchers: Vec<HostLauncher> = Vec::with_capacity(host_count);
    for (j, h) in params.host_set.iter().enumerate() {
        let mut cmd_words: Vec<String> = vec![params
            .remote_program_dir
            .join("metapulse")
            .display()
            .to_string()];
        cmd_words.extend(remote_workload_args.iter().cloned());
        cmd_words.push("--slave".to_string());
        cmd_words.push("y".to_string());
        cmd_words.push("--network-sync-dir".to_string());
        cmd_words.push(shared.path().display().to_string());
        cmd_words.push("--as-host".to_string());
        if params.permute_host_dirs {
            // neighbor's directory slice: reads hit files written by a peer
            cmd_words.push(params.host_set[(j + 1) % host_count].clone());
        } else {
            cmd_words.push(h.clone());
        }
        let remote_cmd = cmd_words.join(" ");
        let launcher = if params.launch_by_daemon {
            HostLauncher::daemon(h, &remote_cmd, shared.clone())?
        } else {
            HostLauncher::ssh(h, &remote_cmd)
        };
        launchers.push(launcher);
    }
    // give remote mounts time to observe the recreated directory
    std::thread::sleep(Duration::from_secs(2));

    if let Err(e) = await_host_ready(params, &shared, &mut launchers) {
        let _ = sync::touch(&shared.abort_file());
        for l in launchers {
            let _ = l.join();
        }
        return Err(e);
    }

    sync::write_sync_file(&shared.starting_gate(), "gate open")?;
    info!("starting gate file created");

    let mut all_launchers_ok = true;
    for l in launchers {
        let host = l.host.clone();
        let code = l.join();
        if code != OK {
            all_launchers_ok = false;
            warn!("launcher for host {} completed with status {}", host, code);
        }
    }

    std::thread::sleep(RESULT_READ_GRACE);
    let mut results: Vec<WorkerResult> = Vec::new();
    for h in &params.host_set {
        let path = shared.result_file(h);
        match sync::read_snapshot::<Vec<WorkerResult>>(&path) {
            Ok(list) => {
                info!("read {} results from host {}", list.len(), h);
                results.extend(list);
                let _ = sync::ensure_deleted(&path);
            }
            Err(e) => {
                warn!("result snapshot for host {} not readable: {:#}", h, e);
            }
        }
    }
    if results.is_empty() {
        bail!("no worker results collected, so no results to report");
    }

    Ok(report_results(params, &results, all_launchers_ok))
}

/// Wait for every host's ready file, resuming the scan from the last host
/// seen; abort as soon as the abort file appears or a launcher dies early.
fn await_host_ready(
    params: &TestParams,
    shared: &SharedDir,
    launchers: &mut [HostLauncher],
) -> Result<()> {
    let host_count = params.host_set.len();
    let mut last_host_seen: usize = 0; // hosts below this index are ready
    let mut sec: u64 = 0;
    let mut sec_delta: u64 = 1;
    while sec < params.host_startup_timeout_sec {
        while last_host_seen < host_count {
            let h = &params.host_set[last_host_seen];
            if shared.host_ready(h).exists() {
                last_host_seen += 1;
            } else {
                break;
            }
        }
        if last_host_seen >= host_count {
            return Ok(());
        }
        if shared.abort_file().exists() {
            bail!("abort file seen while waiting for hosts to reach the gate");
        }
        for l in launchers.iter_mut() {
            if let Some(code) = l.poll_status() {
                if code != OK {
                    bail!(
                        "launcher for host {} died with status {} before the host was ready",
                        l.host,
                        code
                    );
                }
            }
        }
        info!("{} of {} hosts ready, {} sec", last_host_seen, host_count, sec);
        std::thread::sleep(Duration::from_secs(sec_delta));
        sec += sec_delta;
        sec_delta += 1;
    }
    bail!(
        "hosts did not reach the starting gate within {} seconds",
        params.host_startup_timeout_sec
    )
}

/// Print per-worker, per-host and cluster results plus warnings, write the
/// JSON artifact if requested, and compute the exit code.
///
/// Insufficient completion alone is a warning: the exit code is non-zero
/// only when some worker failed (or the caller already knows the run was
/// damaged).
pub fn report_results(params: &TestParams, workers: &[WorkerResult], runners_ok: bool) -> i32 {
    if workers.is_empty() {
        eprintln!("ERROR: no worker results collected, so no results");
        return NOTOK;
    }
    let (per_host, cluster) = stats::aggregate(workers);
    let expected_workers = params.thread_count * params.host_set.len().max(1);
    let iterations = params.workload.iterations as u64;
    let pct = stats::pct_files_done(&cluster, iterations, expected_workers);
    let warnings =
        stats::completion_warnings(&cluster, iterations, expected_workers, workers.len());

    for line in text::worker_lines(workers) {
        println!("{}", line);
    }
    for line in text::summary_lines(&per_host, &cluster, pct, PCT_FILES_MIN) {
        println!("{}", line);
    }
    for w in &warnings {
        println!("{}", w);
    }

    if let Some(path) = &params.output_json {
        match json::write_artifact(path, params, workers, &per_host, &cluster, pct, &warnings)
        {
            Ok(()) => println!("JSON results written to {}", path.display()),
            Err(e) => {
                eprintln!("ERROR: {:#}", e);
                return NOTOK;
            }
        }
    }

    if !runners_ok || !cluster.status.is_ok() {
        NOTOK
    } else {
        OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::Status;

    fn worker(tid: &str, files: u64, status: Status) -> WorkerResult {
        WorkerResult {
            host: "h1".to_string(),
            tid: tid.to_string(),
            elapsed: 1.0,
            files,
            records: 0,
            record_size_kb: 64,
            total_size_kb: 64,
            iterations: 100,
            status,
        }
    }

    #[test]
    fn test_exit_ok_when_all_workers_ok() {
        let mut params = TestParams::default();
        params.thread_count = 2;
        params.workload.iterations = 100;
        let workers = vec![worker("00", 100, Status::Ok), worker("01", 100, Status::Ok)];
        assert_eq!(report_results(&params, &workers, true), OK);
    }

    #[test]
    fn test_exit_not_ok_on_worker_error() {
        let mut params = TestParams::default();
        params.thread_count = 1;
        let workers = vec![worker("00", 100, Status::Errno(libc::EIO))];
        assert_eq!(report_results(&params, &workers, true), NOTOK);
    }

    #[test]
    fn test_low_completion_is_warning_not_failure() {
        let mut params = TestParams::default();
        params.thread_count = 2;
        params.workload.iterations = 100;
        // 110 of 200 files: far below the minimum, but every status is OK
        let workers = vec![worker("00", 100, Status::Ok), worker("01", 10, Status::Ok)];
        assert_eq!(report_results(&params, &workers, true), OK);
    }

    #[test]
    fn test_launcher_failure_forces_not_ok() {
        let mut params = TestParams::default();
        params.thread_count = 1;
        let workers = vec![worker("00", 100, Status::Ok)];
        assert_eq!(report_results(&params, &workers, false), NOTOK);
    }

    #[test]
    fn test_json_artifact_written_by_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let mut params = TestParams::default();
        params.thread_count = 1;
        params.workload.iterations = 100;
        params.output_json = Some(path.clone());
        let workers = vec![worker("00", 100, Status::Ok)];
        assert_eq!(report_results(&params, &workers, true), OK);
        assert!(path.exists());
    }
}
