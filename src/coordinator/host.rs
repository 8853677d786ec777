//! Per-host multi-worker driver
//!
//! Spawns one worker subprocess per configured thread, holds them at the
//! starting gate until every worker (and, in a multi-host run, every host)
//! is ready, then collects each worker's terminal state from its stdout.
//! Workers and driver share a host, so the thread-ready files live in the
//! local temp directory; everything else goes through the shared directory.

use anyhow::{bail, Context, Result};
use crossbeam::channel::unbounded;
use log::{debug, info, warn};
use rand::Rng;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use crate::config::TestParams;
use crate::stats::WorkerResult;
use crate::sync::{self, SharedDir};
use crate::util::short_hostname;

/// Poll period for readiness barriers.
const BARRIER_POLL: Duration = Duration::from_millis(500);

fn worker_ids(thread_count: usize) -> Vec<String> {
    (0..thread_count).map(|k| format!("{:02}", k)).collect()
}

/// Run this host's share of the workload and return one result per worker.
pub fn run_host_workload(params: &TestParams) -> Result<Vec<WorkerResult>> {
    let host = params
        .as_host
        .clone()
        .unwrap_or_else(short_hostname);
    let shared = SharedDir::new(params.workload.network_dir());

    if params.is_slave {
        settle_remote_view(params, &shared)?;
    }

    let tids = worker_ids(params.thread_count);
    for tid in &tids {
        sync::ensure_deleted(&sync::thread_ready_file(tid))?;
    }

    let exe = std::env::current_exe().context("locating this executable")?;
    let (tx, rx) = unbounded::<(String, Option<WorkerResult>)>();
    let mut children: Vec<Child> = Vec::new();
    let mut readers = Vec::new();
    for tid in &tids {
        let mut cmd = Command::new(&exe);
        cmd.arg("--worker-id")
            .arg(tid)
            .arg("--network-sync-dir")
            .arg(shared.path())
            .stdout(Stdio::piped());
        if let Some(h) = &params.as_host {
            cmd.arg("--as-host").arg(h);
        }
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning worker {}", tid))?;
        let mut stdout = child.stdout.take().expect("worker stdout is piped");
        let tx = tx.clone();
        let tid_clone = tid.clone();
        readers.push(std::thread::spawn(move || {
            let mut buf = Vec::new();
            let decoded = match stdout.read_to_end(&mut buf) {
                Ok(_) => rmp_serde::from_slice::<WorkerResult>(&buf).ok(),
                Err(_) => None,
            };
            let _ = tx.send((tid_clone, decoded));
        }));
        children.push(child);
    }
    drop(tx);
    info!("started {} workers on host {}", tids.len(), host);

    // barrier 1: every worker on this host signals readiness
    let mut workers_ready = false;
    for _ in 0..params.startup_timeout_sec.max(1) * 2 {
        // listing nudges attribute caches on network filesystems
        let _ = std::fs::read_dir(shared.path()).map(|d| d.count());
        workers_ready = tids.iter().all(|t| sync::thread_ready_file(t).exists());
        if workers_ready || shared.abort_file().exists() {
            break;
        }
        debug!("workers not ready...");
        std::thread::sleep(BARRIER_POLL);
    }
    if !workers_ready {
        let _ = sync::touch(&shared.abort_file());
        reap(children, readers);
        bail!(
            "workers did not reach the starting gate within {} sec",
            params.startup_timeout_sec
        );
    }

    // barrier 2: multi-host handshake, or local gate release
    if params.is_slave {
        let host_ready = shared.host_ready(&host);
        debug!("host {} creating ready file {}", host, host_ready.display());
        sync::touch(&host_ready)?;

        let gate = shared.starting_gate();
        let ticks = (params.host_startup_timeout_sec + 10).max(1) * 2;
        let mut gate_seen = false;
        for _ in 0..ticks {
            let _ = std::fs::read_dir(shared.path()).map(|d| d.count());
            if gate.exists() {
                gate_seen = true;
                break;
            }
            std::thread::sleep(BARRIER_POLL);
        }
        if !gate_seen {
            let _ = sync::touch(&shared.abort_file());
            reap(children, readers);
            bail!(
                "starting signal not seen within {} seconds",
                params.host_startup_timeout_sec + 10
            );
        }
    } else if !shared.starting_gate().exists() {
        sync::write_sync_file(&shared.starting_gate(), "gate open")?;
        info!("starting gate file created by host {}", host);
    }

    // bound the race between hosts observing the gate
    let jitter = rand::thread_rng().gen_range(0.0..1.0);
    std::thread::sleep(Duration::from_secs_f64(2.0 + jitter));

    // collect terminal worker states
    let mut results: Vec<WorkerResult> = Vec::new();
    for _ in 0..tids.len() {
        match rx.recv() {
            Ok((_, Some(result))) => results.push(result),
            Ok((tid, None)) => warn!("no result from worker {}", tid),
            Err(_) => break,
        }
    }
    reap(children, readers);
    for tid in &tids {
        let _ = sync::ensure_deleted(&sync::thread_ready_file(tid));
    }
    results.sort_by(|a, b| a.tid.cmp(&b.tid));
    Ok(results)
}

/// Remote hosts give the shared filesystem a moment to show the recreated
/// trees before using them.
fn settle_remote_view(params: &TestParams, shared: &SharedDir) -> Result<()> {
    std::thread::sleep(Duration::from_millis(1100));
    for d in &params.workload.top_dirs {
        sync::ensure_dir_exists(d)?;
    }
    let _ = std::fs::read_dir(shared.path()).map(|d| d.count());
    for d in params
        .workload
        .src_dirs()
        .iter()
        .chain(params.workload.dest_dirs().iter())
    {
        sync::ensure_dir_exists(d)?;
        let _ = std::fs::read_dir(d).map(|i| i.count());
    }
    Ok(())
}

fn reap(mut children: Vec<Child>, readers: Vec<std::thread::JoinHandle<()>>) {
    for child in &mut children {
        let _ = child.wait();
    }
    for reader in readers {
        let _ = reader.join();
    }
}
