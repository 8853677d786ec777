//! Remote-host launchers
//!
//! One launcher thread per remote host, with two interchangeable
//! strategies: run the per-host driver over ssh, or drop the command into a
//! file that a long-lived daemon on the remote host polls for. Either way
//! the thread reports an exit status, and the coordinator can poll for
//! early death while waiting on the host-ready barrier.

use anyhow::Result;
use crossbeam::channel::{bounded, Receiver};
use log::{debug, info};
use std::process::Command;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::sync::{self, SharedDir};

const SSH_OPTIONS: [&str; 3] = ["-x", "-o", "StrictHostKeyChecking=no"];

/// Handle to one remote host's launcher thread.
pub struct HostLauncher {
    pub host: String,
    status_rx: Receiver<i32>,
    status: Option<i32>,
    handle: Option<JoinHandle<()>>,
}

impl HostLauncher {
    /// Launch over ssh; the thread blocks on the remote command and reports
    /// its exit code.
    pub fn ssh(host: &str, remote_cmd: &str) -> Self {
        let (tx, rx) = bounded(1);
        let h = host.to_string();
        let cmd = remote_cmd.to_string();
        let handle = std::thread::spawn(move || {
            debug!("ssh {} {:?}", h, cmd);
            let code = Command::new("ssh")
                .args(SSH_OPTIONS)
                .arg(&h)
                .arg(&cmd)
                .status()
                .map(|s| s.code().unwrap_or(1))
                .unwrap_or(1);
            let _ = tx.send(code);
        });
        Self {
            host: host.to_string(),
            status_rx: rx,
            status: None,
            handle: Some(handle),
        }
    }

    /// Launch through the drop-file daemon: write the command where the
    /// daemon polls, then wait for that host's result snapshot to appear.
    pub fn daemon(host: &str, remote_cmd: &str, shared: SharedDir) -> Result<Self> {
        let launch_fn = shared.launch_file(host);
        let result_fn = shared.result_file(host);
        sync::ensure_deleted(&launch_fn)?;
        sync::ensure_deleted(&result_fn)?;
        sync::write_sync_file(&launch_fn, &format!("{}\n", remote_cmd))?;
        info!("dropped launch file for host {}", host);

        let (tx, rx) = bounded(1);
        let abort_fn = shared.abort_file();
        let h = host.to_string();
        let handle = std::thread::spawn(move || {
            loop {
                if result_fn.exists() {
                    let _ = tx.send(0);
                    return;
                }
                if abort_fn.exists() {
                    debug!("test abort seen while waiting for host {}", h);
                    let _ = tx.send(1);
                    return;
                }
                std::thread::sleep(Duration::from_secs(3));
            }
        });
        Ok(Self {
            host: host.to_string(),
            status_rx: rx,
            status: None,
            handle: Some(handle),
        })
    }

    /// Non-blocking status check; `Some(code)` once the thread finished.
    pub fn poll_status(&mut self) -> Option<i32> {
        if self.status.is_none() {
            if let Ok(code) = self.status_rx.try_recv() {
                self.status = Some(code);
            }
        }
        self.status
    }

    /// Wait for the launcher thread and return the remote exit status.
    pub fn join(mut self) -> i32 {
        if self.status.is_none() {
            self.status = self.status_rx.recv().ok();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.status.unwrap_or(1)
    }
}
