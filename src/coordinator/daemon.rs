//! Remote launch daemon
//!
//! A long-running process for hosts the coordinator cannot reach over ssh
//! (containers, Windows clients on a CIFS share). It polls the shared
//! directory for a command drop-file addressed to this host, executes the
//! command, and goes back to polling. An optional prefix substitution lets
//! a host that mounts the shared filesystem at a different path rewrite the
//! coordinator's pathnames into its own.

use anyhow::{Context, Result};
use log::{debug, error, info};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::sync::{self, SharedDir};

const POLL_PERIOD: Duration = Duration::from_secs(1);

/// Run the daemon loop forever (or until the process is killed).
pub fn run(top_dir: &Path, substitute_top: Option<&str>, as_host: &str) -> Result<()> {
    let shared = SharedDir::new(top_dir.join("network_shared"));
    let launch_fn = shared.launch_file(as_host);
    // a left-over drop-file from a dead run must not fire now
    sync::ensure_deleted(&launch_fn)
        .with_context(|| format!("clearing stale launch file {}", launch_fn.display()))?;
    info!(
        "launch daemon for host {} polling {}",
        as_host,
        launch_fn.display()
    );

    loop {
        match std::fs::read_to_string(&launch_fn) {
            Ok(text) => {
                sync::ensure_deleted(&launch_fn)?;
                let mut cmd = text.lines().next().unwrap_or("").trim().to_string();
                if let Some(sub) = substitute_top {
                    cmd = cmd.replace(sub, &top_dir.display().to_string());
                }
                if cmd.is_empty() {
                    continue;
                }
                debug!("spawning cmd: {}", cmd);
                match Command::new("sh").arg("-c").arg(&cmd).status() {
                    Ok(status) if status.success() => {}
                    Ok(status) => {
                        error!("return code {:?} for cmd {}", status.code(), cmd)
                    }
                    Err(e) => error!("could not spawn {}: {}", cmd, e),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::thread::sleep(POLL_PERIOD);
    }
}
