//! Human-readable result output
//!
//! One line per worker, then per-host and cluster aggregates, then any
//! warnings. Kept as plain functions returning the rendered lines so the
//! same rendering is testable and reusable by the JSON writer's summary
//! field.

use crate::stats::{Summary, WorkerResult};

const KB_PER_GB: u64 = 1 << 20;

/// Render the per-worker detail lines.
pub fn worker_lines(workers: &[WorkerResult]) -> Vec<String> {
    workers
        .iter()
        .map(|w| {
            format!(
                "host = {}, thread = {}, elapsed sec. = {:.6}, total files = {}, \
                 total records = {}, status = {}",
                w.host,
                w.tid,
                w.elapsed,
                w.files,
                w.records,
                w.status.describe()
            )
        })
        .collect()
}

/// Render the aggregate section for hosts and the cluster.
pub fn summary_lines(
    per_host: &[Summary],
    cluster: &Summary,
    pct_files: f64,
    pct_files_min: f64,
) -> Vec<String> {
    let mut lines = Vec::new();
    if per_host.len() > 1 {
        for h in per_host {
            lines.push(format!(
                "host {} : elapsed = {:.6}, files = {}, records = {}, \
                 files/sec = {:.6}, IOPS = {:.6}, MiB/sec = {:.6}, status = {}",
                h.name,
                h.elapsed,
                h.files,
                h.records,
                h.files_per_sec,
                h.iops,
                h.mib_per_sec,
                h.status.describe()
            ));
        }
    }
    lines.push(format!("total threads = {}", cluster.worker_count));
    lines.push(format!("total files = {}", cluster.files));
    lines.push(format!("total records = {}", cluster.records));
    if cluster.records > 0 {
        let record_kb = if cluster.iops > 0.0 {
            cluster.mib_per_sec * 1024.0 / cluster.iops
        } else {
            0.0
        };
        let total_data_gb = cluster.records as f64 * record_kb / KB_PER_GB as f64;
        lines.push(format!("total data = {:9.3} GiB", total_data_gb));
    }
    lines.push(format!(
        "{:6.2}% of requested files processed, minimum is {:6.2}",
        pct_files, pct_files_min
    ));
    lines.push(format!("elapsed time = {:.6} sec", cluster.elapsed));
    if cluster.elapsed > 0.001 {
        lines.push(format!("files/sec = {:.6}", cluster.files_per_sec));
        if cluster.records > 0 {
            lines.push(format!("IOPS = {:.6}", cluster.iops));
            lines.push(format!("MiB/sec = {:.6}", cluster.mib_per_sec));
        }
    }
    lines
}

/// Print the parameter table shown before the run.
pub fn print_param_table(rows: &[(String, String)]) {
    for (name, value) in rows {
        println!("{:>40} : {}", name, value);
    }
}
