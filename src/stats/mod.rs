//! Result types and aggregation
//!
//! Workers report a compact [`WorkerResult`]; results roll up worker →
//! host → cluster. Elapsed time aggregates as the maximum and counters as
//! sums, but rates aggregate as the **sum of per-worker rates**: under
//! stonewall semantics each worker's elapsed time is its own measurement
//! window, and summing rates measures the aggregate throughput achieved
//! while every worker was active.

pub mod histogram;

use serde::{Deserialize, Serialize};

use crate::config::PCT_FILES_MIN;
use crate::util::time::rate;
use crate::workload::{Invocation, Status};

/// Terminal state of one worker, as serialized across the process boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub host: String,
    pub tid: String,
    /// measured window in seconds
    pub elapsed: f64,
    /// files completed inside the measured window
    pub files: u64,
    /// records transferred inside the measured window
    pub records: u64,
    /// record size in effect, KB
    pub record_size_kb: u64,
    pub total_size_kb: u64,
    /// files requested of this worker
    pub iterations: u64,
    pub status: Status,
}

impl WorkerResult {
    pub fn from_invocation(inv: &Invocation) -> Self {
        Self {
            host: inv.host.clone(),
            tid: inv.tid.clone(),
            elapsed: inv.elapsed,
            files: inv.filenum_final as u64,
            records: inv.rq_final,
            record_size_kb: inv.record_size_kb_effective(),
            total_size_kb: inv.params.total_size_kb,
            iterations: inv.params.iterations as u64,
            status: inv.status,
        }
    }

    pub fn files_per_sec(&self) -> f64 {
        rate(self.files, self.elapsed)
    }

    pub fn iops(&self) -> f64 {
        rate(self.records, self.elapsed)
    }

    pub fn mib_per_sec(&self) -> f64 {
        self.iops() * self.record_size_kb as f64 / 1024.0
    }
}

/// Aggregate over one host's workers (or over hosts, for the cluster).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub name: String,
    pub worker_count: usize,
    /// max over members
    pub elapsed: f64,
    pub files: u64,
    pub records: u64,
    /// sums of member rates
    pub files_per_sec: f64,
    pub iops: f64,
    pub mib_per_sec: f64,
    /// OK iff every member was OK, else the first non-OK status
    pub status: Status,
}

impl Summary {
    fn accumulate(name: String, members: impl Iterator<Item = MemberView>) -> Summary {
        let mut s = Summary {
            name,
            worker_count: 0,
            elapsed: 0.0,
            files: 0,
            records: 0,
            files_per_sec: 0.0,
            iops: 0.0,
            mib_per_sec: 0.0,
            status: Status::Ok,
        };
        for m in members {
            s.worker_count += m.worker_count;
            s.elapsed = s.elapsed.max(m.elapsed);
            s.files += m.files;
            s.records += m.records;
            s.files_per_sec += m.files_per_sec;
            s.iops += m.iops;
            s.mib_per_sec += m.mib_per_sec;
            if s.status.is_ok() && !m.status.is_ok() {
                s.status = m.status;
            }
        }
        s
    }
}

struct MemberView {
    worker_count: usize,
    elapsed: f64,
    files: u64,
    records: u64,
    files_per_sec: f64,
    iops: f64,
    mib_per_sec: f64,
    status: Status,
}

impl From<&WorkerResult> for MemberView {
    fn from(w: &WorkerResult) -> Self {
        MemberView {
            worker_count: 1,
            elapsed: w.elapsed,
            files: w.files,
            records: w.records,
            files_per_sec: w.files_per_sec(),
            iops: w.iops(),
            mib_per_sec: w.mib_per_sec(),
            status: w.status,
        }
    }
}

impl From<&Summary> for MemberView {
    fn from(s: &Summary) -> Self {
        MemberView {
            worker_count: s.worker_count,
            elapsed: s.elapsed,
            files: s.files,
            records: s.records,
            files_per_sec: s.files_per_sec,
            iops: s.iops,
            mib_per_sec: s.mib_per_sec,
            status: s.status,
        }
    }
}

/// Aggregate worker results into per-host summaries and one cluster
/// summary. Hosts appear in first-seen order.
pub fn aggregate(workers: &[WorkerResult]) -> (Vec<Summary>, Summary) {
    let mut host_order: Vec<&str> = Vec::new();
    for w in workers {
        if !host_order.contains(&w.host.as_str()) {
            host_order.push(&w.host);
        }
    }
    let per_host: Vec<Summary> = host_order
        .iter()
        .map(|h| {
            Summary::accumulate(
                h.to_string(),
                workers
                    .iter()
                    .filter(|w| w.host == *h)
                    .map(MemberView::from),
            )
        })
        .collect();
    let cluster = Summary::accumulate(
        "cluster".to_string(),
        per_host.iter().map(MemberView::from),
    );
    (per_host, cluster)
}

/// Percentage of the requested file population that completed before the
/// first worker finished.
pub fn pct_files_done(cluster: &Summary, iterations: u64, expected_workers: usize) -> f64 {
    let requested = iterations * expected_workers as u64;
    if requested == 0 {
        return 100.0;
    }
    100.0 * cluster.files as f64 / requested as f64
}

/// Warnings the user should see alongside the results.
pub fn completion_warnings(
    cluster: &Summary,
    iterations: u64,
    expected_workers: usize,
    responding_workers: usize,
) -> Vec<String> {
    let mut warnings = Vec::new();
    if responding_workers < expected_workers {
        warnings.push(format!(
            "WARNING: only {} of {} workload generators returned results",
            responding_workers, expected_workers
        ));
    }
    let pct = pct_files_done(cluster, iterations, expected_workers);
    if pct < PCT_FILES_MIN {
        warnings.push(format!(
            "WARNING: only {:.2}% of requested files processed before the first \
             worker finished (minimum {:.2}%); test parameters were too uneven \
             for a valid stonewall measurement",
            pct, PCT_FILES_MIN
        ));
    }
    warnings
}
