//! JSON results artifact
//!
//! Written when `--output-json` is given: the full parameter set plus
//! per-thread, per-host and cluster results in one document, for downstream
//! analysis tooling.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::Path;

use crate::config::TestParams;
use crate::stats::{Summary, WorkerResult};

fn summary_json(s: &Summary) -> Value {
    json!({
        "name": s.name,
        "threads": s.worker_count,
        "elapsed": s.elapsed,
        "files": s.files,
        "records": s.records,
        "files-per-sec": s.files_per_sec,
        "iops": s.iops,
        "mib-per-sec": s.mib_per_sec,
        "status": s.status.describe(),
    })
}

/// Build the complete artifact document.
pub fn build_document(
    params: &TestParams,
    workers: &[WorkerResult],
    per_host: &[Summary],
    cluster: &Summary,
    pct_files: f64,
    warnings: &[String],
) -> Value {
    let w = &params.workload;
    let param_obj = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "host-set": params.host_set,
        "top": w.top_dirs,
        "operation": w.operation.name(),
        "files-per-thread": w.iterations,
        "threads": params.thread_count,
        "record-size-kb": w.record_size_kb,
        "file-size-kb": w.total_size_kb,
        "file-size-distr": w.size_distribution.name(),
        "files-per-dir": w.files_per_dir,
        "dirs-per-dir": w.dirs_per_dir,
        "xattr-size": w.xattr_size,
        "xattr-count": w.xattr_count,
        "fsync-after-modify": w.fsync,
        "stonewall": w.stonewall,
        "finish-all-requests": w.finish_all_requests,
        "verify-read": w.verify_read,
        "incompressible": w.incompressible,
        "hash-to-dir": w.hash_to_dir,
        "share-dir": w.is_shared_dir,
        "fname-prefix": w.prefix,
        "fname-suffix": w.suffix,
        "pause-between-files-us": w.pause_between_files_us,
        "network-sync-dir": w.network_dir(),
        "min-directories-per-sec": params.min_directories_per_sec,
        "permute-host-dirs": params.permute_host_dirs,
        "startup-timeout": params.startup_timeout_sec,
        "host-timeout": params.host_startup_timeout_sec,
    });

    let per_thread: Vec<Value> = workers
        .iter()
        .map(|w| {
            json!({
                "host": w.host,
                "thread": w.tid,
                "elapsed": w.elapsed,
                "files": w.files,
                "records": w.records,
                "files-per-sec": w.files_per_sec(),
                "iops": w.iops(),
                "mib-per-sec": w.mib_per_sec(),
                "status": w.status.describe(),
            })
        })
        .collect();

    json!({
        "params": param_obj,
        "results": {
            "pct-files-done": pct_files,
            "warnings": warnings,
            "per-thread": per_thread,
            "per-host": per_host.iter().map(summary_json).collect::<Vec<_>>(),
            "cluster": summary_json(cluster),
        }
    })
}

/// Write the artifact to `path`, pretty-printed.
pub fn write_artifact(
    path: &Path,
    params: &TestParams,
    workers: &[WorkerResult],
    per_host: &[Summary],
    cluster: &Summary,
    pct_files: f64,
    warnings: &[String],
) -> Result<()> {
    let doc = build_document(params, workers, per_host, cluster, pct_files, warnings);
    let text = serde_json::to_string_pretty(&doc).context("serializing JSON results")?;
    std::fs::write(path, text)
        .with_context(|| format!("writing JSON results to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::Status;

    fn sample() -> (TestParams, Vec<WorkerResult>) {
        let params = TestParams::default();
        let workers = vec![WorkerResult {
            host: "h1".to_string(),
            tid: "00".to_string(),
            elapsed: 1.0,
            files: 100,
            records: 100,
            record_size_kb: 64,
            total_size_kb: 64,
            iterations: 100,
            status: Status::Ok,
        }];
        (params, workers)
    }

    #[test]
    fn test_document_structure() {
        let (params, workers) = sample();
        let (hosts, cluster) = crate::stats::aggregate(&workers);
        let doc = build_document(&params, &workers, &hosts, &cluster, 100.0, &[]);
        assert_eq!(doc["params"]["operation"], "cleanup");
        assert_eq!(doc["results"]["per-thread"][0]["files"], 100);
        assert_eq!(doc["results"]["cluster"]["status"], "ok");
        assert_eq!(doc["results"]["pct-files-done"], 100.0);
    }

    #[test]
    fn test_write_artifact_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let (params, workers) = sample();
        let (hosts, cluster) = crate::stats::aggregate(&workers);
        let warnings = vec!["WARNING: something".to_string()];
        write_artifact(&path, &params, &workers, &hosts, &cluster, 50.0, &warnings).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["results"]["warnings"][0], "WARNING: something");
        assert_eq!(doc["params"]["threads"], 2);
    }
}
