//! Cross-parameter validation
//!
//! Runs after the CLI and YAML layers have produced a complete `TestParams`,
//! before anything touches the filesystem.

use anyhow::{bail, Result};

use crate::config::{Operation, TestParams};

/// Reject parameter combinations that cannot produce a valid run.
pub fn validate(params: &TestParams) -> Result<()> {
    let w = &params.workload;

    if w.iterations == 0 {
        bail!("files per worker must be positive");
    }
    if params.thread_count == 0 {
        bail!("thread count must be positive");
    }
    if w.files_per_dir == 0 {
        bail!("files per directory must be positive");
    }
    if w.dirs_per_dir < 2 {
        bail!("directories per directory must be at least 2");
    }
    if w.record_size_kb > w.total_size_kb && w.total_size_kb != 0 {
        bail!(
            "record size {} KB cannot exceed file size {} KB",
            w.record_size_kb,
            w.total_size_kb
        );
    }
    if w.record_size_kb != 0 && w.total_size_kb % w.record_size_kb != 0 {
        bail!("file size must be a multiple of record size");
    }
    for d in &w.top_dirs {
        // refuse anything near the top of a filesystem
        if d.as_os_str().len() < 6 {
            bail!(
                "top directory {:?} is shorter than 6 characters, too dangerous",
                d
            );
        }
    }
    if w.hash_to_dir
        && matches!(w.operation, Operation::Readdir | Operation::LsL)
    {
        bail!(
            "operation {} cannot run with hashed directory placement",
            w.operation
        );
    }
    if matches!(w.operation, Operation::Setxattr | Operation::Getxattr)
        && (w.xattr_size == 0 || w.xattr_count == 0)
    {
        bail!(
            "operation {} needs --xattr-size and --xattr-count greater than zero",
            w.operation
        );
    }
    if params.permute_host_dirs && params.host_set.len() < 2 {
        bail!("permuting host directories needs at least two hosts");
    }
    Ok(())
}

/// Final parameter adjustments after validation.
pub fn finalize(params: &mut TestParams) {
    // a stonewall over a handful of files measures nothing but noise
    if params.workload.iterations < 10 {
        params.workload.stonewall = false;
    }
    params.recalculate_timeouts();
}
