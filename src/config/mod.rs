//! Configuration module
//!
//! Handles CLI argument parsing, the optional YAML parameter file, and
//! validation. `WorkloadParams` is the per-worker parameter set that crosses
//! process boundaries inside the serialized snapshot; `TestParams` is the
//! coordinator-side superset describing the whole run.

pub mod cli;
pub mod validator;
pub mod yaml;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use crate::workload::buffer::SizeDistribution;

/// Minimum percentage of requested files that must complete before the first
/// worker finishes, for the stonewalled measurement to be considered even.
pub const PCT_FILES_MIN: f64 = 90.0;

/// The workload operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Create,
    Append,
    Overwrite,
    Read,
    Readdir,
    LsL,
    Stat,
    Chmod,
    Symlink,
    Delete,
    DeleteRenamed,
    Rename,
    Mkdir,
    Rmdir,
    Setxattr,
    Getxattr,
    SwiftPut,
    SwiftGet,
    AwaitCreate,
    Cleanup,
}

impl Operation {
    pub const ALL: [Operation; 20] = [
        Operation::Create,
        Operation::Append,
        Operation::Overwrite,
        Operation::Read,
        Operation::Readdir,
        Operation::LsL,
        Operation::Stat,
        Operation::Chmod,
        Operation::Symlink,
        Operation::Delete,
        Operation::DeleteRenamed,
        Operation::Rename,
        Operation::Mkdir,
        Operation::Rmdir,
        Operation::Setxattr,
        Operation::Getxattr,
        Operation::SwiftPut,
        Operation::SwiftGet,
        Operation::AwaitCreate,
        Operation::Cleanup,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Append => "append",
            Operation::Overwrite => "overwrite",
            Operation::Read => "read",
            Operation::Readdir => "readdir",
            Operation::LsL => "ls-l",
            Operation::Stat => "stat",
            Operation::Chmod => "chmod",
            Operation::Symlink => "symlink",
            Operation::Delete => "delete",
            Operation::DeleteRenamed => "delete-renamed",
            Operation::Rename => "rename",
            Operation::Mkdir => "mkdir",
            Operation::Rmdir => "rmdir",
            Operation::Setxattr => "setxattr",
            Operation::Getxattr => "getxattr",
            Operation::SwiftPut => "swift-put",
            Operation::SwiftGet => "swift-get",
            Operation::AwaitCreate => "await-create",
            Operation::Cleanup => "cleanup",
        }
    }

    /// True for operations that transfer at least one data record per file;
    /// pure-metadata operations never increment the record counter.
    pub fn issues_records(&self) -> bool {
        matches!(
            self,
            Operation::Create
                | Operation::Append
                | Operation::Overwrite
                | Operation::Read
                | Operation::SwiftPut
                | Operation::SwiftGet
        )
    }

    /// Directory trees are pre-created (outside the measured window) for the
    /// operations that populate them.
    pub fn precreates_dirs(&self) -> bool {
        matches!(
            self,
            Operation::Create | Operation::Mkdir | Operation::SwiftPut
        )
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.name() == s)
            .ok_or_else(|| format!("unrecognized operation name: {}", s))
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-worker workload parameters, immutable once the run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadParams {
    pub operation: Operation,
    /// files per worker
    pub iterations: usize,
    pub files_per_dir: usize,
    pub dirs_per_dir: usize,
    /// record size in KB; 0 means "use the largest feasible"
    pub record_size_kb: u64,
    /// total data per file in KB
    pub total_size_kb: u64,
    pub size_distribution: SizeDistribution,
    /// extended attribute value size in bytes
    pub xattr_size: usize,
    /// extended attributes per file
    pub xattr_count: usize,
    pub fsync: bool,
    pub stonewall: bool,
    pub finish_all_requests: bool,
    pub verify_read: bool,
    pub incompressible: bool,
    pub hash_to_dir: bool,
    /// all workers share one directory tree
    pub is_shared_dir: bool,
    /// store a creation-time/size attribute on created files
    pub record_ctime_size: bool,
    pub measure_response_times: bool,
    pub response_time_histogram: bool,
    /// let create build missing directories lazily on ENOENT
    pub dirs_on_demand: bool,
    pub prefix: String,
    pub suffix: String,
    pub pause_between_files_us: u64,
    /// round-robined top-level directories (one per mountpoint under test)
    pub top_dirs: Vec<PathBuf>,
    /// override for the shared coordination directory
    pub network_dir_override: Option<PathBuf>,
}

impl Default for WorkloadParams {
    fn default() -> Self {
        Self {
            operation: Operation::Cleanup,
            iterations: 200,
            files_per_dir: 100,
            dirs_per_dir: 10,
            record_size_kb: 0,
            total_size_kb: 64,
            size_distribution: SizeDistribution::Fixed,
            xattr_size: 0,
            xattr_count: 0,
            fsync: false,
            stonewall: true,
            finish_all_requests: true,
            verify_read: true,
            incompressible: false,
            hash_to_dir: false,
            is_shared_dir: false,
            record_ctime_size: false,
            measure_response_times: false,
            response_time_histogram: false,
            dirs_on_demand: false,
            prefix: String::new(),
            suffix: String::new(),
            pause_between_files_us: 0,
            top_dirs: vec![std::env::temp_dir().join("metapulse")],
            network_dir_override: None,
        }
    }
}

impl WorkloadParams {
    /// Source trees, one per top directory.
    pub fn src_dirs(&self) -> Vec<PathBuf> {
        self.top_dirs.iter().map(|d| d.join("file_srcdir")).collect()
    }

    /// Rename-destination trees, one per top directory.
    pub fn dest_dirs(&self) -> Vec<PathBuf> {
        self.top_dirs.iter().map(|d| d.join("file_dstdir")).collect()
    }

    /// The shared coordination directory (first top dir unless overridden).
    pub fn network_dir(&self) -> PathBuf {
        self.network_dir_override
            .clone()
            .unwrap_or_else(|| self.top_dirs[0].join("network_shared"))
    }
}

/// Complete run description on the coordinator side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestParams {
    pub workload: WorkloadParams,
    /// remote workload-generator hosts; empty means single-host
    pub host_set: Vec<String>,
    /// workers per host
    pub thread_count: usize,
    /// give each remote host the directory slice of its neighbor
    pub permute_host_dirs: bool,
    /// use the drop-file daemon instead of ssh to start remote hosts
    pub launch_by_daemon: bool,
    /// directory holding this binary on the remote hosts
    pub remote_program_dir: PathBuf,
    pub min_directories_per_sec: u64,
    pub output_json: Option<PathBuf>,
    pub startup_timeout_sec: u64,
    pub host_startup_timeout_sec: u64,
    /// set only on remote invocations
    #[serde(default)]
    pub is_slave: bool,
    /// host identity to assume (directory permutation, containers)
    #[serde(default)]
    pub as_host: Option<String>,
}

impl Default for TestParams {
    fn default() -> Self {
        Self {
            workload: WorkloadParams::default(),
            host_set: Vec::new(),
            thread_count: 2,
            permute_host_dirs: false,
            launch_by_daemon: false,
            remote_program_dir: std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(Path::to_path_buf))
                .unwrap_or_else(|| PathBuf::from(".")),
            min_directories_per_sec: 50,
            output_json: None,
            startup_timeout_sec: 0,
            host_startup_timeout_sec: 0,
            is_slave: false,
            as_host: None,
        }
    }
}

impl TestParams {
    pub fn is_multi_host(&self) -> bool {
        !self.host_set.is_empty()
    }

    /// Startup timeouts scale with how much directory tree has to be built
    /// before workers can reach the gate.
    pub fn recalculate_timeouts(&mut self) {
        let w = &self.workload;
        let host_count = self.host_set.len().max(1) as u64;
        let total_files = w.iterations as u64 * self.thread_count as u64 * host_count;
        let total_dirs = total_files / w.files_per_dir.max(1) as u64;

        // src and dest trees are both created, hence times 2
        let dir_creation_overhead = (self.thread_count as u64 / 30)
            + (total_dirs * 2) / self.min_directories_per_sec.max(1);
        // building the pathname table is significant at millions of files per dir
        let file_creation_overhead = u64::max(1, w.files_per_dir as u64 / 300_000);

        // no less than 2 seconds, to absorb clock skew between hosts
        self.startup_timeout_sec = 2 + file_creation_overhead + dir_creation_overhead;
        #[cfg(windows)]
        {
            self.startup_timeout_sec += 30;
        }

        self.host_startup_timeout_sec = self.startup_timeout_sec;
        if self.is_multi_host() {
            self.host_startup_timeout_sec += self.host_set.len() as u64 / 2;
        }
    }

    /// `(name, value)` pairs shown to the user before the run, most important
    /// parameters first.
    pub fn human_readable(&self) -> Vec<(String, String)> {
        fn yn(b: bool) -> String {
            (if b { "Y" } else { "N" }).to_string()
        }
        let w = &self.workload;
        let mut rows = vec![
            ("version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
            ("hosts in test".to_string(), format!("{:?}", self.host_set)),
            (
                "top test directory(s)".to_string(),
                format!("{:?}", w.top_dirs),
            ),
            ("operation".to_string(), w.operation.name().to_string()),
            ("files/thread".to_string(), w.iterations.to_string()),
            ("threads".to_string(), self.thread_count.to_string()),
            (
                "record size (KB, 0 = maximum)".to_string(),
                w.record_size_kb.to_string(),
            ),
            ("file size (KB)".to_string(), w.total_size_kb.to_string()),
            (
                "file size distribution".to_string(),
                w.size_distribution.name().to_string(),
            ),
            ("files per dir".to_string(), w.files_per_dir.to_string()),
            ("dirs per dir".to_string(), w.dirs_per_dir.to_string()),
            (
                "threads share directories?".to_string(),
                yn(w.is_shared_dir),
            ),
            ("filename prefix".to_string(), w.prefix.clone()),
            ("filename suffix".to_string(), w.suffix.clone()),
            (
                "hash file number into dir.?".to_string(),
                yn(w.hash_to_dir),
            ),
            ("fsync after modify?".to_string(), yn(w.fsync)),
            (
                "pause between files (microsec)".to_string(),
                w.pause_between_files_us.to_string(),
            ),
            (
                "minimum directories per sec".to_string(),
                self.min_directories_per_sec.to_string(),
            ),
            ("finish all requests?".to_string(), yn(w.finish_all_requests)),
            ("stonewall?".to_string(), yn(w.stonewall)),
            (
                "measure response times?".to_string(),
                yn(w.measure_response_times),
            ),
            ("verify read?".to_string(), yn(w.verify_read)),
            ("incompressible?".to_string(), yn(w.incompressible)),
            ("ext.attr.size".to_string(), w.xattr_size.to_string()),
            ("ext.attr.count".to_string(), w.xattr_count.to_string()),
        ];
        if self.is_multi_host() {
            rows.push((
                "permute host directories?".to_string(),
                yn(self.permute_host_dirs),
            ));
            rows.push((
                "remote program directory".to_string(),
                self.remote_program_dir.display().to_string(),
            ));
            rows.push((
                "network thread sync. dir.".to_string(),
                self.workload.network_dir().display().to_string(),
            ));
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names_roundtrip() {
        for op in Operation::ALL {
            assert_eq!(op.name().parse::<Operation>().unwrap(), op);
        }
        assert!("frobnicate".parse::<Operation>().is_err());
    }

    #[test]
    fn test_operation_hyphenated_names() {
        assert_eq!("ls-l".parse::<Operation>().unwrap(), Operation::LsL);
        assert_eq!(
            "delete-renamed".parse::<Operation>().unwrap(),
            Operation::DeleteRenamed
        );
        assert_eq!(
            "await-create".parse::<Operation>().unwrap(),
            Operation::AwaitCreate
        );
    }

    #[test]
    fn test_records_classification() {
        assert!(Operation::Create.issues_records());
        assert!(Operation::Read.issues_records());
        assert!(!Operation::Stat.issues_records());
        assert!(!Operation::Mkdir.issues_records());
        assert!(!Operation::Rename.issues_records());
    }

    #[test]
    fn test_derived_dirs() {
        let mut w = WorkloadParams::default();
        w.top_dirs = vec![PathBuf::from("/mnt/a"), PathBuf::from("/mnt/b")];
        assert_eq!(
            w.src_dirs(),
            vec![
                PathBuf::from("/mnt/a/file_srcdir"),
                PathBuf::from("/mnt/b/file_srcdir")
            ]
        );
        assert_eq!(w.network_dir(), PathBuf::from("/mnt/a/network_shared"));
        w.network_dir_override = Some(PathBuf::from("/shared"));
        assert_eq!(w.network_dir(), PathBuf::from("/shared"));
    }

    #[test]
    fn test_timeout_formula() {
        let mut p = TestParams::default();
        p.workload.iterations = 1000;
        p.workload.files_per_dir = 100;
        p.thread_count = 4;
        p.min_directories_per_sec = 50;
        p.recalculate_timeouts();
        // total_dirs = 1000*4/100 = 40; 2 + 1 + (0 + 80/50 = 1) = 4
        assert_eq!(p.startup_timeout_sec, 4);
        assert_eq!(p.host_startup_timeout_sec, 4);
    }

    #[test]
    fn test_timeout_multi_host_margin() {
        let mut p = TestParams::default();
        p.host_set = (0..10).map(|i| format!("h{}", i)).collect();
        p.workload.iterations = 100;
        p.workload.files_per_dir = 100;
        p.thread_count = 2;
        p.recalculate_timeouts();
        assert_eq!(
            p.host_startup_timeout_sec,
            p.startup_timeout_sec + 5 // 10 hosts / 2
        );
    }

    #[test]
    fn test_params_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("param.msgpack");
        let mut p = TestParams::default();
        p.workload.operation = Operation::SwiftPut;
        p.workload.prefix = "p".into();
        p.host_set = vec!["h1".into()];
        crate::sync::write_snapshot(&path, &p).unwrap();
        let back: TestParams = crate::sync::read_snapshot(&path).unwrap();
        assert_eq!(back.workload.operation, Operation::SwiftPut);
        assert_eq!(back.host_set, vec!["h1".to_string()]);
        assert!(!back.is_slave);
    }
}
