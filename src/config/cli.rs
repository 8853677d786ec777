//! CLI argument parsing using clap
//!
//! Workload booleans accept `y|yes|t|true|n|no|f|false` (case-insensitive)
//! rather than being presence flags, because every parameter must be
//! forwardable to remote hosts as an explicit `--name value` pair.

use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::{Operation, SizeDistribution, TestParams};

/// Parse a y/n style boolean value.
pub fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" => Ok(true),
        "n" | "no" | "f" | "false" => Ok(false),
        other => Err(format!(
            "boolean value must be one of y|yes|t|true|n|no|f|false, not {:?}",
            other
        )),
    }
}

/// metapulse - distributed small-file and metadata benchmark
#[derive(Parser, Debug, Clone)]
#[command(name = "metapulse")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Workload operation (create, append, overwrite, read, readdir, ls-l,
    /// stat, chmod, symlink, delete, delete-renamed, rename, mkdir, rmdir,
    /// setxattr, getxattr, swift-put, swift-get, await-create, cleanup)
    #[arg(long, value_parser = Operation::from_str)]
    pub operation: Option<Operation>,

    /// Top-level test directory, or a comma-separated list of them
    /// (one per mountpoint under test)
    #[arg(long)]
    pub top: Option<String>,

    /// Comma-separated list of remote workload-generator hosts
    #[arg(long)]
    pub host_set: Option<String>,

    /// Files per worker
    #[arg(long)]
    pub files: Option<usize>,

    /// Workers per host
    #[arg(long)]
    pub threads: Option<usize>,

    /// Files per directory
    #[arg(long)]
    pub files_per_dir: Option<usize>,

    /// Subdirectories per directory
    #[arg(long)]
    pub dirs_per_dir: Option<usize>,

    /// Record size in KB (0 = use the largest feasible)
    #[arg(long)]
    pub record_size: Option<u64>,

    /// File size in KB
    #[arg(long)]
    pub file_size: Option<u64>,

    /// File size distribution: fixed or exponential
    #[arg(long, value_parser = SizeDistribution::from_str)]
    pub file_size_distribution: Option<SizeDistribution>,

    /// Extended attribute value size in bytes
    #[arg(long)]
    pub xattr_size: Option<usize>,

    /// Extended attributes per file
    #[arg(long)]
    pub xattr_count: Option<usize>,

    /// Prepended to every file name
    #[arg(long)]
    pub prefix: Option<String>,

    /// Appended to every file name
    #[arg(long)]
    pub suffix: Option<String>,

    /// Scatter file numbers across directories instead of filling them in
    /// sequence
    #[arg(long, value_parser = parse_bool)]
    pub hash_into_dirs: Option<bool>,

    /// Microseconds to sleep between files
    #[arg(long)]
    pub pause: Option<u64>,

    /// Stop measuring when the first worker finishes its share
    #[arg(long, value_parser = parse_bool)]
    pub stonewall: Option<bool>,

    /// Keep issuing requests after the measurement window closes
    #[arg(long, value_parser = parse_bool)]
    pub finish: Option<bool>,

    /// fsync after modifying each file
    #[arg(long, value_parser = parse_bool)]
    pub fsync: Option<bool>,

    /// Store a creation-time/size attribute on created files
    #[arg(long, value_parser = parse_bool)]
    pub record_ctime_size: Option<bool>,

    /// Compare read data against the generator buffer
    #[arg(long, value_parser = parse_bool)]
    pub verify_read: Option<bool>,

    /// Generate incompressible buffer contents
    #[arg(long, value_parser = parse_bool)]
    pub incompressible: Option<bool>,

    /// Append per-operation response times to a CSV
    #[arg(long, value_parser = parse_bool)]
    pub response_times: Option<bool>,

    /// Also accumulate response times into a latency histogram
    #[arg(long, value_parser = parse_bool)]
    pub response_time_histogram: Option<bool>,

    /// All workers share one directory tree
    #[arg(long, value_parser = parse_bool)]
    pub same_dir: Option<bool>,

    /// Let create build missing directories on demand
    #[arg(long, value_parser = parse_bool)]
    pub dirs_on_demand: Option<bool>,

    /// Give each remote host the directory slice of its neighbor
    #[arg(long, value_parser = parse_bool)]
    pub permute_host_dirs: Option<bool>,

    /// Start remote hosts through the drop-file daemon instead of ssh
    #[arg(long, value_parser = parse_bool)]
    pub launch_by_daemon: Option<bool>,

    /// Directory holding this binary on the remote hosts
    #[arg(long)]
    pub remote_pgm_dir: Option<PathBuf>,

    /// Shared coordination directory (default: first top dir + network_shared)
    #[arg(long)]
    pub network_sync_dir: Option<PathBuf>,

    /// Directory-creation rate assumed when calculating startup timeouts
    #[arg(long)]
    pub min_dirs_per_sec: Option<u64>,

    /// Write a JSON results artifact to this path
    #[arg(long)]
    pub output_json: Option<PathBuf>,

    /// Read additional parameters from a YAML file (keys are the CLI names
    /// without the leading --; YAML values win)
    #[arg(long)]
    pub yaml_input_file: Option<PathBuf>,

    /// Debug logging
    #[arg(long, value_parser = parse_bool)]
    pub verbose: Option<bool>,

    // internal flags used by remote and worker invocations
    /// Run as a remote per-host driver (internal)
    #[arg(long, hide = true, value_parser = parse_bool)]
    pub slave: Option<bool>,

    /// Host identity to assume (internal)
    #[arg(long, hide = true)]
    pub as_host: Option<String>,

    /// Run as a single worker process with this id (internal)
    #[arg(long, hide = true)]
    pub worker_id: Option<String>,

    /// Run the long-lived launch daemon that polls for command drop-files
    #[arg(long)]
    pub launch_daemon: bool,

    /// Replace this prefix of dropped commands with --top (daemon mode, for
    /// hosts that mount the shared filesystem at a different path)
    #[arg(long)]
    pub substitute_top: Option<String>,
}

/// What kind of process this invocation is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliMode {
    /// coordinator (and local per-host driver)
    Master,
    /// remote per-host driver started by the coordinator
    Slave,
    /// one worker subprocess
    Worker(String),
    /// long-lived remote launch daemon
    Daemon,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    pub fn mode(&self) -> CliMode {
        if self.launch_daemon {
            CliMode::Daemon
        } else if let Some(tid) = &self.worker_id {
            CliMode::Worker(tid.clone())
        } else if self.slave == Some(true) {
            CliMode::Slave
        } else {
            CliMode::Master
        }
    }

    /// Overlay explicitly given CLI values onto the defaults.
    pub fn apply_to(&self, params: &mut TestParams) {
        let w = &mut params.workload;
        if let Some(v) = self.operation {
            w.operation = v;
        }
        if let Some(ref v) = self.top {
            w.top_dirs = v.split(',').map(PathBuf::from).collect();
        }
        if let Some(v) = self.files {
            w.iterations = v;
        }
        if let Some(v) = self.files_per_dir {
            w.files_per_dir = v;
        }
        if let Some(v) = self.dirs_per_dir {
            w.dirs_per_dir = v;
        }
        if let Some(v) = self.record_size {
            w.record_size_kb = v;
        }
        if let Some(v) = self.file_size {
            w.total_size_kb = v;
        }
        if let Some(v) = self.file_size_distribution {
            w.size_distribution = v;
        }
        if let Some(v) = self.xattr_size {
            w.xattr_size = v;
        }
        if let Some(v) = self.xattr_count {
            w.xattr_count = v;
        }
        if let Some(ref v) = self.prefix {
            w.prefix = v.clone();
        }
        if let Some(ref v) = self.suffix {
            w.suffix = v.clone();
        }
        if let Some(v) = self.hash_into_dirs {
            w.hash_to_dir = v;
        }
        if let Some(v) = self.pause {
            w.pause_between_files_us = v;
        }
        if let Some(v) = self.stonewall {
            w.stonewall = v;
        }
        if let Some(v) = self.finish {
            w.finish_all_requests = v;
        }
        if let Some(v) = self.fsync {
            w.fsync = v;
        }
        if let Some(v) = self.record_ctime_size {
            w.record_ctime_size = v;
        }
        if let Some(v) = self.verify_read {
            w.verify_read = v;
        }
        if let Some(v) = self.incompressible {
            w.incompressible = v;
        }
        if let Some(v) = self.response_times {
            w.measure_response_times = v;
        }
        if let Some(v) = self.response_time_histogram {
            w.response_time_histogram = v;
        }
        if let Some(v) = self.same_dir {
            w.is_shared_dir = v;
        }
        if let Some(v) = self.dirs_on_demand {
            w.dirs_on_demand = v;
        }
        if let Some(ref v) = self.network_sync_dir {
            w.network_dir_override = Some(v.clone());
        }

        if let Some(ref v) = self.host_set {
            params.host_set = v
                .split([',', ' '])
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().to_string())
                .collect();
        }
        if let Some(v) = self.threads {
            params.thread_count = v;
        }
        if let Some(v) = self.permute_host_dirs {
            params.permute_host_dirs = v;
        }
        if let Some(v) = self.launch_by_daemon {
            params.launch_by_daemon = v;
        }
        if let Some(ref v) = self.remote_pgm_dir {
            params.remote_program_dir = v.clone();
        }
        if let Some(v) = self.min_dirs_per_sec {
            params.min_directories_per_sec = v;
        }
        if let Some(ref v) = self.output_json {
            params.output_json = Some(v.clone());
        }
        if self.slave == Some(true) {
            params.is_slave = true;
        }
        if let Some(ref v) = self.as_host {
            params.as_host = Some(v.clone());
        }
    }

    /// Reconstruct the argument list a remote host needs to reproduce this
    /// workload (coordination flags are supplied separately).
    pub fn remote_args(&self) -> Vec<String> {
        fn push_flag(args: &mut Vec<String>, name: &str, val: Option<&str>) {
            if let Some(v) = val {
                args.push(format!("--{}", name));
                args.push(v.to_string());
            }
        }
        fn yn(v: bool) -> String {
            (if v { "y" } else { "n" }).to_string()
        }
        let mut args = Vec::new();
        push_flag(
            &mut args,
            "operation",
            self.operation.map(|o| o.name().to_string()).as_deref(),
        );
        push_flag(&mut args, "top", self.top.as_deref());
        push_flag(
            &mut args,
            "files",
            self.files.map(|v| v.to_string()).as_deref(),
        );
        push_flag(
            &mut args,
            "threads",
            self.threads.map(|v| v.to_string()).as_deref(),
        );
        push_flag(
            &mut args,
            "files-per-dir",
            self.files_per_dir.map(|v| v.to_string()).as_deref(),
        );
        push_flag(
            &mut args,
            "dirs-per-dir",
            self.dirs_per_dir.map(|v| v.to_string()).as_deref(),
        );
        push_flag(
            &mut args,
            "record-size",
            self.record_size.map(|v| v.to_string()).as_deref(),
        );
        push_flag(
            &mut args,
            "file-size",
            self.file_size.map(|v| v.to_string()).as_deref(),
        );
        push_flag(
            &mut args,
            "file-size-distribution",
            self.file_size_distribution
                .map(|v| v.name().to_string())
                .as_deref(),
        );
        push_flag(
            &mut args,
            "xattr-size",
            self.xattr_size.map(|v| v.to_string()).as_deref(),
        );
        push_flag(
            &mut args,
            "xattr-count",
            self.xattr_count.map(|v| v.to_string()).as_deref(),
        );
        push_flag(&mut args, "prefix", self.prefix.as_deref());
        push_flag(&mut args, "suffix", self.suffix.as_deref());
        push_flag(
            &mut args,
            "hash-into-dirs",
            self.hash_into_dirs.map(yn).as_deref(),
        );
        push_flag(&mut args, "pause", self.pause.map(|v| v.to_string()).as_deref());
        push_flag(&mut args, "stonewall", self.stonewall.map(yn).as_deref());
        push_flag(&mut args, "finish", self.finish.map(yn).as_deref());
        push_flag(&mut args, "fsync", self.fsync.map(yn).as_deref());
        push_flag(
            &mut args,
            "record-ctime-size",
            self.record_ctime_size.map(yn).as_deref(),
        );
        push_flag(&mut args, "verify-read", self.verify_read.map(yn).as_deref());
        push_flag(
            &mut args,
            "incompressible",
            self.incompressible.map(yn).as_deref(),
        );
        push_flag(
            &mut args,
            "response-times",
            self.response_times.map(yn).as_deref(),
        );
        push_flag(
            &mut args,
            "response-time-histogram",
            self.response_time_histogram.map(yn).as_deref(),
        );
        push_flag(&mut args, "same-dir", self.same_dir.map(yn).as_deref());
        push_flag(
            &mut args,
            "dirs-on-demand",
            self.dirs_on_demand.map(yn).as_deref(),
        );
        push_flag(&mut args, "verbose", self.verbose.map(yn).as_deref());
        args
    }
}
