//! Workload engine
//!
//! One [`Invocation`] per worker process drives a single operation type
//! across a deterministic file population while honoring the barrier,
//! stonewall, abort, pacing and measurement contracts. The engine is
//! synchronous and single-threaded; all cross-worker coordination happens
//! through sentinel files in the shared directory.

pub mod buffer;
pub mod ops;
pub mod paths;
pub mod rsptimes;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, info};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Operation, WorkloadParams};
use crate::sync::{self, SharedDir};
use crate::util::caps::Capabilities;
use crate::util::time::epoch_now;
use crate::util::fnv1a;
use buffer::{SizeDistribution, BIGGEST_BUF_SIZE, RANDOM_SIZE_LIMIT};
use rsptimes::RspTimes;

pub const BYTES_PER_KB: u64 = 1024;

/// Stonewall checks are skipped between every `files_between_checks`
/// iterations; at the smallest file sizes this many files go by per check.
const MAX_FILES_BETWEEN_CHECKS: u64 = 100;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the SIGINT handler that converts an interrupt into a clean end of
/// test. Called once per worker process.
pub fn install_sigint_handler() {
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as usize);
    }
}

fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors raised inside the workload loop.
#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A read or write moved fewer bytes than requested.
    #[error("{op}: file {file_num} request {rq} transferred {byte_count} bytes")]
    TransferMismatch {
        op: &'static str,
        file_num: usize,
        rq: u64,
        byte_count: usize,
    },
    /// Read-back or attribute contents did not match the generator buffer,
    /// or a directory listing was missing an expected entry.
    #[error("{op}: file {file_num}: {detail}")]
    Verify {
        op: &'static str,
        file_num: usize,
        detail: String,
    },
    #[error("worker {0} saw abort flag")]
    Abort(String),
    #[error("{0}")]
    Unsupported(String),
}

/// Terminal status of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Status {
    /// worker never completed its run
    #[default]
    Incomplete,
    Ok,
    /// OS error, by errno
    Errno(i32),
    /// data or attribute verification mismatch
    VerifyFailed,
    Aborted,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn describe(&self) -> String {
        match self {
            Status::Ok => "ok".to_string(),
            Status::Incomplete => "ERR: did not complete".to_string(),
            Status::Errno(e) => format!("ERR: {}", io::Error::from_raw_os_error(*e)),
            Status::VerifyFailed => "ERR: verification mismatch".to_string(),
            Status::Aborted => "ERR: aborted".to_string(),
        }
    }
}

/// Worker state: one per worker process, mutated only by that worker.
pub struct Invocation {
    pub params: WorkloadParams,
    /// two-digit worker id, unique within a host
    pub tid: String,
    /// short hostname this worker runs as
    pub host: String,
    pub src_dirs: Vec<PathBuf>,
    pub dest_dirs: Vec<PathBuf>,
    pub shared: SharedDir,
    /// barrier release file; None disables the barrier (single-worker tests)
    pub starting_gate: Option<PathBuf>,
    pub caps: Capabilities,

    // precomputed before any file op begins
    file_dirs: Vec<String>,
    files_between_checks: u64,

    // buffer generation
    size_rng: Xoshiro256PlusPlus,
    biggest_buf: Vec<u8>,
    pub(crate) buf: Vec<u8>,

    // counters
    pub file_num: usize,
    pub rq: u64,
    pub filenum_final: usize,
    pub rq_final: u64,
    pub start_time: f64,
    pub end_time: f64,
    pub elapsed: f64,
    pub status: Status,

    pub(crate) rsp: RspTimes,
}

impl Invocation {
    pub fn new(params: WorkloadParams, tid: String, host: String, caps: Capabilities) -> Self {
        let src_dirs = params.src_dirs();
        let dest_dirs = params.dest_dirs();
        let shared = SharedDir::new(params.network_dir());
        let rsp = RspTimes::new(
            params.measure_response_times,
            params.response_time_histogram,
        );
        Self {
            params,
            tid,
            host,
            src_dirs,
            dest_dirs,
            shared,
            starting_gate: None,
            caps,
            file_dirs: Vec::new(),
            files_between_checks: 20,
            size_rng: Xoshiro256PlusPlus::seed_from_u64(0),
            biggest_buf: Vec::new(),
            buf: Vec::new(),
            file_num: 0,
            rq: 0,
            filenum_final: 0,
            rq_final: 0,
            start_time: 0.0,
            end_time: 0.0,
            elapsed: 0.0,
            status: Status::Incomplete,
            rsp,
        }
    }

    /// Narrow this worker to its exclusive subtree
    /// (`.../{host}/thrd_{tid}/...`). Skipped when every worker shares one
    /// tree, in which case filenames alone keep workers apart.
    pub fn apply_worker_subtree(&mut self) {
        if self.params.is_shared_dir {
            return;
        }
        let host = self.host.clone();
        let tid = self.tid.clone();
        for d in self.src_dirs.iter_mut().chain(self.dest_dirs.iter_mut()) {
            *d = d.join(&host).join(format!("thrd_{}", tid));
        }
    }

    fn reset(&mut self) {
        self.file_num = 0;
        self.rq = 0;
        self.filenum_final = 0;
        self.rq_final = 0;
        self.start_time = 0.0;
        self.end_time = 0.0;
        self.elapsed = 0.0;
        self.status = Status::Incomplete;
        self.file_dirs.clear();
        self.rsp = RspTimes::new(
            self.params.measure_response_times,
            self.params.response_time_histogram,
        );
    }

    /// Full pathname of file `index` under `base_dirs`, round-robining over
    /// the top-level trees.
    pub fn file_name(&self, base_dirs: &[PathBuf], index: usize) -> PathBuf {
        let tree = &base_dirs[index % base_dirs.len()];
        let mut path = tree.clone();
        let sub = &self.file_dirs[index];
        if !sub.is_empty() {
            path.push(sub);
        }
        path.push(paths::file_basename(
            &self.params.prefix,
            &self.host,
            &self.tid,
            index,
            &self.params.suffix,
        ));
        path
    }

    /// Effective record size: explicit, else the file size, capped by the
    /// generation buffer.
    pub fn record_size_kb_effective(&self) -> u64 {
        let mut rszkb = self.params.record_size_kb;
        if rszkb == 0 {
            rszkb = self.params.total_size_kb;
        }
        rszkb.min(BIGGEST_BUF_SIZE as u64 / BYTES_PER_KB)
    }

    /// Size in KB of the next file in this worker's sequence.
    pub fn next_file_size_kb(&mut self) -> u64 {
        buffer::next_file_size_kb(
            self.params.size_distribution,
            self.params.total_size_kb,
            &mut self.size_rng,
        )
    }

    /// Slice the per-operation buffer out of the big buffer at this file's
    /// unique offset.
    pub fn prepare_buf(&mut self, file_index: usize) {
        let mut total_space_kb = self.params.record_size_kb;
        if total_space_kb == 0 {
            total_space_kb = match self.params.size_distribution {
                SizeDistribution::Fixed => self.params.total_size_kb,
                SizeDistribution::Exponential => self.params.total_size_kb * RANDOM_SIZE_LIMIT,
            };
        }
        let mut total_space = (total_space_kb * BYTES_PER_KB) as usize;
        if total_space > BIGGEST_BUF_SIZE {
            total_space = BIGGEST_BUF_SIZE;
        }
        // attribute values are drawn from the same buffer
        let total_xattr_space = self.params.xattr_size + self.params.xattr_count;
        if total_xattr_space > total_space {
            total_space = total_xattr_space;
        }
        let offset = buffer::unique_offset(&self.tid, file_index);
        debug_assert!(total_space + offset <= self.biggest_buf.len());
        self.buf.clear();
        self.buf
            .extend_from_slice(&self.biggest_buf[offset..offset + total_space]);
    }

    /// The seed for per-worker file-size sequences is persisted so that
    /// operations after the initial create see the same sizes without a
    /// stat. Writers (create, swift-put) generate and store it; readers
    /// (append, read, swift-get) load it.
    fn init_random_seed(&mut self) -> Result<(), WorkloadError> {
        if self.params.size_distribution == SizeDistribution::Fixed {
            // buffer contents still need a cross-process-stable seed
            self.size_rng = Xoshiro256PlusPlus::seed_from_u64(fnv1a(&self.tid));
            return Ok(());
        }
        let seed_file = sync::thread_seed_file(&self.tid);
        let seed_text = match self.params.operation {
            Operation::Create | Operation::SwiftPut => {
                let text = format!("{} {}", epoch_now(), self.tid);
                sync::ensure_deleted(&seed_file)?;
                std::fs::write(&seed_file, &text)?;
                debug!("wrote seed {}", text);
                text
            }
            Operation::Append | Operation::Read | Operation::SwiftGet => {
                let text = std::fs::read_to_string(&seed_file)?;
                let text = text.lines().next().unwrap_or("").trim().to_string();
                debug!("read seed {}", text);
                text
            }
            _ => format!("{} {}", epoch_now(), self.tid),
        };
        self.size_rng = Xoshiro256PlusPlus::seed_from_u64(fnv1a(&seed_text));
        Ok(())
    }

    pub fn test_ended(&self) -> bool {
        self.end_time > self.start_time
    }

    /// Record the end of this worker's measurement window. The first worker
    /// to finish its whole share erects the stonewall for everyone else.
    pub fn end_test(&mut self) {
        self.rq_final = self.rq;
        self.filenum_final = self.file_num;
        self.end_time = epoch_now();
        if self.file_num >= self.params.iterations && !self.shared.stonewall().exists() {
            match sync::touch(&self.shared.stonewall()) {
                Ok(()) => {
                    info!(
                        "stonewall file written by thread {} on host {}",
                        self.tid, self.host
                    );
                }
                Err(e) => {
                    let errno = e.raw_os_error();
                    // EEXIST is a benign race with a peer; EINVAL shows up on
                    // some network filesystems and is equally ignorable
                    if errno != Some(libc::EEXIST) && errno != Some(libc::EINVAL) {
                        error!("could not create stonewall file: {}", e);
                    } else if errno == Some(libc::EINVAL) {
                        info!("saw EINVAL on stonewall, ignoring it");
                    }
                }
            }
        }
    }

    fn abort_seen(&self) -> bool {
        self.shared.abort_file().exists()
    }

    /// Decide whether to run one more file; returns the index to operate on.
    ///
    /// Stonewall and abort sentinels are only consulted every
    /// `files_between_checks` iterations so sentinel stats do not perturb
    /// the workload being measured.
    pub fn next_file(&mut self) -> Result<Option<usize>, WorkloadError> {
        let at_check = self.file_num as u64 % self.files_between_checks == 0;
        if self.params.stonewall
            && at_check
            && !self.test_ended()
            && self.shared.stonewall().exists()
        {
            info!("stonewalled after {} iterations", self.file_num);
            self.end_test();
        }
        if interrupted() {
            if !self.test_ended() {
                self.end_test();
            }
            return Ok(None);
        }
        if !self.params.finish_all_requests && self.test_ended() {
            return Ok(None);
        }
        if self.file_num >= self.params.iterations {
            if !self.test_ended() {
                self.end_test();
            }
            return Ok(None);
        }
        if at_check && self.abort_seen() {
            return Err(WorkloadError::Abort(self.tid.clone()));
        }
        let index = self.file_num;
        self.file_num += 1;
        if self.params.pause_between_files_us > 0 {
            std::thread::sleep(Duration::from_micros(self.params.pause_between_files_us));
        }
        Ok(Some(index))
    }

    /// Signal readiness and poll for the starting gate.
    fn wait_for_gate(&self) -> Result<(), WorkloadError> {
        let Some(gate) = self.starting_gate.as_ref() else {
            return Ok(());
        };
        sync::touch(&sync::thread_ready_file(&self.tid))?;
        while !gate.exists() {
            if self.abort_seen() {
                return Err(WorkloadError::Abort(self.tid.clone()));
            }
            if interrupted() {
                return Ok(());
            }
            // give other clients time to see that the gate exists
            std::thread::sleep(Duration::from_millis(300));
        }
        Ok(())
    }

    /// Every subdirectory either tree will need, created in advance so tree
    /// construction stays outside the measured window.
    pub fn make_all_subdirs(&self) -> Result<(), WorkloadError> {
        debug!("making all subdirs");
        if self.tid != "00" && self.params.is_shared_dir {
            return Ok(());
        }
        let abort_fn = self.shared.abort_file();
        for dpath in self.unique_subdirs() {
            if abort_fn.exists() {
                break;
            }
            sync::ensure_dir_exists(&dpath)?;
        }
        Ok(())
    }

    /// Distinct parent directories over both trees and all file indexes.
    fn unique_subdirs(&self) -> std::collections::BTreeSet<PathBuf> {
        let mut dirset = std::collections::BTreeSet::new();
        let indexes: Vec<usize> = if self.params.hash_to_dir {
            (0..=self.params.iterations).collect()
        } else {
            (0..self.params.iterations + self.params.files_per_dir)
                .step_by(self.params.files_per_dir)
                .collect()
        };
        for tree in [&self.src_dirs, &self.dest_dirs] {
            for &j in &indexes {
                if let Some(parent) = self.file_name(tree, j).parent() {
                    dirset.insert(parent.to_path_buf());
                }
            }
        }
        dirset
    }

    /// Tear down the directory trees bottom-up, stopping at anything still
    /// populated, busy, or above the tree roots.
    pub fn clean_all_subdirs(&self) -> Result<(), WorkloadError> {
        debug!("cleaning all subdirs");
        if self.tid != "00" && self.params.is_shared_dir {
            return Ok(());
        }
        // tree roots themselves are removed, anything above them is not
        let root_len = self
            .src_dirs[0]
            .as_os_str()
            .len()
            .min(self.dest_dirs[0].as_os_str().len());
        for dpath in self.unique_subdirs() {
            let mut dir = dpath;
            while dir.as_os_str().len() >= root_len {
                if dir.exists() {
                    match std::fs::remove_dir(&dir) {
                        Ok(()) => {}
                        Err(e) => match e.raw_os_error() {
                            Some(libc::ENOTEMPTY) | Some(libc::EACCES) | Some(libc::EBUSY) => {
                                break
                            }
                            Some(libc::ENOENT) => {}
                            _ => {
                                if !self.params.is_shared_dir {
                                    return Err(e.into());
                                }
                            }
                        },
                    }
                }
                match dir.parent() {
                    Some(p) if p.as_os_str().len() >= root_len => dir = p.to_path_buf(),
                    _ => break,
                }
            }
        }
        Ok(())
    }

    /// Run the workload to completion and return the terminal status.
    pub fn run(&mut self) -> Status {
        self.reset();
        let table_len = self.params.iterations + self.params.files_per_dir;
        self.file_dirs.reserve(table_len);
        for j in 0..table_len {
            let sub = if self.params.hash_to_dir {
                paths::hashed_dir_name(
                    j,
                    self.params.iterations,
                    self.params.files_per_dir,
                    self.params.dirs_per_dir,
                )
            } else {
                paths::seq_dir_name(j, self.params.files_per_dir, self.params.dirs_per_dir)
            };
            self.file_dirs.push(sub);
        }
        info!(
            "worker {} on {} starting operation {}",
            self.tid,
            self.host,
            self.params.operation.name()
        );

        self.files_between_checks = if self.params.total_size_kb > 0 {
            u64::max(
                10,
                MAX_FILES_BETWEEN_CHECKS.saturating_sub(self.params.total_size_kb / 100),
            )
        } else {
            20
        };

        let setup = (|| -> Result<(), WorkloadError> {
            sync::ensure_dir_exists(self.shared.path())?;
            if self.params.operation.precreates_dirs() {
                self.make_all_subdirs()?;
            }
            self.init_random_seed()?;
            let mut buf_rng = Xoshiro256PlusPlus::seed_from_u64(fnv1a(&self.tid));
            self.biggest_buf =
                buffer::create_biggest_buf(self.params.incompressible, false, &mut buf_rng);
            Ok(())
        })();
        if let Err(e) = setup {
            error!("worker {} setup failed: {}", self.tid, e);
            self.status = self.status_for(&e);
            return self.status;
        }

        let outcome = (|| -> Result<(), WorkloadError> {
            self.wait_for_gate()?;
            self.start_time = epoch_now();
            self.end_time = 0.0;
            ops::run_op(self)
        })();

        self.status = match outcome {
            Ok(()) => Status::Ok,
            Err(e) => {
                error!("worker {} did not complete cleanly: {}", self.tid, e);
                self.status_for(&e)
            }
        };

        if self.rsp.enabled() && !self.rsp.is_empty() {
            let csv = self.shared.rsptimes_file(
                &self.tid,
                &self.host,
                self.params.operation.name(),
                self.start_time,
            );
            if let Err(e) = self.rsp.save_csv(&csv, self.start_time) {
                error!("could not save response times: {}", e);
            }
            let histo = self.shared.rsptime_histo_file(&self.tid, &self.host);
            if let Err(e) = self.rsp.append_histogram_dump(&histo, &self.tid) {
                error!("could not save latency histogram: {}", e);
            }
        }

        if self.file_num != self.params.iterations {
            info!("recorded throughput after {} files", self.file_num);
        }
        if !self.test_ended() && self.start_time > 0.0 {
            self.end_test();
        }
        self.elapsed = (self.end_time - self.start_time).max(0.0);
        self.status
    }

    fn status_for(&self, e: &WorkloadError) -> Status {
        match e {
            WorkloadError::Io(io_err) => {
                Status::Errno(io_err.raw_os_error().unwrap_or(libc::EIO))
            }
            WorkloadError::TransferMismatch { .. } => Status::Errno(libc::EIO),
            WorkloadError::Verify { .. } => Status::VerifyFailed,
            WorkloadError::Abort(_) => Status::Aborted,
            WorkloadError::Unsupported(_) => Status::Errno(libc::EOPNOTSUPP),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::{Seek, SeekFrom, Write};
    use std::path::Path;

    fn test_invocation(name: &str, dir: &Path) -> Invocation {
        let mut params = WorkloadParams::default();
        params.operation = Operation::Create;
        params.iterations = 50;
        params.files_per_dir = 5;
        params.dirs_per_dir = 2;
        params.total_size_kb = 64;
        params.prefix = "p".to_string();
        params.suffix = "s".to_string();
        params.top_dirs = vec![dir.to_path_buf()];
        let mut inv = Invocation::new(
            params,
            name.to_string(),
            "testhost".to_string(),
            Capabilities::detect(),
        );
        inv.starting_gate = None;
        inv
    }

    fn run_op(inv: &mut Invocation, op: Operation) {
        inv.params.operation = op;
        let status = inv.run();
        assert!(
            status.is_ok(),
            "operation {} failed with {:?}",
            op.name(),
            status
        );
    }

    fn mk_files(inv: &mut Invocation) {
        run_op(inv, Operation::Cleanup);
        run_op(inv, Operation::Create);
        let last = inv.file_name(&inv.src_dirs, inv.params.iterations - 1);
        assert!(last.exists());
        assert_eq!(
            fs::metadata(&last).unwrap().len(),
            inv.params.total_size_kb * BYTES_PER_KB
        );
    }

    #[test]
    fn test_create_population_and_naming() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t01", dir.path());
        mk_files(&mut inv);

        let fn1 = inv.file_name(&inv.src_dirs, 1);
        let expected = inv.src_dirs[0].join("d_000").join("p_testhost_t01_1_s");
        assert_eq!(fn1, expected);
        assert!(fn1.exists());
        assert_eq!(inv.filenum_final, inv.params.iterations);
        assert_eq!(inv.file_num, inv.params.iterations);
    }

    #[test]
    fn test_cleanup_leaves_trees_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t02", dir.path());
        mk_files(&mut inv);
        run_op(&mut inv, Operation::Cleanup);
        for d in inv.src_dirs.iter().chain(inv.dest_dirs.iter()) {
            if d.exists() {
                assert_eq!(fs::read_dir(d).unwrap().count(), 0);
            }
        }
    }

    #[test]
    fn test_mkdir_rmdir() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t03", dir.path());
        run_op(&mut inv, Operation::Cleanup);
        run_op(&mut inv, Operation::Mkdir);
        let mut last = inv
            .file_name(&inv.src_dirs, inv.params.iterations - 1)
            .into_os_string();
        last.push(".d");
        assert!(Path::new(&last).is_dir());
        run_op(&mut inv, Operation::Rmdir);
        assert!(!Path::new(&last).exists());
    }

    #[test]
    fn test_symlink_stat_chmod() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t04", dir.path());
        mk_files(&mut inv);
        run_op(&mut inv, Operation::Symlink);
        let mut link = inv
            .file_name(&inv.dest_dirs, inv.params.iterations - 1)
            .into_os_string();
        link.push(".s");
        assert!(Path::new(&link).exists());
        run_op(&mut inv, Operation::Stat);
        run_op(&mut inv, Operation::Chmod);
    }

    #[test]
    fn test_readdir_and_ls_l() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t05", dir.path());
        mk_files(&mut inv);
        run_op(&mut inv, Operation::Readdir);
        run_op(&mut inv, Operation::LsL);
    }

    #[test]
    fn test_readdir_rejects_hashed_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t06", dir.path());
        inv.params.hash_to_dir = true;
        inv.params.operation = Operation::Readdir;
        let status = inv.run();
        assert!(!status.is_ok());
    }

    #[test]
    fn test_rename_delete_renamed_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t07", dir.path());
        inv.params.measure_response_times = true;
        mk_files(&mut inv);
        run_op(&mut inv, Operation::Rename);
        let renamed = inv.file_name(&inv.dest_dirs, 0);
        assert!(renamed.exists());
        run_op(&mut inv, Operation::DeleteRenamed);
        assert!(!renamed.exists());
        run_op(&mut inv, Operation::Cleanup);
        // response-time CSV landed in the shared directory
        let count = fs::read_dir(inv.shared.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with("rsptimes_")
            })
            .count();
        assert!(count >= 1);
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t08", dir.path());
        mk_files(&mut inv);
        run_op(&mut inv, Operation::Delete);
        assert!(!inv.file_name(&inv.src_dirs, 0).exists());
    }

    #[test]
    fn test_append_grows_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t09", dir.path());
        mk_files(&mut inv);
        let orig_kb = inv.params.total_size_kb;
        inv.params.total_size_kb = orig_kb * 2;
        run_op(&mut inv, Operation::Append);
        let last = inv.file_name(&inv.src_dirs, inv.params.iterations - 1);
        assert_eq!(
            fs::metadata(&last).unwrap().len(),
            3 * orig_kb * BYTES_PER_KB
        );
    }

    #[test]
    fn test_append_record_size_zero_big_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t10", dir.path());
        inv.params.iterations = 5;
        mk_files(&mut inv);
        let orig_kb = inv.params.total_size_kb;
        inv.params.total_size_kb = 2048;
        inv.params.record_size_kb = 0; // record size must not exceed the buffer
        run_op(&mut inv, Operation::Append);
        let last = inv.file_name(&inv.src_dirs, inv.params.iterations - 1);
        assert_eq!(
            fs::metadata(&last).unwrap().len(),
            (orig_kb + 2048) * BYTES_PER_KB
        );
    }

    #[test]
    fn test_read_with_verification() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t11", dir.path());
        inv.params.verify_read = true;
        mk_files(&mut inv);
        run_op(&mut inv, Operation::Read);
        assert_eq!(inv.rq_final, inv.params.iterations as u64);
    }

    #[test]
    fn test_read_record_size_zero_big_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t12", dir.path());
        inv.params.iterations = 5;
        inv.params.total_size_kb = 2048;
        inv.params.record_size_kb = 0;
        mk_files(&mut inv);
        run_op(&mut inv, Operation::Read);
        // 2 MiB files read through a 1 MiB buffer need two records each
        let expected_per_file =
            inv.params.total_size_kb * BYTES_PER_KB / BIGGEST_BUF_SIZE as u64;
        assert_eq!(
            inv.rq_final,
            inv.params.iterations as u64 * expected_per_file
        );
    }

    #[test]
    fn test_read_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t13", dir.path());
        inv.params.iterations = 5;
        inv.params.total_size_kb = 16;
        inv.params.verify_read = true;
        mk_files(&mut inv);

        // corrupt one byte near the front of the last file
        let victim = inv.file_name(&inv.src_dirs, inv.params.iterations - 1);
        let mut f = fs::OpenOptions::new().write(true).open(&victim).unwrap();
        f.seek(SeekFrom::Start(5)).unwrap();
        // 0xFF never occurs in the generated pattern
        f.write_all(&[0xFF]).unwrap();
        drop(f);

        inv.params.operation = Operation::Read;
        let status = inv.run();
        assert_eq!(status, Status::VerifyFailed);
    }

    #[test]
    fn test_overwrite_keeps_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t14", dir.path());
        mk_files(&mut inv);
        run_op(&mut inv, Operation::Overwrite);
        let last = inv.file_name(&inv.src_dirs, inv.params.iterations - 1);
        assert_eq!(
            fs::metadata(&last).unwrap().len(),
            inv.params.total_size_kb * BYTES_PER_KB
        );
    }

    #[test]
    fn test_exponential_create_append_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t15", dir.path());
        inv.params.size_distribution = SizeDistribution::Exponential;
        inv.params.iterations = 40;
        inv.params.record_size_kb = 0;
        inv.params.total_size_kb = 16;
        run_op(&mut inv, Operation::Cleanup);
        run_op(&mut inv, Operation::Create);

        // all sizes within the clamp
        for j in 0..inv.params.iterations {
            let f = inv.file_name(&inv.src_dirs, j);
            let kb = fs::metadata(&f).unwrap().len() / BYTES_PER_KB;
            assert!(
                (1..=16 * RANDOM_SIZE_LIMIT).contains(&kb),
                "file {} has {} KB",
                j,
                kb
            );
        }
        run_op(&mut inv, Operation::Append);
        run_op(&mut inv, Operation::Read);
    }

    #[test]
    fn test_deep_sequential_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t16", dir.path());
        inv.params.total_size_kb = 0;
        inv.params.record_size_kb = 0;
        inv.params.files_per_dir = 10;
        inv.params.dirs_per_dir = 3;
        inv.params.iterations = 200;
        inv.params.prefix = String::new();
        inv.params.suffix = "deep".to_string();
        mk_files_zero_size(&mut inv);
        assert!(inv
            .file_name(&inv.src_dirs, inv.params.iterations - 1)
            .exists());
        run_op(&mut inv, Operation::Cleanup);
    }

    fn mk_files_zero_size(inv: &mut Invocation) {
        run_op(inv, Operation::Cleanup);
        run_op(inv, Operation::Create);
        assert!(inv
            .file_name(&inv.src_dirs, inv.params.iterations - 1)
            .exists());
    }

    #[test]
    fn test_deep_hashed_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("regtest", dir.path());
        inv.params.suffix = "deep_hashed".to_string();
        inv.params.total_size_kb = 0;
        inv.params.record_size_kb = 0;
        inv.params.files_per_dir = 5;
        inv.params.dirs_per_dir = 4;
        inv.params.iterations = 500;
        inv.params.hash_to_dir = true;
        mk_files_zero_size(&mut inv);
        let last = inv.file_name(&inv.src_dirs, 499);
        let expected = inv.src_dirs[0]
            .join("h_001")
            .join("h_000")
            .join("h_001")
            .join("p_testhost_regtest_499_deep_hashed");
        assert_eq!(last, expected);
        assert!(last.exists());
        run_op(&mut inv, Operation::Cleanup);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_xattr_set_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = test_invocation("t17", dir.path());
        inv.params.iterations = 5;
        mk_files(&mut inv);
        inv.params.fsync = true;
        inv.params.xattr_size = 256;
        inv.params.xattr_count = 10;
        inv.params.operation = Operation::Setxattr;
        let status = inv.run();
        if status == Status::Errno(libc::EOPNOTSUPP) {
            return; // filesystem without user xattrs
        }
        assert!(status.is_ok());
        run_op(&mut inv, Operation::Getxattr);
    }

    #[test]
    fn test_stonewall_among_threads() {
        let dir = tempfile::tempdir().unwrap();
        let top = dir.path().to_path_buf();

        let mut base = test_invocation("sw", dir.path());
        base.params.iterations = 400;
        base.params.files_per_dir = 10;
        base.params.dirs_per_dir = 3;
        base.params.total_size_kb = 0;
        base.params.record_size_kb = 0;
        base.params.prefix = "thr".to_string();
        base.params.suffix = "foo".to_string();
        let gate = base.shared.starting_gate();
        sync::ensure_dir_exists(base.shared.path()).unwrap();

        let thread_count = 4;
        let mut handles = Vec::new();
        for j in 0..thread_count {
            let mut params = base.params.clone();
            params.operation = Operation::Create;
            params.top_dirs = vec![top.clone()];
            if j == thread_count - 1 {
                // slow worker: should get stonewalled before finishing
                params.pause_between_files_us = 5_000;
            }
            let tid = format!("sw{:02}", j);
            let gate = gate.clone();
            handles.push(std::thread::spawn(move || {
                let mut inv = Invocation::new(
                    params,
                    tid.clone(),
                    "testhost".to_string(),
                    Capabilities::detect(),
                );
                // per-thread subtree, like the per-host driver arranges
                for d in inv.src_dirs.iter_mut().chain(inv.dest_dirs.iter_mut()) {
                    *d = d.join(format!("thrd_{}", tid));
                }
                inv.starting_gate = Some(gate);
                let status = inv.run();
                (status, inv.filenum_final, inv.elapsed)
            }));
        }

        // let every worker reach the gate, then release it
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let ready = (0..thread_count)
                .all(|j| sync::thread_ready_file(&format!("sw{:02}", j)).exists());
            if ready {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "threads did not reach the gate"
            );
            std::thread::sleep(Duration::from_millis(100));
        }
        sync::touch(&gate).unwrap();

        let mut finals = Vec::new();
        for h in handles {
            let (status, filenum_final, _elapsed) = h.join().unwrap();
            assert!(status.is_ok());
            finals.push(filenum_final);
        }
        for j in 0..thread_count {
            let _ = std::fs::remove_file(sync::thread_ready_file(&format!("sw{:02}", j)));
        }
        // the fast workers finished their share and one of them erected the
        // stonewall; the slow worker stopped short
        assert!(finals[..thread_count - 1].iter().any(|&f| f == 400));
        assert!(
            finals[thread_count - 1] < 400,
            "slow worker was not stonewalled: {:?}",
            finals
        );
    }
}
