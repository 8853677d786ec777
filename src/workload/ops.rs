//! The operation implementations
//!
//! One function per workload operation, each a loop over the file indexes
//! handed out by [`Invocation::next_file`]. Every measured section sits
//! between `op_start` and `op_end`, so the response-time samples cover the
//! syscalls and nothing else.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;

use crate::config::Operation;
use crate::sync::ensure_deleted;
use crate::util::osio;
use crate::util::time::epoch_now;

use super::{Invocation, WorkloadError, BYTES_PER_KB};

/// Attribute name for the j'th per-file extended attribute.
fn xattr_name(j: usize) -> String {
    format!("user.metapulse-{}", j)
}

/// Attribute name used by the object-store style operations.
fn swift_xattr_name(j: usize) -> String {
    format!("user.metapulse-all-{}", j)
}

/// Attribute carrying `"<creation-epoch>,<size-kb>"` for replication waits.
pub const CTIME_SIZE_XATTR: &str = "user.metapulse-ctime-size";

/// Polling period for the replication-wait operation.
const AWAIT_POLL: Duration = Duration::from_secs(1);

/// Dispatch to the operation selected in the parameters.
pub fn run_op(inv: &mut Invocation) -> Result<(), WorkloadError> {
    match inv.params.operation {
        Operation::Create => do_create(inv),
        Operation::Append => do_append(inv),
        Operation::Overwrite => do_overwrite(inv),
        Operation::Read => do_read(inv),
        Operation::Readdir => do_readdir(inv),
        Operation::LsL => do_ls_l(inv),
        Operation::Stat => do_stat(inv),
        Operation::Chmod => do_chmod(inv),
        Operation::Symlink => do_symlink(inv),
        Operation::Delete => do_delete(inv),
        Operation::DeleteRenamed => do_delete_renamed(inv),
        Operation::Rename => do_rename(inv),
        Operation::Mkdir => do_mkdir(inv),
        Operation::Rmdir => do_rmdir(inv),
        Operation::Setxattr => do_setxattr(inv),
        Operation::Getxattr => do_getxattr(inv),
        Operation::SwiftPut => do_swift_put(inv),
        Operation::SwiftGet => do_swift_get(inv),
        Operation::AwaitCreate => do_await_create(inv),
        Operation::Cleanup => do_cleanup(inv),
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Write `size_kb` of generated data through `f` in record-size chunks.
fn write_records(
    inv: &mut Invocation,
    f: &mut File,
    size_kb: u64,
    op: &'static str,
) -> Result<(), WorkloadError> {
    let rszkb = inv.record_size_kb_effective();
    let mut remaining_kb = size_kb;
    while remaining_kb > 0 {
        let this_kb = remaining_kb.min(rszkb);
        let rszbytes = (this_kb * BYTES_PER_KB) as usize;
        let written = f.write(&inv.buf[..rszbytes])?;
        inv.rq += 1;
        if written != rszbytes {
            return Err(WorkloadError::TransferMismatch {
                op,
                file_num: inv.file_num,
                rq: inv.rq,
                byte_count: written,
            });
        }
        remaining_kb -= this_kb;
    }
    Ok(())
}

/// Read `size_kb` from `f` in record-size chunks, verifying against the
/// generator buffer when requested.
fn read_records(
    inv: &mut Invocation,
    f: &mut File,
    size_kb: u64,
    op: &'static str,
) -> Result<(), WorkloadError> {
    let rszkb = inv.record_size_kb_effective();
    let mut chunk = vec![0u8; (rszkb.min(size_kb) * BYTES_PER_KB) as usize];
    let mut remaining_kb = size_kb;
    while remaining_kb > 0 {
        let this_kb = remaining_kb.min(rszkb);
        let rszbytes = (this_kb * BYTES_PER_KB) as usize;
        let got = f.read(&mut chunk[..rszbytes])?;
        inv.rq += 1;
        if got != rszbytes {
            return Err(WorkloadError::TransferMismatch {
                op,
                file_num: inv.file_num,
                rq: inv.rq,
                byte_count: got,
            });
        }
        if inv.params.verify_read && chunk[..rszbytes] != inv.buf[..rszbytes] {
            let bad = chunk[..rszbytes]
                .iter()
                .zip(inv.buf[..rszbytes].iter())
                .position(|(a, b)| a != b)
                .unwrap_or(0);
            return Err(WorkloadError::Verify {
                op,
                file_num: inv.file_num,
                detail: format!("buffer contents wrong at byte {}", bad),
            });
        }
        remaining_kb -= this_kb;
    }
    Ok(())
}

fn do_create(inv: &mut Invocation) -> Result<(), WorkloadError> {
    while let Some(idx) = inv.next_file()? {
        let fnm = inv.file_name(&inv.src_dirs, idx);
        inv.rsp.op_start();
        let opened = OpenOptions::new().write(true).create_new(true).open(&fnm);
        let mut f = match opened {
            Ok(f) => f,
            Err(e)
                if e.raw_os_error() == Some(libc::ENOENT) && inv.params.dirs_on_demand =>
            {
                // build the missing directory lazily and retry this index;
                // the size sequence must not advance on the failed attempt
                if let Some(parent) = fnm.parent() {
                    fs::create_dir_all(parent)?;
                }
                inv.file_num -= 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let size_kb = inv.next_file_size_kb();
        inv.prepare_buf(idx);
        write_records(inv, &mut f, size_kb, "create")?;
        if inv.params.fsync {
            f.sync_all()?;
        }
        if inv.params.record_ctime_size {
            if !inv.caps.can_xattr {
                return Err(WorkloadError::Unsupported(
                    "recording ctime-size requires extended attribute support".to_string(),
                ));
            }
            let value = format!("{},{}", epoch_now(), size_kb);
            osio::fset_xattr(f.as_raw_fd(), CTIME_SIZE_XATTR, value.as_bytes())?;
        }
        drop(f);
        inv.rsp.op_end("create");
    }
    Ok(())
}

fn do_append(inv: &mut Invocation) -> Result<(), WorkloadError> {
    while let Some(idx) = inv.next_file()? {
        let fnm = inv.file_name(&inv.src_dirs, idx);
        inv.rsp.op_start();
        // explicit seek-to-end, not O_APPEND, which has different semantics
        let mut f = OpenOptions::new().write(true).open(&fnm)?;
        f.seek(SeekFrom::End(0))?;
        let size_kb = inv.next_file_size_kb();
        inv.prepare_buf(idx);
        write_records(inv, &mut f, size_kb, "append")?;
        if inv.params.fsync {
            f.sync_all()?;
        }
        drop(f);
        inv.rsp.op_end("append");
    }
    Ok(())
}

fn do_overwrite(inv: &mut Invocation) -> Result<(), WorkloadError> {
    while let Some(idx) = inv.next_file()? {
        let fnm = inv.file_name(&inv.src_dirs, idx);
        inv.rsp.op_start();
        let mut f = OpenOptions::new().write(true).open(&fnm)?;
        let size_kb = inv.next_file_size_kb();
        inv.prepare_buf(idx);
        write_records(inv, &mut f, size_kb, "overwrite")?;
        if inv.params.fsync {
            f.sync_all()?;
        }
        drop(f);
        inv.rsp.op_end("overwrite");
    }
    Ok(())
}

fn do_read(inv: &mut Invocation) -> Result<(), WorkloadError> {
    while let Some(idx) = inv.next_file()? {
        let fnm = inv.file_name(&inv.src_dirs, idx);
        inv.rsp.op_start();
        let size_kb = inv.next_file_size_kb();
        let mut f = File::open(&fnm)?;
        inv.prepare_buf(idx);
        read_records(inv, &mut f, size_kb, "read")?;
        drop(f);
        inv.rsp.op_end("read");
    }
    Ok(())
}

fn do_readdir(inv: &mut Invocation) -> Result<(), WorkloadError> {
    if inv.params.hash_to_dir {
        return Err(WorkloadError::Unsupported(
            "readdir cannot run with hashed directory placement".to_string(),
        ));
    }
    let mut prev_dir = PathBuf::new();
    let mut dir_map: HashSet<OsString> = HashSet::new();
    let mut file_count = 0usize;
    while let Some(idx) = inv.next_file()? {
        let fnm = inv.file_name(&inv.src_dirs, idx);
        let dir = fnm.parent().unwrap_or(Path::new("/")).to_path_buf();
        if dir != prev_dir {
            if file_count != dir_map.len() {
                return Err(WorkloadError::Verify {
                    op: "readdir",
                    file_num: idx,
                    detail: format!(
                        "not all files in directory {} were found",
                        prev_dir.display()
                    ),
                });
            }
            inv.rsp.op_start();
            let entries = fs::read_dir(&dir)?;
            dir_map.clear();
            for entry in entries {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    dir_map.insert(entry.file_name());
                }
            }
            inv.rsp.op_end("readdir");
            prev_dir = dir;
            file_count = 0;
        }
        file_count += 1;
        let base = fnm.file_name().unwrap_or_default();
        if !dir_map.contains(base) {
            return Err(WorkloadError::Verify {
                op: "readdir",
                file_num: idx,
                detail: format!(
                    "file {} missing from directory {}",
                    fnm.display(),
                    prev_dir.display()
                ),
            });
        }
    }
    Ok(())
}

/// "ls -lR" style walk: one listing per directory, one stat per file, with
/// separate timings for the two phases.
fn do_ls_l(inv: &mut Invocation) -> Result<(), WorkloadError> {
    if inv.params.hash_to_dir {
        return Err(WorkloadError::Unsupported(
            "ls-l cannot run with hashed directory placement".to_string(),
        ));
    }
    let mut prev_dir = PathBuf::new();
    while let Some(idx) = inv.next_file()? {
        let fnm = inv.file_name(&inv.src_dirs, idx);
        let dir = fnm.parent().unwrap_or(Path::new("/")).to_path_buf();
        if dir != prev_dir {
            inv.rsp.op_start();
            let _entries: Vec<_> = fs::read_dir(&dir)?.collect::<Result<_, _>>()?;
            inv.rsp.op_end("ls-l-readdir");
            prev_dir = dir;
        }
        inv.rsp.op_start();
        fs::metadata(&fnm)?;
        inv.rsp.op_end("ls-l-stat");
    }
    Ok(())
}

fn do_stat(inv: &mut Invocation) -> Result<(), WorkloadError> {
    while let Some(idx) = inv.next_file()? {
        let fnm = inv.file_name(&inv.src_dirs, idx);
        inv.rsp.op_start();
        fs::metadata(&fnm)?;
        inv.rsp.op_end("stat");
    }
    Ok(())
}

fn do_chmod(inv: &mut Invocation) -> Result<(), WorkloadError> {
    while let Some(idx) = inv.next_file()? {
        let fnm = inv.file_name(&inv.src_dirs, idx);
        inv.rsp.op_start();
        fs::set_permissions(&fnm, fs::Permissions::from_mode(0o646))?;
        inv.rsp.op_end("chmod");
    }
    Ok(())
}

fn do_symlink(inv: &mut Invocation) -> Result<(), WorkloadError> {
    while let Some(idx) = inv.next_file()? {
        let target = inv.file_name(&inv.src_dirs, idx);
        let link = with_suffix(&inv.file_name(&inv.dest_dirs, idx), ".s");
        inv.rsp.op_start();
        std::os::unix::fs::symlink(&target, &link)?;
        inv.rsp.op_end("symlink");
    }
    Ok(())
}

fn do_delete(inv: &mut Invocation) -> Result<(), WorkloadError> {
    while let Some(idx) = inv.next_file()? {
        let fnm = inv.file_name(&inv.src_dirs, idx);
        inv.rsp.op_start();
        fs::remove_file(&fnm)?;
        inv.rsp.op_end("delete");
    }
    Ok(())
}

fn do_rename(inv: &mut Invocation) -> Result<(), WorkloadError> {
    let in_same_dir = inv.dest_dirs == inv.src_dirs;
    while let Some(idx) = inv.next_file()? {
        let from = inv.file_name(&inv.src_dirs, idx);
        let mut to = inv.file_name(&inv.dest_dirs, idx);
        if in_same_dir {
            to = with_suffix(&to, ".rnm");
        }
        inv.rsp.op_start();
        fs::rename(&from, &to)?;
        inv.rsp.op_end("rename");
    }
    Ok(())
}

fn do_delete_renamed(inv: &mut Invocation) -> Result<(), WorkloadError> {
    let in_same_dir = inv.dest_dirs == inv.src_dirs;
    while let Some(idx) = inv.next_file()? {
        let mut fnm = inv.file_name(&inv.dest_dirs, idx);
        if in_same_dir {
            fnm = with_suffix(&fnm, ".rnm");
        }
        inv.rsp.op_start();
        fs::remove_file(&fnm)?;
        inv.rsp.op_end("delete-renamed");
    }
    Ok(())
}

fn do_mkdir(inv: &mut Invocation) -> Result<(), WorkloadError> {
    while let Some(idx) = inv.next_file()? {
        let dir = with_suffix(&inv.file_name(&inv.src_dirs, idx), ".d");
        inv.rsp.op_start();
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e)
                if e.raw_os_error() == Some(libc::ENOENT) && inv.params.dirs_on_demand =>
            {
                if let Some(parent) = dir.parent() {
                    fs::create_dir_all(parent)?;
                }
                inv.file_num -= 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        }
        inv.rsp.op_end("mkdir");
    }
    Ok(())
}

fn do_rmdir(inv: &mut Invocation) -> Result<(), WorkloadError> {
    while let Some(idx) = inv.next_file()? {
        let dir = with_suffix(&inv.file_name(&inv.src_dirs, idx), ".d");
        inv.rsp.op_start();
        fs::remove_dir(&dir)?;
        inv.rsp.op_end("rmdir");
    }
    Ok(())
}

fn do_setxattr(inv: &mut Invocation) -> Result<(), WorkloadError> {
    if !inv.caps.can_xattr {
        return Err(WorkloadError::Unsupported(
            "setxattr requires extended attribute support".to_string(),
        ));
    }
    while let Some(idx) = inv.next_file()? {
        let fnm = inv.file_name(&inv.src_dirs, idx);
        inv.prepare_buf(idx);
        inv.rsp.op_start();
        let f = OpenOptions::new().write(true).open(&fnm)?;
        for j in 0..inv.params.xattr_count {
            // each attribute gets a distinct window into the buffer
            let value = &inv.buf[j..j + inv.params.xattr_size];
            osio::fset_xattr(f.as_raw_fd(), &xattr_name(j), value)?;
        }
        if inv.params.fsync {
            // fsync flushes attribute values along with data and metadata
            f.sync_all()?;
        }
        drop(f);
        inv.rsp.op_end("setxattr");
    }
    Ok(())
}

fn do_getxattr(inv: &mut Invocation) -> Result<(), WorkloadError> {
    if !inv.caps.can_xattr {
        return Err(WorkloadError::Unsupported(
            "getxattr requires extended attribute support".to_string(),
        ));
    }
    while let Some(idx) = inv.next_file()? {
        let fnm = inv.file_name(&inv.src_dirs, idx);
        inv.rsp.op_start();
        inv.prepare_buf(idx);
        for j in 0..inv.params.xattr_count {
            let v = osio::get_xattr(
                &fnm,
                &xattr_name(j),
                inv.params.xattr_size + inv.params.xattr_count,
            )?;
            if v[..] != inv.buf[j..j + inv.params.xattr_size] {
                return Err(WorkloadError::Verify {
                    op: "getxattr",
                    file_num: idx,
                    detail: format!("attribute {} contents wrong", j),
                });
            }
        }
        inv.rsp.op_end("getxattr");
    }
    Ok(())
}

/// Object-store style PUT: write to a temp name with preallocation, attach
/// attributes, flush, drop the page cache, then rename into place.
fn do_swift_put(inv: &mut Invocation) -> Result<(), WorkloadError> {
    if !inv.caps.can_xattr || !inv.caps.can_fallocate || !inv.caps.can_fadvise {
        return Err(WorkloadError::Unsupported(
            "swift-put requires xattr, fallocate and fadvise support".to_string(),
        ));
    }
    while let Some(idx) = inv.next_file()? {
        let final_name = inv.file_name(&inv.src_dirs, idx);
        let tmp_name = with_suffix(&final_name, ".tmp");
        let size_kb = inv.next_file_size_kb();
        inv.prepare_buf(idx);
        inv.rsp.op_start();
        let result = swift_put_one(inv, &tmp_name, &final_name, size_kb);
        if result.is_err() {
            ensure_deleted(&tmp_name)?;
            return result;
        }
        inv.rq += 1;
        inv.rsp.op_end("swift-put");
    }
    Ok(())
}

fn swift_put_one(
    inv: &mut Invocation,
    tmp_name: &Path,
    final_name: &Path,
    size_kb: u64,
) -> Result<(), WorkloadError> {
    let mut f = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(tmp_name)?;
    f.set_permissions(fs::Permissions::from_mode(0o667))?;
    let size_bytes = size_kb * BYTES_PER_KB;
    if size_bytes > 0 {
        osio::fallocate(f.as_raw_fd(), size_bytes)?;
    }

    let mut rszkb = inv.params.record_size_kb;
    if rszkb == 0 {
        rszkb = size_kb;
    }
    rszkb = rszkb.min(inv.buf.len() as u64 / BYTES_PER_KB).max(1);
    let mut remaining_kb = size_kb;
    while remaining_kb > 0 {
        let this_kb = remaining_kb.min(rszkb);
        let rszbytes = (this_kb * BYTES_PER_KB) as usize;
        debug!("swift-put writing {} bytes", rszbytes);
        let written = f.write(&inv.buf[..rszbytes])?;
        if written != rszbytes {
            return Err(WorkloadError::TransferMismatch {
                op: "swift-put",
                file_num: inv.file_num,
                rq: inv.rq,
                byte_count: written,
            });
        }
        remaining_kb -= this_kb;
    }

    for j in 0..inv.params.xattr_count {
        let value = &inv.buf[j..j + inv.params.xattr_size];
        osio::fset_xattr(f.as_raw_fd(), &swift_xattr_name(j), value)?;
    }
    if inv.params.fsync {
        // one fsync flushes data and attributes together
        f.sync_all()?;
    }
    // this data will not be read back soon
    osio::drop_buffer_cache(f.as_raw_fd(), 0, size_bytes)?;
    drop(f);
    fs::rename(tmp_name, final_name)?;
    Ok(())
}

/// Object-store style GET: full verified read followed by attribute reads.
fn do_swift_get(inv: &mut Invocation) -> Result<(), WorkloadError> {
    if !inv.caps.can_xattr {
        return Err(WorkloadError::Unsupported(
            "swift-get requires extended attribute support".to_string(),
        ));
    }
    while let Some(idx) = inv.next_file()? {
        let fnm = inv.file_name(&inv.src_dirs, idx);
        let size_kb = inv.next_file_size_kb();
        inv.rsp.op_start();
        let mut f = File::open(&fnm)?;
        inv.prepare_buf(idx);
        read_records(inv, &mut f, size_kb, "swift-get")?;
        for j in 0..inv.params.xattr_count {
            match osio::fget_xattr(
                f.as_raw_fd(),
                &swift_xattr_name(j),
                inv.params.xattr_size + inv.params.xattr_count,
            ) {
                Ok(_) => {}
                // the attribute may not have been written (no-fsync crash)
                Err(e) if e.raw_os_error() == Some(libc::ENODATA) => {}
                Err(e) => return Err(e.into()),
            }
        }
        drop(f);
        inv.rsp.op_end("swift-get");
    }
    Ok(())
}

/// Wait for files produced by another site to replicate here: poll for the
/// file, read its recorded creation time and size, and measure how long the
/// full contents took to arrive, counted from the original creation.
fn do_await_create(inv: &mut Invocation) -> Result<(), WorkloadError> {
    if !inv.caps.can_xattr {
        return Err(WorkloadError::Unsupported(
            "await-create requires extended attribute support".to_string(),
        ));
    }
    while let Some(idx) = inv.next_file()? {
        let fnm = inv.file_name(&inv.src_dirs, idx);
        debug!("awaiting file {}", fnm.display());
        while !fnm.exists() {
            inv.check_abort()?;
            std::thread::sleep(AWAIT_POLL);
        }
        let (original_ctime, size_kb) = loop {
            match osio::get_xattr(&fnm, CTIME_SIZE_XATTR, 64) {
                Ok(v) => {
                    let text = String::from_utf8_lossy(&v);
                    let mut parts = text.trim().splitn(2, ',');
                    let ctime: f64 = parts
                        .next()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| WorkloadError::Verify {
                            op: "await-create",
                            file_num: idx,
                            detail: format!("malformed ctime-size attribute: {}", text),
                        })?;
                    let size_kb: u64 = parts
                        .next()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| WorkloadError::Verify {
                            op: "await-create",
                            file_num: idx,
                            detail: format!("malformed ctime-size attribute: {}", text),
                        })?;
                    break (ctime, size_kb);
                }
                Err(e) if e.raw_os_error() == Some(libc::ENODATA) => {
                    inv.check_abort()?;
                    std::thread::sleep(AWAIT_POLL);
                }
                Err(e) => return Err(e.into()),
            }
        };
        loop {
            let len = fs::metadata(&fnm)?.len();
            if len >= size_kb * BYTES_PER_KB {
                break;
            }
            inv.check_abort()?;
            std::thread::sleep(AWAIT_POLL);
        }
        // the interval starts at the remote creation, not at our poll
        inv.rsp
            .record("await-create", original_ctime, epoch_now() - original_ctime);
    }
    Ok(())
}

/// Remove every artifact a previous operation may have left on this
/// worker's subtree, then tear the tree down. Runs to completion regardless
/// of stonewall state.
fn do_cleanup(inv: &mut Invocation) -> Result<(), WorkloadError> {
    let saved_stonewall = inv.params.stonewall;
    let saved_finish = inv.params.finish_all_requests;
    inv.params.stonewall = false;
    inv.params.finish_all_requests = true;

    let result = (|| -> Result<(), WorkloadError> {
        while let Some(idx) = inv.next_file()? {
            let src = inv.file_name(&inv.src_dirs, idx);
            let dest = inv.file_name(&inv.dest_dirs, idx);
            ensure_deleted(&with_suffix(&dest, ".s"))?;
            ensure_deleted(&src)?;
            ensure_deleted(&with_suffix(&src, ".rnm"))?;
            ensure_deleted(&with_suffix(&src, ".tmp"))?;
            ensure_deleted(&dest)?;
            ensure_deleted(&with_suffix(&dest, ".rnm"))?;
            let dir = with_suffix(&src, ".d");
            if dir.exists() {
                fs::remove_dir(&dir)?;
            }
        }
        inv.clean_all_subdirs()
    })();

    inv.params.stonewall = saved_stonewall;
    inv.params.finish_all_requests = saved_finish;
    result
}

impl Invocation {
    /// Abort-file check usable inside the poll loops of long-waiting ops.
    pub(crate) fn check_abort(&self) -> Result<(), WorkloadError> {
        if self.shared.abort_file().exists() {
            return Err(WorkloadError::Abort(self.tid.clone()));
        }
        Ok(())
    }
}
