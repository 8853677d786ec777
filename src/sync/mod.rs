//! Shared-directory synchronization primitives
//!
//! All cross-process and cross-host coordination happens through files in a
//! shared directory: sentinel files (starting gate, stonewall, abort,
//! host-ready), the serialized parameter snapshot, and the per-host result
//! snapshots. Every file is created by writing to a temporary name and
//! renaming, so a reader that can open the final name always sees complete
//! contents. Deletions tolerate races with peers.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Create an empty file atomically (write temp, rename into place).
///
/// Renaming over an existing sentinel is harmless; the sentinel's meaning is
/// its presence, not its contents.
pub fn touch(path: &Path) -> io::Result<()> {
    write_sync_file(path, "")
}

/// Write a small text file atomically and durably: temp name, flush, fsync,
/// rename into place.
pub fn write_sync_file(path: &Path, contents: &str) -> io::Result<()> {
    let tmp = notyet_name(path);
    {
        let mut f = File::create(&tmp)?;
        f.write_all(contents.as_bytes())?;
        f.flush()?;
        f.sync_all()?; // needed so NFS readers see the data
    }
    fs::rename(&tmp, path)
}

/// Serialize `value` as MessagePack and atomically install it at `path`.
pub fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = rmp_serde::to_vec_named(value).context("serializing snapshot")?;
    let tmp = notyet_name(path);
    {
        let mut f = File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(&bytes)?;
        f.flush()?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("installing {}", path.display()))?;
    Ok(())
}

/// Read a MessagePack snapshot previously written by [`write_snapshot`].
pub fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes =
        fs::read(path).with_context(|| format!("reading snapshot {}", path.display()))?;
    rmp_serde::from_slice(&bytes)
        .with_context(|| format!("decoding snapshot {}", path.display()))
}

fn notyet_name(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".notyet");
    PathBuf::from(name)
}

/// Delete a file if present, tolerating both absence and a concurrent delete
/// by a peer worker.
pub fn ensure_deleted(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            // a peer may have removed it between our check and the error
            if path.symlink_metadata().is_err() {
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}

/// Create a directory and any missing parents, tolerating concurrent
/// creation by peers.
pub fn ensure_dir_exists(path: &Path) -> io::Result<()> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// The shared coordination directory and the well-known file names inside it.
#[derive(Debug, Clone)]
pub struct SharedDir {
    dir: PathBuf,
}

impl SharedDir {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Serialized parameter snapshot, written once by the coordinator.
    pub fn param_file(&self) -> PathBuf {
        self.dir.join("param.msgpack")
    }

    /// Presence means "start now".
    pub fn starting_gate(&self) -> PathBuf {
        self.dir.join("starting_gate.tmp")
    }

    /// Presence means "first worker finished its share; stop measuring".
    pub fn stonewall(&self) -> PathBuf {
        self.dir.join("stonewall.tmp")
    }

    /// Presence means "abandon the test".
    pub fn abort_file(&self) -> PathBuf {
        self.dir.join("abort.tmp")
    }

    /// Created by each host once all its workers are at the gate.
    pub fn host_ready(&self, host: &str) -> PathBuf {
        self.dir.join(format!("host_ready.{}.tmp", host))
    }

    /// Serialized terminal worker-state list for one host.
    pub fn result_file(&self, host: &str) -> PathBuf {
        self.dir.join(format!("{}_result.msgpack", host))
    }

    /// Command drop-file consumed by the remote launch daemon.
    pub fn launch_file(&self, host: &str) -> PathBuf {
        self.dir.join(format!("{}.launch", host))
    }

    /// Response-time CSV for one worker's run.
    pub fn rsptimes_file(&self, tid: &str, host: &str, op: &str, start_time: f64) -> PathBuf {
        self.dir
            .join(format!("rsptimes_{}_{}_{}_{}.csv", tid, host, op, start_time))
    }

    /// Latency histogram dump log for one worker.
    pub fn rsptime_histo_file(&self, tid: &str, host: &str) -> PathBuf {
        self.dir.join(format!("rsptime_histo_{}_{}.log", tid, host))
    }

    /// Remove every sentinel and result left over from a previous run.
    pub fn clean_sentinels(&self, host_set: &[String]) -> io::Result<()> {
        ensure_deleted(&self.starting_gate())?;
        ensure_deleted(&self.stonewall())?;
        ensure_deleted(&self.abort_file())?;
        for h in host_set {
            ensure_deleted(&self.host_ready(h))?;
            ensure_deleted(&self.result_file(h))?;
            ensure_deleted(&self.launch_file(h))?;
        }
        Ok(())
    }
}

/// Per-worker readiness sentinel, local to the host.
pub fn thread_ready_file(tid: &str) -> PathBuf {
    std::env::temp_dir().join(format!("thread_ready.{}.tmp", tid))
}

/// One-line seed file shared between the writing op (create, swift-put) and
/// later readers (append, read, swift-get).
pub fn thread_seed_file(tid: &str) -> PathBuf {
    std::env::temp_dir().join(format!("thread_ready.{}.tmp.seed", tid))
}

/// Recreate the shared coordination directory and the src/dest trees for a
/// fresh run. With remote hosts involved, pauses are inserted so network
/// filesystems with attribute caching observe the recreation.
pub fn create_top_dirs(
    shared: &SharedDir,
    src_dirs: &[PathBuf],
    dest_dirs: &[PathBuf],
    multi_host: bool,
) -> io::Result<()> {
    if shared.path().exists() {
        fs::remove_dir_all(shared.path())?;
        if multi_host {
            std::thread::sleep(Duration::from_millis(2100));
        }
    }
    ensure_dir_exists(shared.path())?;
    for d in src_dirs.iter().chain(dest_dirs.iter()) {
        ensure_dir_exists(d)?;
    }
    if multi_host {
        // a directory listing plus a pause lets actimeo-style caches expire
        let _ = fs::read_dir(shared.path())?.count();
        std::thread::sleep(Duration::from_millis(1100));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        name: String,
        count: u64,
    }

    #[test]
    fn test_touch_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("gate.tmp");
        touch(&p).unwrap();
        assert!(p.exists());
        assert_eq!(fs::metadata(&p).unwrap().len(), 0);
        // no temp residue
        assert!(!dir.path().join("gate.tmp.notyet").exists());
    }

    #[test]
    fn test_touch_twice_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("gate.tmp");
        touch(&p).unwrap();
        touch(&p).unwrap();
        assert!(p.exists());
    }

    #[test]
    fn test_write_sync_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("note");
        write_sync_file(&p, "hi there").unwrap();
        assert_eq!(fs::read_to_string(&p).unwrap(), "hi there");
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("snap.msgpack");
        let v = Sample {
            name: "w00".into(),
            count: 42,
        };
        write_snapshot(&p, &v).unwrap();
        let back: Sample = read_snapshot(&p).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_ensure_deleted_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("victim");
        touch(&p).unwrap();
        ensure_deleted(&p).unwrap();
        assert!(!p.exists());
        ensure_deleted(&p).unwrap(); // second call is a no-op
    }

    #[test]
    fn test_ensure_dir_exists_nested_and_repeated() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a/b/c");
        ensure_dir_exists(&p).unwrap();
        assert!(p.is_dir());
        ensure_dir_exists(&p).unwrap();
    }

    #[test]
    fn test_shared_dir_names() {
        let s = SharedDir::new(PathBuf::from("/shared/net"));
        assert_eq!(s.param_file(), PathBuf::from("/shared/net/param.msgpack"));
        assert_eq!(
            s.starting_gate(),
            PathBuf::from("/shared/net/starting_gate.tmp")
        );
        assert_eq!(s.stonewall(), PathBuf::from("/shared/net/stonewall.tmp"));
        assert_eq!(s.abort_file(), PathBuf::from("/shared/net/abort.tmp"));
        assert_eq!(
            s.host_ready("node1"),
            PathBuf::from("/shared/net/host_ready.node1.tmp")
        );
        assert_eq!(
            s.result_file("node1"),
            PathBuf::from("/shared/net/node1_result.msgpack")
        );
        assert_eq!(
            s.launch_file("node1"),
            PathBuf::from("/shared/net/node1.launch")
        );
    }

    #[test]
    fn test_clean_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let s = SharedDir::new(dir.path().to_path_buf());
        touch(&s.starting_gate()).unwrap();
        touch(&s.stonewall()).unwrap();
        touch(&s.host_ready("h1")).unwrap();
        s.clean_sentinels(&["h1".to_string()]).unwrap();
        assert!(!s.starting_gate().exists());
        assert!(!s.stonewall().exists());
        assert!(!s.host_ready("h1").exists());
    }

    #[test]
    fn test_create_top_dirs_recreates() {
        let dir = tempfile::tempdir().unwrap();
        let net = dir.path().join("network_shared");
        let s = SharedDir::new(net.clone());
        let src = vec![dir.path().join("file_srcdir")];
        let dest = vec![dir.path().join("file_dstdir")];

        create_top_dirs(&s, &src, &dest, false).unwrap();
        assert!(net.is_dir());
        assert!(src[0].is_dir());
        assert!(dest[0].is_dir());

        // stale sentinel disappears on recreation
        touch(&s.abort_file()).unwrap();
        create_top_dirs(&s, &src, &dest, false).unwrap();
        assert!(!s.abort_file().exists());
    }
}
