//! Thin libc wrappers for syscalls std does not expose
//!
//! Extended attributes, `fallocate` preallocation, and the
//! `posix_fadvise(POSIX_FADV_DONTNEED)` page-cache drop hint. All wrappers
//! return `io::Result` with the raw OS errno preserved so callers can make
//! per-errno decisions (e.g. tolerating ENODATA on attribute reads).

#[cfg(target_os = "linux")]
use std::ffi::CString;
use std::io;
#[cfg(target_os = "linux")]
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

#[cfg(target_os = "linux")]
fn cstr_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))
}

#[cfg(target_os = "linux")]
fn cstr_name(name: &str) -> io::Result<CString> {
    CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "attribute name contains NUL"))
}

/// Set an extended attribute by path.
#[cfg(target_os = "linux")]
pub fn set_xattr(path: &Path, name: &str, value: &[u8]) -> io::Result<()> {
    let p = cstr_path(path)?;
    let n = cstr_name(name)?;
    let rc = unsafe {
        libc::setxattr(
            p.as_ptr(),
            n.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Get an extended attribute by path. `max_len` bounds the returned value.
#[cfg(target_os = "linux")]
pub fn get_xattr(path: &Path, name: &str, max_len: usize) -> io::Result<Vec<u8>> {
    let p = cstr_path(path)?;
    let n = cstr_name(name)?;
    let mut buf = vec![0u8; max_len];
    let rc = unsafe {
        libc::getxattr(
            p.as_ptr(),
            n.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    buf.truncate(rc as usize);
    Ok(buf)
}

/// Set an extended attribute on an open file descriptor.
#[cfg(target_os = "linux")]
pub fn fset_xattr(fd: RawFd, name: &str, value: &[u8]) -> io::Result<()> {
    let n = cstr_name(name)?;
    let rc = unsafe {
        libc::fsetxattr(
            fd,
            n.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Get an extended attribute from an open file descriptor.
#[cfg(target_os = "linux")]
pub fn fget_xattr(fd: RawFd, name: &str, max_len: usize) -> io::Result<Vec<u8>> {
    let n = cstr_name(name)?;
    let mut buf = vec![0u8; max_len];
    let rc = unsafe {
        libc::fgetxattr(fd, n.as_ptr(), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    buf.truncate(rc as usize);
    Ok(buf)
}

/// Reserve space for `len` bytes starting at offset 0 (extending the file
/// size, i.e. mode 0).
#[cfg(target_os = "linux")]
pub fn fallocate(fd: RawFd, len: u64) -> io::Result<()> {
    let rc = unsafe { libc::fallocate(fd, 0, 0, len as libc::off_t) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Drop the page cache for the given range of an open file.
#[cfg(target_os = "linux")]
pub fn drop_buffer_cache(fd: RawFd, offset: u64, len: u64) -> io::Result<()> {
    // posix_fadvise returns the error number directly instead of setting errno
    let rc = unsafe {
        libc::posix_fadvise(
            fd,
            offset as libc::off_t,
            len as libc::off_t,
            libc::POSIX_FADV_DONTNEED,
        )
    };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
mod unsupported {
    use super::*;

    fn unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "not available on this platform")
    }

    pub fn set_xattr(_path: &Path, _name: &str, _value: &[u8]) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn get_xattr(_path: &Path, _name: &str, _max_len: usize) -> io::Result<Vec<u8>> {
        Err(unsupported())
    }

    pub fn fset_xattr(_fd: RawFd, _name: &str, _value: &[u8]) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn fget_xattr(_fd: RawFd, _name: &str, _max_len: usize) -> io::Result<Vec<u8>> {
        Err(unsupported())
    }

    pub fn fallocate(_fd: RawFd, _len: u64) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn drop_buffer_cache(_fd: RawFd, _offset: u64, _len: u64) -> io::Result<()> {
        Err(unsupported())
    }
}

#[cfg(not(target_os = "linux"))]
pub use unsupported::*;

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_xattr_roundtrip_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attrfile");
        File::create(&path).unwrap();

        // tmpfs or restricted filesystems may reject user xattrs; skip there
        if set_xattr(&path, "user.metapulse-test", b"hello").is_err() {
            return;
        }
        let v = get_xattr(&path, "user.metapulse-test", 64).unwrap();
        assert_eq!(v, b"hello");
    }

    #[test]
    fn test_get_missing_xattr_is_enodata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare");
        File::create(&path).unwrap();

        let err = get_xattr(&path, "user.metapulse-absent", 64).unwrap_err();
        let errno = err.raw_os_error().unwrap();
        // ENOTSUP on filesystems without xattr support, ENODATA otherwise
        assert!(errno == libc::ENODATA || errno == libc::ENOTSUP);
    }

    #[test]
    fn test_fallocate_extends_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prealloc");
        let f = File::create(&path).unwrap();
        if fallocate(f.as_raw_fd(), 4096).is_err() {
            return; // filesystem without fallocate support
        }
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn test_drop_buffer_cache_ok_on_written_file() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cached");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"hi there").unwrap();
        drop_buffer_cache(f.as_raw_fd(), 0, 8).unwrap();
    }
}
