//! Platform capability detection
//!
//! Optional kernel features (extended attributes, `posix_fadvise`,
//! `fallocate`) are probed once at process start and handed to the workload
//! engine as an explicit capability set. Operations that depend on a missing
//! capability refuse to run instead of silently degrading.

/// Optional platform features available to the workload engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// setxattr/getxattr family available
    pub can_xattr: bool,
    /// posix_fadvise(POSIX_FADV_DONTNEED) available
    pub can_fadvise: bool,
    /// fallocate() available
    pub can_fallocate: bool,
}

impl Capabilities {
    /// Probe the running platform.
    pub fn detect() -> Self {
        #[cfg(target_os = "linux")]
        {
            Self {
                can_xattr: true,
                can_fadvise: true,
                can_fallocate: true,
            }
        }
        #[cfg(all(unix, not(target_os = "linux")))]
        {
            // macOS and the BSDs have xattrs but not Linux fallocate; fadvise
            // is absent on macOS.
            Self {
                can_xattr: true,
                can_fadvise: false,
                can_fallocate: false,
            }
        }
        #[cfg(not(unix))]
        {
            Self::none()
        }
    }

    /// A capability set with everything disabled (used in tests).
    pub fn none() -> Self {
        Self {
            can_xattr: false,
            can_fadvise: false,
            can_fallocate: false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::detect()
    }
}
