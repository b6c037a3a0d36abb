//! Strongest available "data is on media" sync per platform.

use std::fs::File;
use std::io;
use std::path::Path;

/// Flush `file` to persistent storage before returning.
///
/// - Linux: `fdatasync()` (data only, metadata is not needed for log replay)
/// - macOS/iOS: `fcntl(F_FULLFSYNC)`; plain `fsync` stops at the drive cache there
/// - Windows: `FlushFileBuffers()`
/// - Other: `File::sync_data()`
///
/// May block for a long time under heavy I/O; run it off the async scheduler.
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor comes from a live `File` borrow.
        let rc = unsafe { libc::fdatasync(file.as_raw_fd()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor comes from a live `File` borrow.
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::FlushFileBuffers;
        // SAFETY: the handle comes from a live `File` borrow.
        let ok = unsafe { FlushFileBuffers(file.as_raw_handle() as *mut _) };
        if ok != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "ios",
        target_os = "windows"
    )))]
    {
        file.sync_data()
    }
}

/// Persist directory entries (new segment files, a new store directory).
///
/// No-op on Windows, where directories cannot be opened as files.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()
    }

    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_durable_sync_success() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"segment bytes").unwrap();
        let result = durable_sync(file.as_file());
        assert!(result.is_ok(), "durable_sync failed: {:?}", result.err());
    }

    #[test]
    fn test_sync_dir_success() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(sync_dir(dir.path()).is_ok());
    }
}
