// AXON shared memory region.
//
// Each supported platform uses its native shared memory mechanism:
// - Linux: files in /dev/shm (tmpfs, RAM-backed) mapped with mmap
// - macOS: shm_open() + mmap (POSIX shared memory)
//
// The channel protocol also needs named POSIX semaphores, so platforms
// without them (Windows among others) get a stub that reports Unsupported.

use crate::error::AxonResult;

#[cfg(target_os = "linux")]
use std::path::PathBuf;

#[cfg(target_os = "linux")]
use memmap2::{MmapMut, MmapOptions};
#[cfg(target_os = "linux")]
use std::fs::{File, OpenOptions};

/// Cross-process shared memory region.
///
/// The first process to create a name becomes the owner: it zero-fills the
/// region and removes the backing name on drop. Later processes map the same
/// bytes.
#[derive(Debug)]
pub struct ShmRegion {
    #[cfg(target_os = "linux")]
    mmap: MmapMut,
    #[cfg(target_os = "linux")]
    _file: File,
    #[cfg(target_os = "linux")]
    path: PathBuf,

    #[cfg(target_os = "macos")]
    ptr: *mut u8,
    #[cfg(target_os = "macos")]
    fd: i32,
    #[cfg(target_os = "macos")]
    shm_name: String,

    size: usize,
    owner: bool,
    unlink_on_drop: bool,
}

// ============================================================================
// Linux implementation — /dev/shm files (tmpfs) + mmap
// ============================================================================

/// Directory holding the object regions on Linux.
#[cfg(target_os = "linux")]
fn shm_objects_dir() -> PathBuf {
    PathBuf::from("/dev/shm/axon/objects")
}

#[cfg(target_os = "linux")]
impl ShmRegion {
    /// Create or open a shared memory region.
    ///
    /// Creation uses `create_new` so exactly one racing process becomes the
    /// owner; everyone else opens the file it created.
    pub fn new(name: &str, size: usize) -> AxonResult<Self> {
        let dir = shm_objects_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(name);

        let (file, is_owner) = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => {
                file.set_len(size as u64)?;
                (file, true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let file = OpenOptions::new().read(true).write(true).open(&path)?;
                if file.metadata()?.len() < size as u64 {
                    file.set_len(size as u64)?;
                }
                (file, false)
            }
            Err(e) => return Err(e.into()),
        };

        // SAFETY: file is open with at least `size` bytes (set above); the
        // mapping length matches what we request.
        let mut mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };

        if is_owner {
            mmap.fill(0);
        }

        Ok(Self {
            mmap,
            _file: file,
            path,
            size,
            owner: is_owner,
            unlink_on_drop: true,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }
}

#[cfg(target_os = "linux")]
impl Drop for ShmRegion {
    fn drop(&mut self) {
        if self.owner && self.unlink_on_drop && self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

// ============================================================================
// macOS implementation — shm_open() + mmap
// ============================================================================

#[cfg(target_os = "macos")]
impl ShmRegion {
    /// Create or open a shared memory region using shm_open.
    pub fn new(name: &str, size: usize) -> AxonResult<Self> {
        use std::ffi::CString;

        let shm_name = format!("/axon_{}", name);
        let c_name = CString::new(shm_name.clone()).map_err(|_| {
            AxonError::memory(format!("shm name '{}' contains a null byte", shm_name))
        })?;

        // Exclusive create decides ownership; on EEXIST fall back to opening.
        // SAFETY: c_name is a valid null-terminated string; flags are POSIX
        // constants.
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o644,
            )
        };
        let (fd, is_owner) = if fd >= 0 {
            // SAFETY: fd is a valid descriptor from shm_open above.
            if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
                let err = std::io::Error::last_os_error();
                // SAFETY: fd valid; c_name valid.
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(AxonError::memory(format!(
                    "failed to size shm '{}' to {} bytes: {}",
                    shm_name, size, err
                )));
            }
            (fd, true)
        } else {
            // SAFETY: c_name is a valid null-terminated string.
            let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o644) };
            if fd < 0 {
                return Err(AxonError::memory(format!(
                    "failed to open shm '{}': {}",
                    shm_name,
                    std::io::Error::last_os_error()
                )));
            }
            (fd, false)
        };

        // SAFETY: fd is valid, size > 0, flags are POSIX mmap constants.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            // SAFETY: fd valid; c_name valid.
            unsafe {
                libc::close(fd);
                if is_owner {
                    libc::shm_unlink(c_name.as_ptr());
                }
            }
            return Err(AxonError::memory(format!("failed to mmap shm: {}", err)));
        }

        if is_owner {
            // SAFETY: ptr is a valid mapping of `size` bytes (checked above).
            unsafe { std::ptr::write_bytes(ptr as *mut u8, 0, size) };
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            fd,
            shm_name,
            size,
            owner: is_owner,
            unlink_on_drop: true,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }
}

#[cfg(target_os = "macos")]
impl Drop for ShmRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/size describe the live mapping; fd is open.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
            libc::close(self.fd);
        }
        if self.owner && self.unlink_on_drop {
            if let Ok(c_name) = std::ffi::CString::new(self.shm_name.clone()) {
                // SAFETY: c_name is a valid null-terminated string.
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
            }
        }
    }
}

// ============================================================================
// Other platforms — no named-semaphore support, so no region either
// ============================================================================

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
impl ShmRegion {
    pub fn new(_name: &str, _size: usize) -> AxonResult<Self> {
        Err(AxonError::Unsupported(
            "shared memory channels require POSIX shared memory and named semaphores".into(),
        ))
    }

    pub fn as_ptr(&self) -> *const u8 {
        unreachable!("ShmRegion cannot be constructed on this platform")
    }
}

// Common accessors — `size` and `owner` exist on all platform variants.
impl ShmRegion {
    /// Whether this handle created the region (and cleans it up on drop).
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Mapped length in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Keep or remove the backing name when the owner drops the region.
    pub fn set_unlink_on_drop(&mut self, unlink: bool) {
        self.unlink_on_drop = unlink;
    }
}

// SAFETY: the region is plain OS shared memory with no thread-local state;
// concurrent access is coordinated by the channel protocol on top.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

#[cfg(all(test, any(target_os = "linux", target_os = "macos")))]
mod tests {
    use super::*;

    fn unique_name(prefix: &str) -> String {
        use std::sync::atomic::{AtomicU32, Ordering};
        static SEQ: AtomicU32 = AtomicU32::new(0);
        format!(
            "{}_{}_{}",
            prefix,
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn create_and_basic_rw() {
        let name = unique_name("test_region_rw");
        let size = 4096;
        let region = ShmRegion::new(&name, size).expect("create region");
        assert!(region.is_owner());
        assert_eq!(region.size(), size);

        let ptr = region.as_ptr() as *mut u8;
        // SAFETY: exclusive test-local region of `size` bytes.
        unsafe {
            for i in 0..size {
                *ptr.add(i) = (i % 251) as u8;
            }
            for i in 0..size {
                assert_eq!(*ptr.add(i), (i % 251) as u8, "mismatch at byte {}", i);
            }
        }
    }

    #[test]
    fn owner_zero_initializes() {
        let name = unique_name("test_region_zeroed");
        let region = ShmRegion::new(&name, 1024).expect("create region");
        let ptr = region.as_ptr();
        for i in 0..1024 {
            // SAFETY: freshly created region of 1024 bytes.
            assert_eq!(unsafe { *ptr.add(i) }, 0, "byte {} not zeroed", i);
        }
    }

    #[test]
    fn second_open_is_not_owner() {
        let name = unique_name("test_region_owner");
        let first = ShmRegion::new(&name, 1024).expect("create region");
        let second = ShmRegion::new(&name, 1024).expect("open region");
        assert!(first.is_owner());
        assert!(!second.is_owner());
    }
}
