//! Named POSIX counting semaphores.
//!
//! Every channel is synchronized by a pair of named semaphores so that
//! unrelated processes can rendezvous on nothing but a name stored in the
//! shared object header:
//!
//! - `header` semaphore (`"/hdr" + unique_name`): mutex-style guard for the
//!   header fields
//! - `object` semaphore (`"/obj" + unique_name`): data-ready / data-drained
//!   signalling between the writer and the readers
//!
//! Both are created with initial value 1, mode 0644. Handles are raw
//! `sem_t` pointers and deliberately `Copy`: the registry map that stores
//! them does not guarantee pointer stability, so lookups hand out copies.
//! Closing and unlinking are explicit operations, not `Drop` impls.

use std::time::Duration;

use crate::error::{AxonError, AxonResult};

/// Portable ceiling for a POSIX semaphore name, including the leading slash
/// (the macOS `PSEMNAMLEN` floor; Linux allows far more).
pub const SEM_NAME_MAX: usize = 31;

/// Longest `unique_name` a header may carry: the name budget minus the
/// leading slash and the 3-byte `hdr`/`obj` prefix.
pub const MAX_UNIQUE_NAME_LEN: usize = SEM_NAME_MAX - 4;

/// Semaphore name guarding the header fields of `unique_name`'s object.
pub(crate) fn header_sem_name(unique_name: &str) -> String {
    format!("/hdr{}", unique_name)
}

/// Semaphore name signalling data readiness for `unique_name`'s object.
pub(crate) fn object_sem_name(unique_name: &str) -> String {
    format!("/obj{}", unique_name)
}

/// The two named semaphores synchronizing one object, held per-process.
#[derive(Clone, Copy, Debug)]
pub struct SemaphorePair {
    /// Guards mutation of the object header fields.
    pub header_sem: RawSemaphore,
    /// Counts data-ready (writer to readers) and drain (last reader back to
    /// writer) tokens.
    pub object_sem: RawSemaphore,
}

// ============================================================================
// POSIX implementation
// ============================================================================

#[cfg(any(target_os = "linux", target_os = "macos"))]
mod imp {
    use super::*;
    use std::ffi::CString;

    /// A process-local handle to one named semaphore.
    #[derive(Clone, Copy, Debug)]
    pub struct RawSemaphore {
        raw: *mut libc::sem_t,
    }

    // SAFETY: sem_t handles are process-wide; the kernel serializes all
    // operations on them.
    unsafe impl Send for RawSemaphore {}
    unsafe impl Sync for RawSemaphore {}

    fn c_name(name: &str) -> AxonResult<CString> {
        if name.len() > SEM_NAME_MAX {
            return Err(AxonError::invalid_input(format!(
                "semaphore name '{}' exceeds {} bytes",
                name, SEM_NAME_MAX
            )));
        }
        CString::new(name).map_err(|_| {
            AxonError::invalid_input(format!("semaphore name '{}' contains a null byte", name))
        })
    }

    impl RawSemaphore {
        /// Create a semaphore that must not already exist, initial value 1.
        pub fn create_exclusive(name: &str) -> AxonResult<Self> {
            let c = c_name(name)?;
            // SAFETY: c is a valid null-terminated string; the variadic mode
            // and value arguments follow the sem_open(O_CREAT) contract.
            let raw = unsafe {
                libc::sem_open(
                    c.as_ptr(),
                    libc::O_CREAT | libc::O_EXCL,
                    0o644 as libc::c_uint,
                    1 as libc::c_uint,
                )
            };
            if raw == libc::SEM_FAILED {
                return Err(AxonError::memory(format!(
                    "sem_open(O_CREAT|O_EXCL, '{}') failed: {}",
                    name,
                    std::io::Error::last_os_error()
                )));
            }
            Ok(Self { raw })
        }

        /// Open a semaphore some other process already created.
        pub fn open(name: &str) -> AxonResult<Self> {
            let c = c_name(name)?;
            // SAFETY: c is a valid null-terminated string.
            let raw = unsafe { libc::sem_open(c.as_ptr(), 0) };
            if raw == libc::SEM_FAILED {
                return Err(AxonError::memory(format!(
                    "sem_open('{}') failed: {}",
                    name,
                    std::io::Error::last_os_error()
                )));
            }
            Ok(Self { raw })
        }

        /// Increment the semaphore, waking one waiter.
        pub fn post(&self) -> AxonResult<()> {
            // SAFETY: raw is a live handle from sem_open.
            if unsafe { libc::sem_post(self.raw) } != 0 {
                return Err(AxonError::memory(format!(
                    "sem_post failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
            Ok(())
        }

        /// Wait up to `timeout` for the semaphore.
        ///
        /// Returns `Ok(true)` when acquired, `Ok(false)` on timeout or
        /// signal interruption. Callers loop around this so that a blocked
        /// wait periodically re-checks out-of-band state (the channel error
        /// flag).
        #[cfg(target_os = "linux")]
        pub fn wait_timeout(&self, timeout: Duration) -> AxonResult<bool> {
            let mut ts = libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            };
            // SAFETY: ts is a valid out-pointer.
            if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) } != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            ts.tv_sec += timeout.as_secs() as libc::time_t;
            ts.tv_nsec += timeout.subsec_nanos() as libc::c_long;
            if ts.tv_nsec >= 1_000_000_000 {
                ts.tv_sec += 1;
                ts.tv_nsec -= 1_000_000_000;
            }
            // SAFETY: raw is a live handle; ts is a valid absolute deadline.
            if unsafe { libc::sem_timedwait(self.raw, &ts) } == 0 {
                return Ok(true);
            }
            match std::io::Error::last_os_error().raw_os_error() {
                Some(libc::ETIMEDOUT) | Some(libc::EINTR) => Ok(false),
                _ => Err(AxonError::memory(format!(
                    "sem_timedwait failed: {}",
                    std::io::Error::last_os_error()
                ))),
            }
        }

        /// Wait up to `timeout` for the semaphore.
        ///
        /// macOS has no `sem_timedwait`, so this emulates it with
        /// `sem_trywait` plus a short sleep.
        #[cfg(target_os = "macos")]
        pub fn wait_timeout(&self, timeout: Duration) -> AxonResult<bool> {
            let deadline = std::time::Instant::now() + timeout;
            loop {
                // SAFETY: raw is a live handle from sem_open.
                if unsafe { libc::sem_trywait(self.raw) } == 0 {
                    return Ok(true);
                }
                match std::io::Error::last_os_error().raw_os_error() {
                    Some(libc::EAGAIN) | Some(libc::EINTR) => {}
                    _ => {
                        return Err(AxonError::memory(format!(
                            "sem_trywait failed: {}",
                            std::io::Error::last_os_error()
                        )))
                    }
                }
                if std::time::Instant::now() >= deadline {
                    return Ok(false);
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        /// Release this process's handle. The name stays until unlinked.
        pub fn close(self) -> AxonResult<()> {
            // SAFETY: raw is a live handle from sem_open; close consumes self
            // so the handle is not reused.
            if unsafe { libc::sem_close(self.raw) } != 0 {
                return Err(AxonError::memory(format!(
                    "sem_close failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
            Ok(())
        }
    }

    /// Remove a semaphore name. Returns whether the name existed; a missing
    /// name is not an error, so every process can attempt cleanup and the
    /// last unlinker wins.
    pub fn unlink(name: &str) -> AxonResult<bool> {
        let c = c_name(name)?;
        // SAFETY: c is a valid null-terminated string.
        if unsafe { libc::sem_unlink(c.as_ptr()) } == 0 {
            return Ok(true);
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::ENOENT) => Ok(false),
            _ => Err(AxonError::memory(format!(
                "sem_unlink('{}') failed: {}",
                name,
                std::io::Error::last_os_error()
            ))),
        }
    }
}

// ============================================================================
// Other platforms — every operation reports Unsupported
// ============================================================================

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod imp {
    use super::*;

    #[derive(Clone, Copy, Debug)]
    pub struct RawSemaphore {
        _private: (),
    }

    fn unsupported<T>() -> AxonResult<T> {
        Err(AxonError::Unsupported(
            "named POSIX semaphores are not available on this platform".into(),
        ))
    }

    impl RawSemaphore {
        pub fn create_exclusive(_name: &str) -> AxonResult<Self> {
            unsupported()
        }
        pub fn open(_name: &str) -> AxonResult<Self> {
            unsupported()
        }
        pub fn post(&self) -> AxonResult<()> {
            unsupported()
        }
        pub fn wait_timeout(&self, _timeout: Duration) -> AxonResult<bool> {
            unsupported()
        }
        pub fn close(self) -> AxonResult<()> {
            unsupported()
        }
    }

    pub fn unlink(_name: &str) -> AxonResult<bool> {
        unsupported()
    }
}

pub use imp::{unlink, RawSemaphore};

#[cfg(all(test, any(target_os = "linux", target_os = "macos")))]
mod tests {
    use super::*;

    fn unique_name(prefix: &str) -> String {
        use std::sync::atomic::{AtomicU32, Ordering};
        static SEQ: AtomicU32 = AtomicU32::new(0);
        // Short enough to fit the portable name budget.
        format!(
            "/{}{:x}{}",
            prefix,
            std::process::id() & 0xffff,
            SEQ.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn create_post_wait_close() {
        let name = unique_name("axsem");
        let sem = RawSemaphore::create_exclusive(&name).expect("create");
        // Initial value is 1.
        assert!(sem.wait_timeout(Duration::from_millis(50)).unwrap());
        // Now empty: a short wait times out.
        assert!(!sem.wait_timeout(Duration::from_millis(10)).unwrap());
        sem.post().unwrap();
        assert!(sem.wait_timeout(Duration::from_millis(50)).unwrap());
        sem.close().unwrap();
        assert!(unlink(&name).unwrap());
    }

    #[test]
    fn exclusive_create_rejects_existing() {
        let name = unique_name("axdup");
        let sem = RawSemaphore::create_exclusive(&name).expect("create");
        assert!(RawSemaphore::create_exclusive(&name).is_err());
        sem.close().unwrap();
        assert!(unlink(&name).unwrap());
    }

    #[test]
    fn open_shares_count_with_creator() {
        let name = unique_name("axshare");
        let a = RawSemaphore::create_exclusive(&name).expect("create");
        let b = RawSemaphore::open(&name).expect("open");
        // Drain the initial token through one handle, post through the other.
        assert!(a.wait_timeout(Duration::from_millis(50)).unwrap());
        b.post().unwrap();
        assert!(a.wait_timeout(Duration::from_millis(50)).unwrap());
        a.close().unwrap();
        b.close().unwrap();
        assert!(unlink(&name).unwrap());
    }

    #[test]
    fn unlink_is_idempotent() {
        let name = unique_name("axunlk");
        let sem = RawSemaphore::create_exclusive(&name).expect("create");
        sem.close().unwrap();
        assert!(unlink(&name).unwrap());
        assert!(!unlink(&name).unwrap());
    }
}
