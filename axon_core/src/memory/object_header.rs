//! The shared-memory object header.
//!
//! The header is the cross-process ABI of a channel: a small control block
//! co-located with the object buffer, holding the version counter, the
//! reader quota for the current version, the payload sizes, the sticky error
//! flag, and the creation-level latch that elects one process to create the
//! named semaphore pair.
//!
//! Field order, sizes and alignment are frozen — cooperating processes on
//! one machine map the same bytes — and checked with a compile-time size
//! assertion. Every field that is written after creation is an atomic:
//! protocol fields use relaxed operations because all of their mutations
//! happen while the header semaphore is held, while `semaphores_created` and
//! `has_error` carry their own release/acquire ordering.
//!
//! ## Protocol
//!
//! Per version: the writer takes the drain token from the object semaphore
//! (`write_acquire`), fills the buffer, bumps the version and posts one
//! object-semaphore token per declared reader (`write_release`). Each reader
//! consumes one token (`read_acquire`) and decrements the release counter
//! (`read_release`); the last release posts the drain token back for the
//! next `write_acquire`.
//!
//! All blocking waits poll the error flag between timed semaphore waits, so
//! a peer that errors the channel unblocks everyone within the poll bound.

use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{AxonError, AxonResult};
use crate::memory::semaphore::{RawSemaphore, SemaphorePair, MAX_UNIQUE_NAME_LEN};

/// Storage reserved for the unique name, NUL-padded.
pub(crate) const UNIQUE_NAME_CAP: usize = 32;

// Creation-level latch states. Transitions are one-shot:
// UNINITIALIZED -> INITIALIZING (CAS, winner creates the semaphores)
// INITIALIZING  -> CREATED      (release store, losers spin for it)
const SEM_UNINITIALIZED: u32 = 0;
const SEM_INITIALIZING: u32 = 1;
const SEM_CREATED: u32 = 2;

/// Shared-memory control block for one mutable object.
#[repr(C, align(64))]
pub struct ObjectHeader {
    /// Stable identity of the semaphore pair; written once at allocation.
    unique_name: [u8; UNIQUE_NAME_CAP],
    /// Creation-level latch for the semaphore pair.
    semaphores_created: AtomicU32,
    /// Sticky error flag. Once set, acquires fail and releases are inert.
    has_error: AtomicU32,
    /// Monotonic version counter, bumped by every successful write release.
    version: AtomicU64,
    /// Declared reader count for the current version.
    num_readers: AtomicI64,
    /// Read-acquire quota left for the current version.
    num_read_acquires_remaining: AtomicI64,
    /// Read-release quota left before the writer may take the buffer back.
    num_read_releases_remaining: AtomicI64,
    /// Bytes of data in the buffer for the current version.
    data_size: AtomicU64,
    /// Bytes of metadata following the data.
    metadata_size: AtomicU64,
    _reserved: [u8; 40],
}

// The header is mapped by unrelated processes; its size is ABI.
const _: () = assert!(mem::size_of::<ObjectHeader>() == 128);
const _: () = assert!(mem::align_of::<ObjectHeader>() == 64);

impl ObjectHeader {
    /// Stamp the unique name into a freshly zeroed header.
    ///
    /// # Safety
    ///
    /// `header` must point to a zeroed, properly aligned header in a region
    /// this caller just created; no other process may touch the header until
    /// the release fence below has run (openers spin on `name_published`).
    pub(crate) unsafe fn init_at(header: NonNull<ObjectHeader>, unique_name: &str) -> AxonResult<()> {
        if unique_name.is_empty() || unique_name.len() > MAX_UNIQUE_NAME_LEN {
            return Err(AxonError::invalid_input(format!(
                "unique name '{}' must be 1..={} bytes",
                unique_name, MAX_UNIQUE_NAME_LEN
            )));
        }
        let dst = std::ptr::addr_of_mut!((*header.as_ptr()).unique_name) as *mut u8;
        std::ptr::copy_nonoverlapping(unique_name.as_ptr(), dst, unique_name.len());
        fence(Ordering::Release);
        Ok(())
    }

    /// Whether the allocating process has finished stamping the name.
    pub(crate) fn name_published(&self) -> bool {
        // SAFETY: reading one byte inside the mapped header; volatile because
        // the writer is another process.
        let first = unsafe { std::ptr::read_volatile(self.unique_name.as_ptr()) };
        if first == 0 {
            return false;
        }
        fence(Ordering::Acquire);
        true
    }

    /// The unique name stamped at allocation.
    pub fn unique_name(&self) -> AxonResult<&str> {
        let end = self
            .unique_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(UNIQUE_NAME_CAP);
        if end == 0 {
            return Err(AxonError::memory(
                "object header carries no unique name".to_string(),
            ));
        }
        std::str::from_utf8(&self.unique_name[..end])
            .map_err(|_| AxonError::memory("object header name is not UTF-8".to_string()))
    }

    // ------------------------------------------------------------------
    // Creation-level latch
    // ------------------------------------------------------------------

    /// Try to become the process that creates the semaphore pair.
    pub(crate) fn try_claim_semaphore_creation(&self) -> bool {
        if self.semaphores_created.load(Ordering::Relaxed) != SEM_UNINITIALIZED {
            return false;
        }
        self.semaphores_created
            .compare_exchange(
                SEM_UNINITIALIZED,
                SEM_INITIALIZING,
                Ordering::Relaxed,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Publish that both semaphores exist and may be opened by name.
    pub(crate) fn publish_semaphores_created(&self) {
        self.semaphores_created
            .store(SEM_CREATED, Ordering::Release);
    }

    /// Whether the semaphore pair is ready to open.
    pub fn semaphores_ready(&self) -> bool {
        self.semaphores_created.load(Ordering::Acquire) == SEM_CREATED
    }

    // ------------------------------------------------------------------
    // State accessors
    // ------------------------------------------------------------------

    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::Acquire) != 0
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    pub fn data_size(&self) -> u64 {
        self.data_size.load(Ordering::Relaxed)
    }

    pub fn metadata_size(&self) -> u64 {
        self.metadata_size.load(Ordering::Relaxed)
    }

    pub fn num_readers(&self) -> i64 {
        self.num_readers.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Versioned acquire/release protocol
    // ------------------------------------------------------------------

    /// Claim the buffer for a new version.
    ///
    /// Blocks until every reader of the previous version has released, then
    /// records the new sizes and reader quota under the header semaphore.
    /// The version counter is untouched until `write_release`.
    pub(crate) fn write_acquire(
        &self,
        sem: &SemaphorePair,
        data_size: u64,
        metadata_size: u64,
        num_readers: i64,
        poll: Duration,
    ) -> AxonResult<()> {
        self.poll_acquire(sem.object_sem, poll)?;
        self.poll_acquire(sem.header_sem, poll)?;
        debug_assert_eq!(self.num_read_releases_remaining.load(Ordering::Relaxed), 0);
        self.data_size.store(data_size, Ordering::Relaxed);
        self.metadata_size.store(metadata_size, Ordering::Relaxed);
        self.num_readers.store(num_readers, Ordering::Relaxed);
        self.num_read_acquires_remaining
            .store(num_readers, Ordering::Relaxed);
        self.num_read_releases_remaining
            .store(num_readers, Ordering::Relaxed);
        sem.header_sem.post()?;
        Ok(())
    }

    /// Publish the version written since `write_acquire`.
    ///
    /// Bumps the version and posts one object-semaphore token per declared
    /// reader. The writer must not touch the buffer afterwards until its
    /// next `write_acquire` returns.
    pub(crate) fn write_release(&self, sem: &SemaphorePair, poll: Duration) -> AxonResult<()> {
        self.poll_acquire_any(sem.header_sem, poll)?;
        if self.has_error() {
            sem.header_sem.post()?;
            return Err(closed());
        }
        self.version.fetch_add(1, Ordering::Relaxed);
        let num_readers = self.num_readers.load(Ordering::Relaxed);
        sem.header_sem.post()?;
        for _ in 0..num_readers {
            sem.object_sem.post()?;
        }
        Ok(())
    }

    /// Acquire a version of at least `min_version` for reading.
    ///
    /// Consumes one object-semaphore token. If the token turns out to belong
    /// to a version this reader has already seen — or the version's reader
    /// quota is exhausted — both semaphores are posted back so the rightful
    /// reader can make progress, and the wait restarts.
    ///
    /// Returns the version actually read, which may be newer than
    /// `min_version` when the writer has advanced several versions.
    pub(crate) fn read_acquire(
        &self,
        sem: &SemaphorePair,
        min_version: u64,
        poll: Duration,
    ) -> AxonResult<u64> {
        self.poll_acquire(sem.object_sem, poll)?;
        self.poll_acquire(sem.header_sem, poll)?;
        while self.version.load(Ordering::Relaxed) < min_version
            || self.num_read_acquires_remaining.load(Ordering::Relaxed) == 0
        {
            sem.header_sem.post()?;
            sem.object_sem.post()?;
            std::thread::yield_now();
            self.poll_acquire(sem.object_sem, poll)?;
            self.poll_acquire(sem.header_sem, poll)?;
        }
        self.num_read_acquires_remaining
            .fetch_sub(1, Ordering::Relaxed);
        let version_read = self.version.load(Ordering::Relaxed);
        sem.header_sem.post()?;
        Ok(version_read)
    }

    /// Release a version acquired with `read_acquire`.
    ///
    /// The last reader of a version posts the drain token that lets the next
    /// `write_acquire` proceed.
    pub(crate) fn read_release(
        &self,
        sem: &SemaphorePair,
        version_read: u64,
        poll: Duration,
    ) -> AxonResult<()> {
        self.poll_acquire_any(sem.header_sem, poll)?;
        if self.has_error() {
            sem.header_sem.post()?;
            return Err(closed());
        }
        // The writer cannot advance the version until this drain completes.
        debug_assert_eq!(self.version.load(Ordering::Relaxed), version_read);
        let remaining = self
            .num_read_releases_remaining
            .fetch_sub(1, Ordering::Relaxed)
            - 1;
        debug_assert!(remaining >= 0);
        if remaining == 0 {
            sem.object_sem.post()?;
        }
        sem.header_sem.post()?;
        Ok(())
    }

    /// Put the channel into its terminal error state.
    ///
    /// Idempotent. Posts the object semaphore once to kick a blocked peer;
    /// the timed waits in `poll_acquire` bound the wakeup of everyone else.
    pub(crate) fn set_error(&self, sem: &SemaphorePair, poll: Duration) -> AxonResult<()> {
        self.poll_acquire_any(sem.header_sem, poll)?;
        self.has_error.store(1, Ordering::Release);
        sem.header_sem.post()?;
        sem.object_sem.post()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Error-polling semaphore waits
    // ------------------------------------------------------------------

    /// Wait for `sem`, failing with `ChannelClosed` if the error flag is
    /// observed before or after the token is taken (the token is handed back
    /// in the latter case so other waiters observe the error too).
    fn poll_acquire(&self, sem: RawSemaphore, poll: Duration) -> AxonResult<()> {
        loop {
            if self.has_error() {
                return Err(closed());
            }
            if sem.wait_timeout(poll)? {
                break;
            }
        }
        if self.has_error() {
            sem.post()?;
            return Err(closed());
        }
        Ok(())
    }

    /// Wait for `sem` regardless of the error flag. Used on paths that must
    /// still enter the critical section after an error (releases, set_error).
    fn poll_acquire_any(&self, sem: RawSemaphore, poll: Duration) -> AxonResult<()> {
        while !sem.wait_timeout(poll)? {}
        Ok(())
    }
}

fn closed() -> AxonError {
    AxonError::channel_closed("channel is in the error state")
}

#[cfg(all(test, any(target_os = "linux", target_os = "macos")))]
mod tests {
    use super::*;
    use crate::memory::semaphore::{self, header_sem_name, object_sem_name};

    const POLL: Duration = Duration::from_millis(20);

    fn unique_name(prefix: &str) -> String {
        use std::sync::atomic::{AtomicU32, Ordering};
        static SEQ: AtomicU32 = AtomicU32::new(0);
        format!(
            "{}{:x}n{}",
            prefix,
            std::process::id() & 0xffff,
            SEQ.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn test_header(name: &str) -> Box<ObjectHeader> {
        // SAFETY: a zeroed header is the valid freshly-allocated state.
        let header: Box<ObjectHeader> = unsafe { Box::new(mem::zeroed()) };
        let ptr = NonNull::from(header.as_ref());
        // SAFETY: header is exclusively owned and zeroed.
        unsafe { ObjectHeader::init_at(ptr, name).unwrap() };
        header
    }

    fn test_pair(name: &str) -> SemaphorePair {
        let hdr = header_sem_name(name);
        let obj = object_sem_name(name);
        let _ = semaphore::unlink(&hdr);
        let _ = semaphore::unlink(&obj);
        SemaphorePair {
            header_sem: RawSemaphore::create_exclusive(&hdr).unwrap(),
            object_sem: RawSemaphore::create_exclusive(&obj).unwrap(),
        }
    }

    fn destroy_pair(name: &str, pair: SemaphorePair) {
        pair.header_sem.close().unwrap();
        pair.object_sem.close().unwrap();
        semaphore::unlink(&header_sem_name(name)).unwrap();
        semaphore::unlink(&object_sem_name(name)).unwrap();
    }

    #[test]
    fn layout_is_frozen() {
        assert_eq!(mem::size_of::<ObjectHeader>(), 128);
        assert_eq!(mem::align_of::<ObjectHeader>(), 64);
    }

    #[test]
    fn name_too_long_is_rejected() {
        // SAFETY: zeroed header is valid.
        let header: Box<ObjectHeader> = unsafe { Box::new(mem::zeroed()) };
        let ptr = NonNull::from(header.as_ref());
        let long = "x".repeat(MAX_UNIQUE_NAME_LEN + 1);
        // SAFETY: header is exclusively owned and zeroed.
        assert!(unsafe { ObjectHeader::init_at(ptr, &long) }.is_err());
        assert!(!header.name_published());
    }

    #[test]
    fn creation_latch_is_one_shot() {
        let header = test_header(&unique_name("axlatch"));
        assert!(!header.semaphores_ready());
        assert!(header.try_claim_semaphore_creation());
        assert!(!header.try_claim_semaphore_creation());
        header.publish_semaphores_created();
        assert!(header.semaphores_ready());
        assert!(!header.try_claim_semaphore_creation());
    }

    #[test]
    fn single_version_handoff() {
        let name = unique_name("axhdr");
        let header = test_header(&name);
        let pair = test_pair(&name);

        header.write_acquire(&pair, 4, 2, 1, POLL).unwrap();
        assert_eq!(header.version(), 0);
        header.write_release(&pair, POLL).unwrap();
        assert_eq!(header.version(), 1);

        let version = header.read_acquire(&pair, 1, POLL).unwrap();
        assert_eq!(version, 1);
        assert_eq!(header.data_size(), 4);
        assert_eq!(header.metadata_size(), 2);
        header.read_release(&pair, version, POLL).unwrap();

        // Drain complete: the next write must get the token without blocking.
        header.write_acquire(&pair, 1, 0, 1, POLL).unwrap();
        header.write_release(&pair, POLL).unwrap();

        destroy_pair(&name, pair);
    }

    #[test]
    fn error_unblocks_waiting_reader() {
        let name = unique_name("axerr");
        let header = test_header(&name);
        let pair = test_pair(&name);

        let addr = header.as_ref() as *const ObjectHeader as usize;
        let reader = std::thread::spawn(move || {
            // SAFETY: the header outlives the join below.
            let header = unsafe { &*(addr as *const ObjectHeader) };
            header.read_acquire(&pair, 1, POLL)
        });
        std::thread::sleep(Duration::from_millis(50));
        header.set_error(&pair, POLL).unwrap();
        let res = reader.join().unwrap();
        assert!(matches!(res, Err(AxonError::ChannelClosed(_))));

        // Sticky: later acquires fail immediately.
        assert!(header.write_acquire(&pair, 1, 0, 1, POLL).is_err());
        // Idempotent.
        header.set_error(&pair, POLL).unwrap();

        destroy_pair(&name, pair);
    }
}
