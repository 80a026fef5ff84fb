//! Per-process channel registry and the acquire/release surface.
//!
//! A `Channel` binds one `MutableObject` to this process's writer/reader
//! role bookkeeping. The `ChannelManager` keys channels and their semaphore
//! pairs by object id and exposes the versioned hand-off operations. All
//! blocking happens in the shared header protocol; the manager's own maps
//! are only held for short lookups, never across a semaphore wait.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::axon_internal;
use crate::config::ChannelConfig;
use crate::error::{AxonError, AxonResult};
use crate::memory::object::{MutableObject, ReadableBuffer, WritableBuffer};
use crate::memory::object_header::ObjectHeader;
use crate::memory::semaphore::{
    self, header_sem_name, object_sem_name, RawSemaphore, SemaphorePair, MAX_UNIQUE_NAME_LEN,
};
use crate::types::ObjectId;

/// Which side of a channel a registration claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Reader,
    Writer,
}

/// In-process lock serializing local readers of one channel.
///
/// Taken in `read_acquire` and released in the matching `read_release` —
/// possibly from a different thread (the forwarder releases from its RPC
/// completion callback) — so this is a tiny binary semaphore rather than a
/// guard-scoped mutex.
struct ReaderLock {
    busy: Mutex<bool>,
    available: Condvar,
}

impl ReaderLock {
    fn new() -> Self {
        Self {
            busy: Mutex::new(false),
            available: Condvar::new(),
        }
    }

    fn lock(&self) {
        let mut busy = self.busy.lock();
        while *busy {
            self.available.wait(&mut busy);
        }
        *busy = true;
    }

    fn unlock(&self) {
        let mut busy = self.busy.lock();
        *busy = false;
        self.available.notify_one();
    }
}

/// Per-object record in one process.
struct Channel {
    object: MutableObject,
    reader_registered: bool,
    writer_registered: bool,
    /// True between a successful write acquire and its release.
    written: bool,
    /// True between a successful read acquire and its release.
    reading: bool,
    /// The lowest version the next read may observe.
    next_version_to_read: u64,
    reader_lock: Arc<ReaderLock>,
}

impl Channel {
    fn new(object: MutableObject) -> Self {
        Self {
            object,
            reader_registered: false,
            writer_registered: false,
            written: false,
            reading: false,
            next_version_to_read: 1,
            reader_lock: Arc::new(ReaderLock::new()),
        }
    }
}

/// Copy of the per-channel state a blocking operation needs, taken under the
/// map lock and used after it is released. Header and buffer pointers are
/// stable: they point into the mapped segment, not into the map.
struct ChannelView {
    header: NonNull<ObjectHeader>,
    buffer: NonNull<u8>,
    allocated_size: usize,
    reader_lock: Arc<ReaderLock>,
}

fn not_registered(object_id: &ObjectId) -> AxonError {
    AxonError::NotRegistered(format!("no channel registered for object {}", object_id))
}

/// Keyed store of this process's channels and semaphore pairs.
pub struct ChannelManager {
    channels: Mutex<HashMap<ObjectId, Channel>>,
    semaphores: Mutex<HashMap<ObjectId, SemaphorePair>>,
    config: ChannelConfig,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::with_config(ChannelConfig::default())
    }

    pub fn with_config(config: ChannelConfig) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            semaphores: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Register this process as reader or writer of `object_id`.
    ///
    /// The first registration moves the object in; a second registration for
    /// the other role reuses the existing mapping and drops the duplicate.
    /// Registering the same role twice is rejected.
    pub fn register_channel(
        &self,
        object_id: ObjectId,
        object: MutableObject,
        role: ChannelRole,
    ) -> AxonResult<()> {
        if object.header().unique_name()?.len() > MAX_UNIQUE_NAME_LEN {
            return Err(AxonError::invalid_input(format!(
                "unique name of object {} exceeds the {} byte semaphore name budget",
                object_id, MAX_UNIQUE_NAME_LEN
            )));
        }

        let header;
        {
            let mut channels = self.channels.lock();
            let channel = match channels.entry(object_id) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(Channel::new(object)),
            };
            match role {
                ChannelRole::Reader => {
                    if channel.reader_registered {
                        return Err(AxonError::AlreadyRegistered(format!(
                            "a reader is already registered for object {}",
                            object_id
                        )));
                    }
                    channel.reader_registered = true;
                }
                ChannelRole::Writer => {
                    if channel.writer_registered {
                        return Err(AxonError::AlreadyRegistered(format!(
                            "a writer is already registered for object {}",
                            object_id
                        )));
                    }
                    channel.writer_registered = true;
                }
            }
            header = channel.object.header_ptr();
        }

        self.open_semaphores(object_id, header)?;
        log::debug!("registered {:?} channel for object {}", role, object_id);
        Ok(())
    }

    /// The shared header of a registered object.
    ///
    /// Headers live in the mapped segment and channels are only torn down
    /// when the manager is dropped, so the reference is valid for any borrow
    /// of `self`.
    pub fn header(&self, object_id: &ObjectId) -> AxonResult<&ObjectHeader> {
        let ptr = {
            let channels = self.channels.lock();
            channels
                .get(object_id)
                .map(|c| c.object.header_ptr())
                .ok_or_else(|| not_registered(object_id))?
        };
        // SAFETY: the mapping outlives every borrow of the manager.
        Ok(unsafe { &*ptr.as_ptr() })
    }

    pub fn reader_registered(&self, object_id: &ObjectId) -> bool {
        self.channels
            .lock()
            .get(object_id)
            .map(|c| c.reader_registered)
            .unwrap_or(false)
    }

    pub fn writer_registered(&self, object_id: &ObjectId) -> bool {
        self.channels
            .lock()
            .get(object_id)
            .map(|c| c.writer_registered)
            .unwrap_or(false)
    }

    /// Claim the buffer for a new version of `object_id`.
    ///
    /// Blocks until every declared reader of the previous version has
    /// released it. On success the returned view covers the data region;
    /// `metadata` has already been copied into the bytes after it.
    pub fn write_acquire(
        &self,
        object_id: ObjectId,
        data_size: usize,
        metadata: &[u8],
        num_readers: i64,
    ) -> AxonResult<WritableBuffer> {
        if num_readers < 1 {
            return Err(AxonError::invalid_input(format!(
                "num_readers must be at least 1, got {}",
                num_readers
            )));
        }
        let view = {
            let channels = self.channels.lock();
            let c = channels
                .get(&object_id)
                .ok_or_else(|| not_registered(&object_id))?;
            if c.written {
                return Err(AxonError::invalid_input(
                    "write_acquire called again before write_release".to_string(),
                ));
            }
            let total = data_size + metadata.len();
            if total > c.object.allocated_size() {
                return Err(AxonError::invalid_input(format!(
                    "data size ({}) + metadata size ({}) exceeds the allocated buffer size ({})",
                    data_size,
                    metadata.len(),
                    c.object.allocated_size()
                )));
            }
            channel_view(c)
        };

        let sem = self.semaphores(&object_id)?;
        // SAFETY: see `header()`.
        let header = unsafe { view.header.as_ref() };
        header.write_acquire(
            &sem,
            data_size as u64,
            metadata.len() as u64,
            num_readers,
            self.config.error_poll(),
        )?;

        if !metadata.is_empty() {
            // Metadata lands immediately after the data bytes.
            // SAFETY: the writer owns the buffer between acquire and
            // release; bounds were validated against allocated_size above.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    metadata.as_ptr(),
                    view.buffer.as_ptr().add(data_size),
                    metadata.len(),
                );
            }
        }
        if let Some(c) = self.channels.lock().get_mut(&object_id) {
            c.written = true;
        }
        Ok(WritableBuffer::new(view.buffer, data_size))
    }

    /// Publish the version written since the matching `write_acquire`.
    pub fn write_release(&self, object_id: ObjectId) -> AxonResult<()> {
        let view = {
            let channels = self.channels.lock();
            let c = channels
                .get(&object_id)
                .ok_or_else(|| not_registered(&object_id))?;
            if !c.written {
                return Err(AxonError::invalid_input(
                    "write_release called without a matching write_acquire".to_string(),
                ));
            }
            channel_view(c)
        };
        let sem = self.semaphores(&object_id)?;
        // SAFETY: see `header()`.
        let header = unsafe { view.header.as_ref() };
        let result = header.write_release(&sem, self.config.error_poll());
        // Pairing state is cleared even when the channel errored underneath,
        // so teardown never sees a phantom in-flight write.
        if let Some(c) = self.channels.lock().get_mut(&object_id) {
            c.written = false;
        }
        result
    }

    /// Acquire the next readable version of `object_id`.
    ///
    /// Serializes local readers first, then blocks until a version at least
    /// `next_version_to_read` is published. Returns the data and metadata
    /// views, valid until the matching `read_release`.
    pub fn read_acquire(
        &self,
        object_id: ObjectId,
    ) -> AxonResult<(ReadableBuffer, ReadableBuffer)> {
        let view = self.view(&object_id)?;
        // In-process readers are serialized before any cross-process wait.
        view.reader_lock.lock();
        match self.read_acquire_locked(object_id, &view) {
            Ok(buffers) => Ok(buffers),
            Err(e) => {
                view.reader_lock.unlock();
                Err(e)
            }
        }
    }

    fn read_acquire_locked(
        &self,
        object_id: ObjectId,
        view: &ChannelView,
    ) -> AxonResult<(ReadableBuffer, ReadableBuffer)> {
        let min_version = {
            let channels = self.channels.lock();
            channels
                .get(&object_id)
                .ok_or_else(|| not_registered(&object_id))?
                .next_version_to_read
        };
        let sem = self.semaphores(&object_id)?;
        // SAFETY: see `header()`.
        let header = unsafe { view.header.as_ref() };
        let version_read = header.read_acquire(&sem, min_version, self.config.error_poll())?;
        debug_assert!(version_read > 0);

        let data_size = header.data_size() as usize;
        let metadata_size = header.metadata_size() as usize;
        if data_size + metadata_size > view.allocated_size {
            return Err(axon_internal!(
                "header reports {} payload bytes for a {} byte buffer",
                data_size + metadata_size,
                view.allocated_size
            ));
        }

        {
            let mut channels = self.channels.lock();
            if let Some(c) = channels.get_mut(&object_id) {
                // The writer may have advanced several versions; record the
                // one actually read so skipped versions are never awaited.
                c.next_version_to_read = version_read;
                c.reading = true;
            }
        }

        let data = ReadableBuffer::new(view.buffer, data_size);
        // SAFETY: data_size + metadata_size fits in the buffer (checked
        // above), so the offset pointer stays inside the mapping.
        let metadata = ReadableBuffer::new(
            unsafe { NonNull::new_unchecked(view.buffer.as_ptr().add(data_size)) },
            metadata_size,
        );
        Ok((data, metadata))
    }

    /// Release the version acquired by the matching `read_acquire`.
    pub fn read_release(&self, object_id: ObjectId) -> AxonResult<()> {
        let view = self.view(&object_id)?;
        let version = {
            let channels = self.channels.lock();
            let c = channels
                .get(&object_id)
                .ok_or_else(|| not_registered(&object_id))?;
            if !c.reading {
                return Err(AxonError::invalid_input(
                    "read_release called without a matching read_acquire".to_string(),
                ));
            }
            c.next_version_to_read
        };
        let sem = self.semaphores(&object_id)?;
        // SAFETY: see `header()`.
        let header = unsafe { view.header.as_ref() };
        let result = header.read_release(&sem, version, self.config.error_poll());
        {
            let mut channels = self.channels.lock();
            if let Some(c) = channels.get_mut(&object_id) {
                // The next read must observe a strictly newer version.
                c.next_version_to_read += 1;
                c.reading = false;
            }
        }
        // Unlocked after the drain post inside read_release, so a second
        // local reader cannot jump ahead of the cross-process hand-off.
        view.reader_lock.unlock();
        result
    }

    /// Put one channel into its terminal error state and drop its role
    /// registrations. Idempotent; any peer blocked on the channel unblocks
    /// within the error-poll bound.
    pub fn set_error(&self, object_id: &ObjectId) -> AxonResult<()> {
        let view = self.view(object_id)?;
        let sem = self.semaphores(object_id)?;
        // SAFETY: see `header()`.
        let header = unsafe { view.header.as_ref() };
        header.set_error(&sem, self.config.error_poll())?;
        let mut channels = self.channels.lock();
        if let Some(c) = channels.get_mut(object_id) {
            c.reader_registered = false;
            c.writer_registered = false;
        }
        Ok(())
    }

    /// `set_error` for every registered channel.
    pub fn set_error_all(&self) -> AxonResult<()> {
        let ids: Vec<ObjectId> = self.channels.lock().keys().copied().collect();
        for id in ids {
            self.set_error(&id)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Semaphore pair registry
    // ------------------------------------------------------------------

    /// The semaphore pair for `object_id`, by copy — the map may relocate
    /// entries, and the handles are cheap.
    fn semaphores(&self, object_id: &ObjectId) -> AxonResult<SemaphorePair> {
        self.semaphores
            .lock()
            .get(object_id)
            .copied()
            .ok_or_else(|| not_registered(object_id))
    }

    /// Open (creating if elected) the semaphore pair for `object_id`.
    ///
    /// The first process to get here wins the creation-level latch, scrubs
    /// any stale names a crashed run left behind, and creates both
    /// semaphores exclusively; everyone else spin-yields until the latch
    /// publishes and then opens them by name.
    fn open_semaphores(
        &self,
        object_id: ObjectId,
        header: NonNull<ObjectHeader>,
    ) -> AxonResult<()> {
        let mut semaphores = self.semaphores.lock();
        if semaphores.contains_key(&object_id) {
            return Ok(());
        }
        // SAFETY: see `header()`.
        let header = unsafe { header.as_ref() };
        let unique_name = header.unique_name()?.to_string();
        let hdr_name = header_sem_name(&unique_name);
        let obj_name = object_sem_name(&unique_name);

        let pair = if header.try_claim_semaphore_creation() {
            let _ = semaphore::unlink(&hdr_name);
            let _ = semaphore::unlink(&obj_name);
            let object_sem = RawSemaphore::create_exclusive(&obj_name)?;
            let header_sem = RawSemaphore::create_exclusive(&hdr_name)?;
            header.publish_semaphores_created();
            log::info!(
                "created semaphore pair '{}' for object {}",
                unique_name,
                object_id
            );
            SemaphorePair {
                header_sem,
                object_sem,
            }
        } else {
            let mut spins = 0u32;
            while !header.semaphores_ready() {
                spins += 1;
                if spins > self.config.latch_spin_limit {
                    return Err(AxonError::memory(format!(
                        "timed out waiting for semaphore creation for object {}",
                        object_id
                    )));
                }
                std::thread::yield_now();
            }
            log::debug!(
                "opened semaphore pair '{}' for object {}",
                unique_name,
                object_id
            );
            SemaphorePair {
                header_sem: RawSemaphore::open(&hdr_name)?,
                object_sem: RawSemaphore::open(&obj_name)?,
            }
        };
        semaphores.insert(object_id, pair);
        Ok(())
    }

    /// Close this process's handles and attempt to unlink the names.
    fn destroy_semaphores(&self, object_id: &ObjectId) -> AxonResult<()> {
        let pair = match self.semaphores.lock().remove(object_id) {
            Some(pair) => pair,
            None => return Ok(()),
        };
        pair.header_sem.close()?;
        pair.object_sem.close()?;

        let unique_name = {
            let channels = self.channels.lock();
            match channels.get(object_id) {
                Some(c) => c.object.header().unique_name()?.to_string(),
                None => return Ok(()),
            }
        };
        // Every process attempts the unlink; only the last one finds the
        // name, the rest see ENOENT and report false.
        let _ = semaphore::unlink(&header_sem_name(&unique_name))?;
        let _ = semaphore::unlink(&object_sem_name(&unique_name))?;
        Ok(())
    }

    fn view(&self, object_id: &ObjectId) -> AxonResult<ChannelView> {
        let channels = self.channels.lock();
        channels
            .get(object_id)
            .map(channel_view)
            .ok_or_else(|| not_registered(object_id))
    }
}

fn channel_view(channel: &Channel) -> ChannelView {
    ChannelView {
        header: channel.object.header_ptr(),
        buffer: channel.object.buffer_ptr(),
        allocated_size: channel.object.allocated_size(),
        reader_lock: Arc::clone(&channel.reader_lock),
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        // Copy the key set first: destroy_semaphores removes entries while
        // this loop runs.
        let ids: Vec<ObjectId> = self.semaphores.lock().keys().copied().collect();
        for id in &ids {
            if let Err(e) = self.set_error(id) {
                log::warn!("failed to error channel {} during teardown: {}", id, e);
            }
            if let Err(e) = self.destroy_semaphores(id) {
                log::warn!("failed to destroy semaphores for {}: {}", id, e);
            }
        }
        if !ids.is_empty() {
            log::debug!("channel manager tore down {} channel(s)", ids.len());
        }
    }
}

#[cfg(all(test, any(target_os = "linux", target_os = "macos")))]
mod tests {
    use super::*;
    use crate::memory::object::ShmAllocator;
    use std::time::{Duration, Instant};

    fn fast_config() -> ChannelConfig {
        ChannelConfig {
            error_poll_ms: 20,
            ..ChannelConfig::default()
        }
    }

    /// A manager with the object registered under the given role, sharing
    /// the region every other participant mapped.
    fn participant(id: &ObjectId, capacity: usize, role: ChannelRole) -> ChannelManager {
        let manager = ChannelManager::with_config(fast_config());
        let object = ShmAllocator::new().create_object(id, capacity).unwrap();
        manager.register_channel(*id, object, role).unwrap();
        manager
    }

    #[test]
    fn single_writer_single_reader_handoff() {
        let id = ObjectId::random();
        let writer = participant(&id, 64, ChannelRole::Writer);
        let reader = participant(&id, 64, ChannelRole::Reader);

        let mut buf = writer
            .write_acquire(id, 4, &[0xAA, 0xBB], 1)
            .expect("write_acquire");
        buf.as_mut_slice().copy_from_slice(&[0x01, 0x02, 0x03, 0x04]);
        writer.write_release(id).expect("write_release");

        let (data, metadata) = reader.read_acquire(id).expect("read_acquire");
        assert_eq!(reader.header(&id).unwrap().version(), 1);
        assert_eq!(data.as_slice(), &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(metadata.as_slice(), &[0xAA, 0xBB]);
        reader.read_release(id).expect("read_release");

        // The drain completed: the next write gets the buffer immediately.
        let _ = writer.write_acquire(id, 1, &[], 1).expect("second write");
        writer.write_release(id).unwrap();
    }

    #[test]
    fn oversize_write_is_rejected_and_state_survives() {
        let id = ObjectId::random();
        let writer = participant(&id, 64, ChannelRole::Writer);

        let err = writer
            .write_acquire(id, 60, &[0u8; 8], 1)
            .expect_err("60 + 8 > 64 must fail");
        assert!(matches!(err, AxonError::InvalidInput(_)));

        // The failed call left no write in flight.
        let _ = writer.write_acquire(id, 4, &[0u8; 2], 1).expect("retry");
        writer.write_release(id).unwrap();
    }

    #[test]
    fn bounded_readers_drain_then_next_version() {
        let id = ObjectId::random();
        let writer = participant(&id, 16, ChannelRole::Writer);
        let reader_a = participant(&id, 16, ChannelRole::Reader);
        let reader_b = ChannelManager::with_config(fast_config());
        reader_b
            .register_channel(
                id,
                ShmAllocator::new().create_object(&id, 16).unwrap(),
                ChannelRole::Reader,
            )
            .unwrap();

        let mut buf = writer.write_acquire(id, 1, &[], 2).unwrap();
        buf.as_mut_slice()[0] = 7;
        writer.write_release(id).unwrap();

        let (data, _) = reader_a.read_acquire(id).unwrap();
        assert_eq!(data.as_slice(), &[7]);
        reader_a.read_release(id).unwrap();
        let (data, _) = reader_b.read_acquire(id).unwrap();
        assert_eq!(data.as_slice(), &[7]);
        reader_b.read_release(id).unwrap();

        // A third participant starts at version 1 but the quota for version
        // 1 is spent: it must block until version 2 is published.
        let reader_c = ChannelManager::with_config(fast_config());
        reader_c
            .register_channel(
                id,
                ShmAllocator::new().create_object(&id, 16).unwrap(),
                ChannelRole::Reader,
            )
            .unwrap();
        let late = std::thread::spawn(move || {
            let (data, _) = reader_c.read_acquire(id).unwrap();
            let first = data.as_slice()[0];
            let version = reader_c.header(&id).unwrap().version();
            reader_c.read_release(id).unwrap();
            (first, version)
        });

        std::thread::sleep(Duration::from_millis(50));
        let mut buf = writer.write_acquire(id, 1, &[], 1).unwrap();
        buf.as_mut_slice()[0] = 9;
        writer.write_release(id).unwrap();

        let (first, version) = late.join().unwrap();
        assert_eq!(first, 9);
        assert_eq!(version, 2);
    }

    #[test]
    fn set_error_unblocks_a_waiting_reader() {
        let id = ObjectId::random();
        let reader = Arc::new(participant(&id, 16, ChannelRole::Reader));

        let blocked = {
            let reader = Arc::clone(&reader);
            std::thread::spawn(move || {
                let started = Instant::now();
                let err = reader.read_acquire(id).expect_err("no writer ever comes");
                (err, started.elapsed())
            })
        };
        std::thread::sleep(Duration::from_millis(100));
        reader.set_error(&id).unwrap();

        let (err, _elapsed) = blocked.join().unwrap();
        assert!(matches!(err, AxonError::ChannelClosed(_)));
        // Registration flags were cleared.
        assert!(!reader.reader_registered(&id));

        // Sticky: the next acquire fails quickly instead of blocking.
        let started = Instant::now();
        assert!(matches!(
            reader.read_acquire(id),
            Err(AxonError::ChannelClosed(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn versions_are_strictly_monotonic() {
        let id = ObjectId::random();
        let writer = participant(&id, 16, ChannelRole::Writer);
        let reader = participant(&id, 16, ChannelRole::Reader);

        let mut last = 0;
        for round in 0..3u8 {
            let mut buf = writer.write_acquire(id, 1, &[], 1).unwrap();
            buf.as_mut_slice()[0] = round;
            writer.write_release(id).unwrap();

            let (data, _) = reader.read_acquire(id).unwrap();
            assert_eq!(data.as_slice(), &[round]);
            let version = reader.header(&id).unwrap().version();
            assert!(version > last, "version {} not above {}", version, last);
            last = version;
            reader.read_release(id).unwrap();
        }
    }

    #[test]
    fn duplicate_role_registration_is_rejected() {
        let id = ObjectId::random();
        let manager = participant(&id, 16, ChannelRole::Writer);
        let duplicate = ShmAllocator::new().create_object(&id, 16).unwrap();
        let err = manager
            .register_channel(id, duplicate, ChannelRole::Writer)
            .expect_err("second writer must be rejected");
        assert!(matches!(err, AxonError::AlreadyRegistered(_)));

        // The other role is still free.
        let other = ShmAllocator::new().create_object(&id, 16).unwrap();
        manager
            .register_channel(id, other, ChannelRole::Reader)
            .unwrap();
    }

    #[test]
    fn releases_require_a_matching_acquire() {
        let id = ObjectId::random();
        let manager = participant(&id, 16, ChannelRole::Writer);
        assert!(matches!(
            manager.write_release(id),
            Err(AxonError::InvalidInput(_))
        ));
        assert!(matches!(
            manager.read_release(id),
            Err(AxonError::InvalidInput(_))
        ));
    }

    #[test]
    fn unknown_object_is_not_registered() {
        let manager = ChannelManager::with_config(fast_config());
        let id = ObjectId::random();
        assert!(matches!(
            manager.write_acquire(id, 1, &[], 1),
            Err(AxonError::NotRegistered(_))
        ));
        assert!(matches!(
            manager.read_acquire(id),
            Err(AxonError::NotRegistered(_))
        ));
        assert!(matches!(
            manager.set_error(&id),
            Err(AxonError::NotRegistered(_))
        ));
    }

    #[test]
    fn concurrent_registration_elects_one_creator() {
        let id = ObjectId::random();
        let writer = std::thread::spawn(move || participant(&id, 32, ChannelRole::Writer));
        let reader = std::thread::spawn(move || participant(&id, 32, ChannelRole::Reader));
        let writer = writer.join().unwrap();
        let reader = reader.join().unwrap();

        // Both ended up with usable semaphores and a published latch.
        assert!(writer.header(&id).unwrap().semaphores_ready());
        assert!(reader.header(&id).unwrap().semaphores_ready());

        let mut buf = writer.write_acquire(id, 1, &[], 1).unwrap();
        buf.as_mut_slice()[0] = 3;
        writer.write_release(id).unwrap();
        let (data, _) = reader.read_acquire(id).unwrap();
        assert_eq!(data.as_slice(), &[3]);
        reader.read_release(id).unwrap();
    }
}
