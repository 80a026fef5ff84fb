//! Mutable objects and the allocator that produces them.
//!
//! A `MutableObject` is the per-process view of one shared object: the
//! mapped region, a pointer to the `ObjectHeader` at its start, and the data
//! buffer that follows. Objects are produced by a `MutableObjectAllocator`;
//! the default `ShmAllocator` lays them out in an OS shared-memory region so
//! that every process naming the same object id maps the same bytes.

use std::mem;
use std::ptr::NonNull;

use crate::config::ChannelConfig;
use crate::error::{AxonError, AxonResult};
use crate::memory::object_header::ObjectHeader;
use crate::memory::shm_region::ShmRegion;
use crate::types::ObjectId;

/// Produces the shared buffer and header for an object id.
pub trait MutableObjectAllocator: Send + Sync {
    /// Map (creating if needed) the shared region backing `object_id`.
    fn get_mutable_object(&self, object_id: &ObjectId) -> AxonResult<MutableObject>;
}

/// One process's handle to a shared mutable object.
///
/// Owned uniquely by a single channel. The header and buffer pointers point
/// into the mapped segment, so they stay valid wherever the owning struct
/// moves.
pub struct MutableObject {
    region: ShmRegion,
    header: NonNull<ObjectHeader>,
    buffer: NonNull<u8>,
    allocated_size: usize,
}

// SAFETY: the pointers target OS shared memory owned by `region`; nothing is
// thread-local. Cross-thread and cross-process access is coordinated by the
// channel protocol.
unsafe impl Send for MutableObject {}

impl MutableObject {
    /// Interpret a mapped region as `[ObjectHeader][data buffer]`.
    pub fn from_region(region: ShmRegion) -> AxonResult<Self> {
        let header_size = mem::size_of::<ObjectHeader>();
        if region.size() <= header_size {
            return Err(AxonError::memory(format!(
                "region of {} bytes cannot hold a {} byte header plus data",
                region.size(),
                header_size
            )));
        }
        let base = region.as_ptr() as *mut u8;
        if (base as usize) % mem::align_of::<ObjectHeader>() != 0 {
            return Err(AxonError::memory(
                "mapped region is not aligned for the object header".to_string(),
            ));
        }
        let header = NonNull::new(base as *mut ObjectHeader)
            .ok_or_else(|| AxonError::memory("mapped region has a null base".to_string()))?;
        // SAFETY: base is non-null and header_size is within the mapping.
        let buffer = unsafe { NonNull::new_unchecked(base.add(header_size)) };
        let allocated_size = region.size() - header_size;
        Ok(Self {
            region,
            header,
            buffer,
            allocated_size,
        })
    }

    /// Capacity available for data plus metadata.
    pub fn allocated_size(&self) -> usize {
        self.allocated_size
    }

    /// The shared header at the start of the region.
    pub fn header(&self) -> &ObjectHeader {
        // SAFETY: header points into the mapping owned by self.region, which
        // lives as long as self.
        unsafe { self.header.as_ref() }
    }

    pub(crate) fn header_ptr(&self) -> NonNull<ObjectHeader> {
        self.header
    }

    pub(crate) fn buffer_ptr(&self) -> NonNull<u8> {
        self.buffer
    }
}

// ============================================================================
// Buffer views
// ============================================================================

/// Writable view of the data region handed out by a write acquire.
///
/// Valid until the matching write release: the protocol guarantees the
/// writer owns the buffer for exactly that interval.
#[derive(Debug)]
pub struct WritableBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: a raw view into shared memory; exclusivity over the bytes comes
// from the acquire/release protocol, not from the type.
unsafe impl Send for WritableBuffer {}

impl WritableBuffer {
    pub(crate) fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe bytes inside the mapped buffer owned by
        // the channel for the duration of the acquire.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; the protocol gives the writer exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/// Read-only view handed out by a read acquire, valid until the matching
/// read release.
#[derive(Debug)]
pub struct ReadableBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: see WritableBuffer.
unsafe impl Send for ReadableBuffer {}

impl ReadableBuffer {
    pub(crate) fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe bytes inside the mapped buffer; the
        // protocol keeps the writer out until every reader releases.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

// ============================================================================
// Default shared-memory allocator
// ============================================================================

/// Default allocator: one OS shared-memory region per object id.
///
/// The region name and the semaphore unique name are both derived
/// deterministically from the object id, so unrelated processes agree on
/// them with no coordination. The first process to map an id initializes the
/// header; later processes wait for the name stamp before using it.
pub struct ShmAllocator {
    config: ChannelConfig,
}

/// Region name for an object id, short enough for the strictest platform
/// name limits.
fn region_name(object_id: &ObjectId) -> String {
    format!("o{}", &object_id.to_hex()[..20])
}

/// Semaphore unique name for an object id, within the name budget once the
/// `hdr`/`obj` prefix is added.
fn derive_unique_name(object_id: &ObjectId) -> String {
    format!("ax{}", &object_id.to_hex()[..24])
}

impl ShmAllocator {
    pub fn new() -> Self {
        Self::with_config(ChannelConfig::default())
    }

    pub fn with_config(config: ChannelConfig) -> Self {
        Self { config }
    }

    /// Map `object_id` with an explicit buffer capacity, creating the region
    /// if this process is first.
    pub fn create_object(
        &self,
        object_id: &ObjectId,
        capacity: usize,
    ) -> AxonResult<MutableObject> {
        if capacity == 0 {
            return Err(AxonError::invalid_input(
                "object capacity must be non-zero".to_string(),
            ));
        }
        let total = mem::size_of::<ObjectHeader>() + capacity;
        let mut region = ShmRegion::new(&region_name(object_id), total)?;
        region.set_unlink_on_drop(self.config.unlink_on_drop);
        let object = MutableObject::from_region(region)?;

        if object.region.is_owner() {
            // SAFETY: this process created and zeroed the region; openers
            // spin on name_published before touching the header.
            unsafe { ObjectHeader::init_at(object.header, &derive_unique_name(object_id))? };
            log::debug!(
                "allocated object {} ({} byte buffer)",
                object_id,
                object.allocated_size
            );
        } else {
            let mut spins = 0u32;
            while !object.header().name_published() {
                spins += 1;
                if spins > self.config.latch_spin_limit {
                    return Err(AxonError::memory(format!(
                        "timed out waiting for object {} header initialization",
                        object_id
                    )));
                }
                std::thread::yield_now();
            }
        }
        Ok(object)
    }
}

impl Default for ShmAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl MutableObjectAllocator for ShmAllocator {
    fn get_mutable_object(&self, object_id: &ObjectId) -> AxonResult<MutableObject> {
        self.create_object(object_id, self.config.default_object_capacity)
    }
}

#[cfg(all(test, any(target_os = "linux", target_os = "macos")))]
mod tests {
    use super::*;

    #[test]
    fn allocates_header_plus_buffer() {
        let allocator = ShmAllocator::new();
        let id = ObjectId::random();
        let object = allocator.create_object(&id, 4096).unwrap();
        assert_eq!(object.allocated_size(), 4096);
        assert_eq!(
            object.header().unique_name().unwrap(),
            derive_unique_name(&id)
        );
        assert!(!object.header().has_error());
        assert_eq!(object.header().version(), 0);
    }

    #[test]
    fn second_mapping_sees_the_same_header() {
        let allocator = ShmAllocator::new();
        let id = ObjectId::random();
        let first = allocator.create_object(&id, 1024).unwrap();
        let second = allocator.create_object(&id, 1024).unwrap();
        assert_eq!(
            first.header().unique_name().unwrap(),
            second.header().unique_name().unwrap()
        );
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let allocator = ShmAllocator::new();
        assert!(allocator.create_object(&ObjectId::random(), 0).is_err());
    }

    #[test]
    fn derived_names_fit_the_budget() {
        use crate::memory::semaphore::{header_sem_name, MAX_UNIQUE_NAME_LEN, SEM_NAME_MAX};
        let id = ObjectId::random();
        let unique = derive_unique_name(&id);
        assert!(unique.len() <= MAX_UNIQUE_NAME_LEN);
        assert!(header_sem_name(&unique).len() <= SEM_NAME_MAX);
    }
}
