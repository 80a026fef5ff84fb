//! Shared memory layer: regions, the object header protocol, named
//! semaphores, and the default object allocator.

pub(crate) mod object;
pub(crate) mod object_header;
pub(crate) mod semaphore;
pub(crate) mod shm_region;

pub use object::{
    MutableObject, MutableObjectAllocator, ReadableBuffer, ShmAllocator, WritableBuffer,
};
pub use object_header::ObjectHeader;
pub use semaphore::{SemaphorePair, MAX_UNIQUE_NAME_LEN, SEM_NAME_MAX};
pub use shm_region::ShmRegion;
