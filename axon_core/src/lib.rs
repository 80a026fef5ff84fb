//! # AXON Core
//!
//! Shared-memory mutable object channels for the AXON compute runtime.
//!
//! A channel streams large, repeatedly overwritten payloads from one writer
//! to a bounded set of readers through a single shared buffer:
//!
//! - **Memory**: an OS shared-memory region holding a fixed-layout
//!   [`ObjectHeader`] followed by the data buffer, synchronized by a pair of
//!   named POSIX semaphores
//! - **Channels**: the per-process [`ChannelManager`] with the versioned
//!   `write_acquire`/`write_release`/`read_acquire`/`read_release` protocol
//! - **Forwarding**: the [`MutableObjectProvider`], which pushes locally
//!   committed versions to remote nodes over an RPC transport and writes
//!   inbound pushes into local channels
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use axon_core::{ChannelManager, ChannelRole, ObjectId, ShmAllocator};
//!
//! # fn main() -> axon_core::AxonResult<()> {
//! let object_id = ObjectId::random();
//! let manager = ChannelManager::new();
//! let object = ShmAllocator::new().create_object(&object_id, 1024)?;
//! manager.register_channel(object_id, object, ChannelRole::Writer)?;
//!
//! let mut buf = manager.write_acquire(object_id, 4, b"meta", 1)?;
//! buf.as_mut_slice().copy_from_slice(&[1, 2, 3, 4]);
//! manager.write_release(object_id)?;
//! # Ok(())
//! # }
//! ```
//!
//! Every version must be acknowledged by the declared number of readers
//! before the writer can produce the next one; versions are strictly
//! monotonic per channel. Channels require named POSIX semaphores, so all
//! operations report `Unsupported` on platforms without them.

pub mod channel;
pub mod config;
pub mod error;
pub mod memory;
pub mod provider;
pub mod types;

pub use channel::{ChannelManager, ChannelRole};
pub use config::ChannelConfig;
pub use error::{AxonError, AxonResult};
pub use memory::{
    MutableObject, MutableObjectAllocator, ObjectHeader, ReadableBuffer, ShmAllocator,
    WritableBuffer,
};
pub use provider::{
    MutableObjectProvider, PushMutableObjectReply, PushMutableObjectRequest, PushReplyCallback,
    RegisterMutableObjectReply, RegisterMutableObjectRequest, RemoteReader, RemoteReaderFactory,
};
pub use types::{NodeId, ObjectId};
