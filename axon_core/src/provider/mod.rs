//! Cross-node transfer of mutable objects.
//!
//! The provider wires the allocator into the channel manager and moves
//! object versions between nodes:
//!
//! - **Outbound**: `register_writer_channel` starts a poll loop that
//!   acquires each locally produced version, pushes it to the remote reader
//!   via the transport client, and releases once the push is acknowledged.
//!   One push is in flight per channel, which is also the backpressure.
//! - **Inbound**: `handle_register_mutable_object` maps a remote writer's
//!   object onto a local channel; `handle_push_mutable_object` writes each
//!   pushed version into that channel.
//!
//! Each outbound channel gets its own dedicated worker thread because the
//! acquire blocks on a cross-process semaphore; a shared executor would
//! starve every other channel. This is a known scaling limit of the design.

pub(crate) mod protocol;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::Sender;
use parking_lot::Mutex;

use crate::axon_internal;
use crate::channel::{ChannelManager, ChannelRole};
use crate::config::ChannelConfig;
use crate::error::{AxonError, AxonResult};
use crate::memory::object::MutableObjectAllocator;
use crate::types::{NodeId, ObjectId};

pub use protocol::{
    PushMutableObjectReply, PushMutableObjectRequest, PushReplyCallback,
    RegisterMutableObjectReply, RegisterMutableObjectRequest, RemoteReader,
};

/// Builds the transport client for a destination node.
pub type RemoteReaderFactory =
    Arc<dyn Fn(&NodeId) -> AxonResult<Arc<dyn RemoteReader>> + Send + Sync>;

/// Where pushes for a remote object land locally.
#[derive(Debug, Clone, Copy)]
struct LocalInfo {
    num_readers: i64,
    local_object_id: ObjectId,
}

type PollTask = Box<dyn FnOnce() + Send>;

/// A dedicated worker draining poll closures for one outbound channel.
struct PollExecutor {
    queue: Sender<PollTask>,
    worker: JoinHandle<()>,
}

impl PollExecutor {
    fn spawn(name: String) -> AxonResult<Self> {
        let (queue, tasks) = crossbeam::channel::unbounded::<PollTask>();
        let worker = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                while let Ok(task) = tasks.recv() {
                    task();
                }
            })
            .map_err(|e| axon_internal!("failed to spawn poll thread: {}", e))?;
        Ok(Self { queue, worker })
    }

    fn sender(&self) -> Sender<PollTask> {
        self.queue.clone()
    }

    /// Close the queue and wait for the worker to drain and exit.
    fn join(self) {
        drop(self.queue);
        let _ = self.worker.join();
    }
}

/// Coordinates mutable object transfer between this node and its peers.
pub struct MutableObjectProvider {
    manager: Arc<ChannelManager>,
    allocator: Arc<dyn MutableObjectAllocator>,
    reader_factory: RemoteReaderFactory,
    cross_node_map: Mutex<HashMap<ObjectId, LocalInfo>>,
    pollers: Mutex<HashMap<ObjectId, PollExecutor>>,
}

impl MutableObjectProvider {
    pub fn new(allocator: Arc<dyn MutableObjectAllocator>, reader_factory: RemoteReaderFactory) -> Self {
        Self::with_config(allocator, reader_factory, ChannelConfig::default())
    }

    pub fn with_config(
        allocator: Arc<dyn MutableObjectAllocator>,
        reader_factory: RemoteReaderFactory,
        config: ChannelConfig,
    ) -> Self {
        Self {
            manager: Arc::new(ChannelManager::with_config(config)),
            allocator,
            reader_factory,
            cross_node_map: Mutex::new(HashMap::new()),
            pollers: Mutex::new(HashMap::new()),
        }
    }

    /// The channel manager backing this provider.
    pub fn manager(&self) -> &Arc<ChannelManager> {
        &self.manager
    }

    /// Register a writer channel for `object_id` on this node. Every version
    /// committed to the channel is forwarded to node `node_id`.
    ///
    /// The registration claims the writer role; the poll loop then drains
    /// the channel through the read side of the protocol, acting as the
    /// object's local reader on behalf of the remote node.
    pub fn register_writer_channel(
        &self,
        object_id: ObjectId,
        node_id: &NodeId,
    ) -> AxonResult<()> {
        let object = self.allocator.get_mutable_object(&object_id)?;
        self.manager
            .register_channel(object_id, object, ChannelRole::Writer)?;

        let remote = (self.reader_factory)(node_id)?;
        // One worker per outbound channel: the acquire below blocks on a
        // cross-process semaphore.
        let executor = PollExecutor::spawn(format!("axon-poll-{}", &object_id.to_hex()[..8]))?;
        let queue = executor.sender();
        self.pollers.lock().insert(object_id, executor);

        log::info!("forwarding object {} to node {}", object_id, node_id);
        post_poll(Arc::clone(&self.manager), queue, object_id, remote);
        Ok(())
    }

    /// Register a reader channel for `object_id` on this node.
    pub fn register_reader_channel(&self, object_id: ObjectId) -> AxonResult<()> {
        let object = self.allocator.get_mutable_object(&object_id)?;
        self.manager
            .register_channel(object_id, object, ChannelRole::Reader)
    }

    /// Handle a peer's request to map its `remote_object_id` onto
    /// `local_object_id` on this node. One-shot per remote object.
    pub fn handle_register_mutable_object(
        &self,
        remote_object_id: ObjectId,
        num_readers: i64,
        local_object_id: ObjectId,
    ) -> AxonResult<RegisterMutableObjectReply> {
        {
            let mut map = self.cross_node_map.lock();
            if map.contains_key(&remote_object_id) {
                return Err(AxonError::AlreadyRegistered(format!(
                    "remote object {} is already mapped",
                    remote_object_id
                )));
            }
            map.insert(
                remote_object_id,
                LocalInfo {
                    num_readers,
                    local_object_id,
                },
            );
        }
        self.register_reader_channel(local_object_id)?;
        log::debug!(
            "mapped remote object {} onto local object {} ({} readers)",
            remote_object_id,
            local_object_id,
            num_readers
        );
        Ok(RegisterMutableObjectReply {})
    }

    /// Handle a pushed version of a remote object: write its payload into
    /// the mapped local channel.
    pub fn handle_push_mutable_object(
        &self,
        request: PushMutableObjectRequest,
    ) -> AxonResult<PushMutableObjectReply> {
        let info = self
            .cross_node_map
            .lock()
            .get(&request.object_id)
            .copied()
            .ok_or_else(|| {
                AxonError::NotRegistered(format!(
                    "remote object {} has no local mapping",
                    request.object_id
                ))
            })?;

        let data_size = request.data_size as usize;
        let metadata_size = request.metadata_size as usize;
        if request.payload.len() != data_size + metadata_size {
            return Err(AxonError::invalid_input(format!(
                "push payload is {} bytes, expected data ({}) + metadata ({})",
                request.payload.len(),
                data_size,
                metadata_size
            )));
        }
        let (data_bytes, metadata_bytes) = request.payload.split_at(data_size);

        let mut buffer = self.manager.write_acquire(
            info.local_object_id,
            data_size,
            metadata_bytes,
            info.num_readers,
        )?;
        buffer.as_mut_slice().copy_from_slice(data_bytes);
        self.manager.write_release(info.local_object_id)?;
        Ok(PushMutableObjectReply { done: true })
    }

    /// Stop forwarding: error every channel (unblocking any poll loop stuck
    /// in an acquire), then drain and join the poll workers. Idempotent.
    pub fn shutdown(&self) {
        if let Err(e) = self.manager.set_error_all() {
            log::warn!("error while tearing down channels: {}", e);
        }
        let executors: Vec<PollExecutor> = {
            let mut pollers = self.pollers.lock();
            pollers.drain().map(|(_, executor)| executor).collect()
        };
        let stopped = executors.len();
        for executor in executors {
            executor.join();
        }
        if stopped > 0 {
            log::info!("stopped {} forwarding loop(s)", stopped);
        }
    }
}

impl Drop for MutableObjectProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Queue the next poll iteration for one outbound channel.
///
/// The posted closure acquires the next version, pushes it, and re-posts
/// itself from the push completion callback after releasing — so exactly one
/// RPC is in flight per channel. A closed channel ends the loop.
fn post_poll(
    manager: Arc<ChannelManager>,
    queue: Sender<PollTask>,
    object_id: ObjectId,
    remote: Arc<dyn RemoteReader>,
) {
    let task_queue = queue.clone();
    let task: PollTask = Box::new(move || {
        let (data, metadata) = match manager.read_acquire(object_id) {
            Ok(buffers) => buffers,
            Err(e) if e.is_channel_closed() => {
                log::debug!("forwarding loop for object {} stopped", object_id);
                return;
            }
            Err(e) => {
                log::warn!("forwarding loop for object {} failed: {}", object_id, e);
                return;
            }
        };

        let mut payload = Vec::with_capacity(data.len() + metadata.len());
        payload.extend_from_slice(data.as_slice());
        payload.extend_from_slice(metadata.as_slice());
        let request = PushMutableObjectRequest {
            object_id,
            data_size: data.len() as u64,
            metadata_size: metadata.len() as u64,
            payload,
        };

        let reply_manager = Arc::clone(&manager);
        let reply_remote = Arc::clone(&remote);
        let reply_queue = task_queue.clone();
        remote.push_mutable_object(
            request,
            Box::new(move |reply| {
                if let Err(e) = reply {
                    log::warn!("push of object {} was not acknowledged: {}", object_id, e);
                }
                if let Err(e) = reply_manager.read_release(object_id) {
                    if !e.is_channel_closed() {
                        log::warn!("release after push of object {} failed: {}", object_id, e);
                    }
                    return;
                }
                post_poll(reply_manager, reply_queue, object_id, reply_remote);
            }),
        );
    });
    // A closed queue means the provider is shutting down; drop the task.
    let _ = queue.send(task);
}
