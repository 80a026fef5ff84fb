//! Message shapes for the cross-node mutable object RPC.
//!
//! The transport itself lives outside this crate; these are the payloads it
//! carries and the client-side trait the forwarder drives. A push carries
//! the data and metadata as one contiguous blob (data first, metadata
//! second) of exactly `data_size + metadata_size` bytes.

use serde::{Deserialize, Serialize};

use crate::error::AxonResult;
use crate::types::ObjectId;

/// Ask a node to map a remote writer's object onto one of its local
/// channels. One-shot per object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMutableObjectRequest {
    /// The object id the remote node writes to.
    pub writer_object_id: ObjectId,
    /// How many readers on the receiving node must acknowledge each version.
    pub num_readers: i64,
    /// The object id the receiving node reads from.
    pub reader_object_id: ObjectId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterMutableObjectReply {}

/// Push one version of an object to its remote readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMutableObjectRequest {
    pub object_id: ObjectId,
    pub data_size: u64,
    pub metadata_size: u64,
    /// `data ‖ metadata`, `data_size + metadata_size` bytes long.
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMutableObjectReply {
    pub done: bool,
}

/// Completion callback for an in-flight push.
pub type PushReplyCallback = Box<dyn FnOnce(AxonResult<PushMutableObjectReply>) + Send>;

/// Client side of a remote reader, as seen by the forwarding loop.
///
/// Implementations issue the RPC and invoke the callback exactly once when
/// the reply (or the failure) comes back; the forwarder keeps one push in
/// flight per channel.
pub trait RemoteReader: Send + Sync {
    fn push_mutable_object(&self, request: PushMutableObjectRequest, on_reply: PushReplyCallback);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_request_payload_is_contiguous() {
        let request = PushMutableObjectRequest {
            object_id: ObjectId::random(),
            data_size: 3,
            metadata_size: 1,
            payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
        };
        assert_eq!(
            request.payload.len() as u64,
            request.data_size + request.metadata_size
        );
        let (data, metadata) = request.payload.split_at(request.data_size as usize);
        assert_eq!(data, &[0xDE, 0xAD, 0xBE]);
        assert_eq!(metadata, &[0xEF]);
    }
}
