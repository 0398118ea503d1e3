//! # Snapshot Format
//!
//! Binary snapshot of one engine: a 5-byte header (magic + format
//! version) followed by a postcard payload holding the base store and
//! the id allocator. Pure byte transformation; callers own file I/O.
//!
//! Open transactions are not part of a snapshot. Deserialization
//! validates the header and payload size before touching the payload.

use crate::primitives::{FORMAT_VERSION, MAGIC_BYTES, MAX_SNAPSHOT_PAYLOAD_SIZE};
use crate::store::{IdAllocator, MemoryStore};
use crate::types::EngineError;
use crate::TopicMapEngine;
use serde::{Deserialize, Serialize};

const HEADER_SIZE: usize = MAGIC_BYTES.len() + 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    base: MemoryStore,
    alloc: IdAllocator,
}

/// Serialize the engine's committed state to bytes.
pub fn engine_to_bytes(engine: &TopicMapEngine) -> Result<Vec<u8>, EngineError> {
    let snapshot = Snapshot {
        base: engine.base.clone(),
        alloc: engine.alloc.clone(),
    };
    let payload = postcard::to_allocvec(&snapshot)
        .map_err(|e| EngineError::SerializationError(e.to_string()))?;
    if payload.len() > MAX_SNAPSHOT_PAYLOAD_SIZE {
        return Err(EngineError::SerializationError(format!(
            "snapshot payload of {} bytes exceeds the {} byte cap",
            payload.len(),
            MAX_SNAPSHOT_PAYLOAD_SIZE
        )));
    }
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(MAGIC_BYTES);
    bytes.push(FORMAT_VERSION);
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Reconstruct an engine from snapshot bytes.
pub fn engine_from_bytes(bytes: &[u8]) -> Result<TopicMapEngine, EngineError> {
    if bytes.len() < HEADER_SIZE {
        return Err(EngineError::DeserializationError(format!(
            "snapshot of {} bytes is shorter than the {HEADER_SIZE} byte header",
            bytes.len()
        )));
    }
    let (header, payload) = bytes.split_at(HEADER_SIZE);
    if header[..MAGIC_BYTES.len()] != MAGIC_BYTES[..] {
        return Err(EngineError::DeserializationError(
            "bad magic bytes".to_string(),
        ));
    }
    let version = header[MAGIC_BYTES.len()];
    if version != FORMAT_VERSION {
        return Err(EngineError::DeserializationError(format!(
            "unsupported format version {version}, expected {FORMAT_VERSION}"
        )));
    }
    if payload.len() > MAX_SNAPSHOT_PAYLOAD_SIZE {
        return Err(EngineError::DeserializationError(format!(
            "snapshot payload of {} bytes exceeds the {} byte cap",
            payload.len(),
            MAX_SNAPSHOT_PAYLOAD_SIZE
        )));
    }
    let snapshot: Snapshot = postcard::from_bytes(payload)
        .map_err(|e| EngineError::DeserializationError(e.to_string()))?;
    Ok(TopicMapEngine::from_parts(snapshot.base, snapshot.alloc))
}

// =============================================================================
// TESTS
// =============================================================================
