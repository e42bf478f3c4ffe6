use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use agriconnect_core::AggregateId;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("event payload does not match its envelope: {0}")]
    Mismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Last applied sequence number per stream.
#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<AggregateId, u64>>,
}

impl StreamCursors {
    pub fn get(&self, aggregate_id: AggregateId) -> u64 {
        match self.inner.read() {
            Ok(map) => map.get(&aggregate_id).copied().unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// `Ok(true)` when `seq` is the next event to apply, `Ok(false)` for a
    /// duplicate. A stream first seen mid-way is accepted from that point.
    pub fn admit(&self, aggregate_id: AggregateId, seq: u64) -> Result<bool, ProjectionError> {
        let last = self.get(aggregate_id);
        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(false);
        }
        if last != 0 && seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        Ok(true)
    }

    pub fn advance(&self, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(aggregate_id, seq);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut map) = self.inner.write() {
            map.clear();
        }
    }
}
