use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Identifier of one in-flight stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamId(uuid::Uuid);

impl StreamId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> uuid::Uuid {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Set of currently open streams, each with its cancellation token.
///
/// All mutations go through one mutex, so `cancel_all` cannot race with a
/// stream registering or finishing.
#[derive(Clone, Debug, Default)]
pub struct CancellationRegistry {
    inner: Arc<Mutex<HashMap<StreamId, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new stream and returns the guard that removes it on drop.
    pub fn register(&self) -> Registration {
        let id = StreamId::new();
        let token = CancellationToken::new();
        self.inner.lock().insert(id, token.clone());
        debug!(stream_id = %id, "stream registered");
        Registration {
            id,
            token,
            registry: self.clone(),
        }
    }

    /// Removes a stream. Returns false if it was not registered.
    pub fn unregister(&self, id: StreamId) -> bool {
        let removed = self.inner.lock().remove(&id).is_some();
        if removed {
            debug!(stream_id = %id, "stream unregistered");
        }
        removed
    }

    /// Cancels every registered stream and empties the registry.
    ///
    /// Returns how many streams were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut guard = self.inner.lock();
        let count = guard.len();
        for token in guard.values() {
            token.cancel();
        }
        guard.clear();
        drop(guard);
        if count > 0 {
            info!(count, "cancelled all open streams");
        }
        count
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.inner.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Registry membership of one stream. Dropping it unregisters the stream.
pub struct Registration {
    id: StreamId,
    token: CancellationToken,
    registry: CancellationRegistry,
}

impl Registration {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
