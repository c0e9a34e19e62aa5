//! Open-stream bookkeeping for the loop thread.
//!
//! [`StreamRegistry`] maps a [`StreamId`] to the metadata of one open stream.
//! It has no locking of its own: the engine only ever touches it from the
//! loop thread. The registry is generic over the file type so that it can be
//! exercised without touching the filesystem.

use crate::error::StreamError;
use fxhash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Opaque stream identifier. Allocated monotonically and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(u64);

impl StreamId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The id as the signed integer used in callback payloads.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }
}

impl From<u64> for StreamId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notification delivered to a stream's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// The stream's first file is open and the stream is registered under `id`.
    Created { id: StreamId },
    /// Periodic report of the current file and its size since open or rotation.
    Progress { descriptor: i64, bytes_written: u64 },
}

impl StreamEvent {
    /// Sentinel size carried by [`StreamEvent::Created`] in its raw form.
    pub const CREATED_SENTINEL: i64 = -1;

    /// The `(id or descriptor, sentinel or size)` pair of this event.
    #[must_use]
    pub fn raw(self) -> (i64, i64) {
        match self {
            Self::Created { id } => (id.as_i64(), Self::CREATED_SENTINEL),
            Self::Progress { descriptor, bytes_written } => {
                (descriptor, i64::try_from(bytes_written).unwrap_or(i64::MAX))
            },
        }
    }
}

/// Per-stream callback, invoked on the loop thread.
pub type StreamCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Ownership state of a stream's file.
#[derive(Debug)]
pub enum FileSlot<F> {
    /// The file is idle and owned by the registry.
    Ready(F),
    /// A native operation currently owns the file.
    Busy,
    /// The file was lost to a failed rotation or a failed write task; writes are rejected.
    Degraded,
}

impl<F> FileSlot<F> {
    /// Moves a ready file out, leaving the slot busy.
    pub fn take(&mut self) -> Option<F> {
        match std::mem::replace(self, Self::Busy) {
            Self::Ready(file) => Some(file),
            other => {
                *self = other;
                None
            },
        }
    }

    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded)
    }
}

/// Metadata of one open stream.
pub struct StreamHandle<F> {
    pub name: String,
    pub descriptor: i64,
    pub bytes_written: u64,
    pub file: FileSlot<F>,
    on_event: StreamCallback,
}

impl<F> StreamHandle<F> {
    pub fn new(
        name: impl Into<String>,
        descriptor: i64,
        file: F,
        on_event: StreamCallback,
    ) -> Self {
        Self { name: name.into(), descriptor, bytes_written: 0, file: FileSlot::Ready(file), on_event }
    }

    /// Calls the stream's callback with `event`.
    pub fn notify(&self, event: StreamEvent) {
        (self.on_event)(event);
    }

    fn report_progress(&self) {
        self.notify(StreamEvent::Progress {
            descriptor: self.descriptor,
            bytes_written: self.bytes_written,
        });
    }
}

impl<F> fmt::Debug for StreamHandle<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .field("bytes_written", &self.bytes_written)
            .field("degraded", &self.file.is_degraded())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct StreamRegistry<F> {
    streams: FxHashMap<StreamId, StreamHandle<F>>,
    next_id: u64,
}

impl<F> Default for StreamRegistry<F> {
    fn default() -> Self {
        Self { streams: FxHashMap::default(), next_id: 0 }
    }
}

impl<F> StreamRegistry<F> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under a freshly allocated id.
    pub fn add(&mut self, handle: StreamHandle<F>) -> StreamId {
        let id = StreamId(self.next_id);
        self.next_id += 1;
        self.streams.insert(id, handle);
        id
    }

    #[must_use]
    pub fn exists(&self, id: StreamId) -> bool {
        self.streams.contains_key(&id)
    }

    /// # Errors
    /// Returns [`StreamError::UnknownStream`] if `id` is not registered.
    pub fn get(&self, id: StreamId) -> Result<&StreamHandle<F>, StreamError> {
        self.streams.get(&id).ok_or(StreamError::UnknownStream { id })
    }

    /// # Errors
    /// Returns [`StreamError::UnknownStream`] if `id` is not registered.
    pub fn get_mut(&mut self, id: StreamId) -> Result<&mut StreamHandle<F>, StreamError> {
        self.streams.get_mut(&id).ok_or(StreamError::UnknownStream { id })
    }

    pub fn remove(&mut self, id: StreamId) -> Option<StreamHandle<F>> {
        self.streams.remove(&id)
    }

    /// Descriptors of every registered stream.
    #[must_use]
    pub fn descriptors(&self) -> Vec<i64> {
        self.streams.values().map(|handle| handle.descriptor).collect()
    }

    /// Reports `(descriptor, bytes_written)` to every stream's callback.
    pub fn notify_all(&self) {
        for handle in self.streams.values() {
            handle.report_progress();
        }
    }

    /// Removes and yields every registered stream. Id allocation is unaffected.
    pub fn drain(&mut self) -> impl Iterator<Item = (StreamId, StreamHandle<F>)> + '_ {
        self.streams.drain()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop() -> StreamCallback {
        Arc::new(|_| {})
    }

    fn handle(name: &str, descriptor: i64) -> StreamHandle<()> {
        StreamHandle::new(name, descriptor, (), noop())
    }

    #[test]
    fn test_add_remove_and_count() {
        let mut registry = StreamRegistry::new();

        registry.add(handle("first", 1));
        assert_eq!(registry.len(), 1);

        let id = registry.add(handle("second", 2));
        registry.add(handle("third", 3));
        assert!(registry.exists(id));
        assert_eq!(registry.len(), 3);

        assert!(registry.remove(id).is_some());
        assert_eq!(registry.len(), 2);
        assert!(registry.remove(StreamId::from(99)).is_none());
        assert_eq!(registry.len(), 2);

        let id = registry.add(handle("TestName", 1));
        let stored = registry.get(id).unwrap();
        assert_eq!(stored.name, "TestName");
        assert_eq!(stored.descriptor, 1);
        assert_eq!(stored.bytes_written, 0);
    }

    #[test]
    fn test_get_unknown_id_fails() {
        let mut registry: StreamRegistry<()> = StreamRegistry::new();
        let err = registry.get(StreamId::from(5)).unwrap_err();
        assert!(matches!(err, StreamError::UnknownStream { id } if id == StreamId::from(5)));
        assert!(registry.get_mut(StreamId::from(5)).is_err());
    }

    #[test]
    fn test_ids_are_not_reused_after_removal() {
        let mut registry = StreamRegistry::new();
        let first = registry.add(handle("a", 1));
        registry.remove(first);
        let second = registry.add(handle("b", 2));
        assert_ne!(first, second);
        assert!(second > first);
    }

    #[test]
    fn test_descriptors_follow_membership() {
        let mut registry = StreamRegistry::new();

        let id = registry.add(handle("TestName", 4));
        registry.add(handle("TestName2", 2));
        registry.add(handle("TestName3", 8));

        let mut descriptors = registry.descriptors();
        descriptors.sort_unstable();
        assert_eq!(descriptors, vec![2, 4, 8]);

        registry.remove(id);
        registry.add(handle("TestName4", 9));

        let mut descriptors = registry.descriptors();
        descriptors.sort_unstable();
        assert_eq!(descriptors, vec![2, 8, 9]);
    }

    #[test]
    fn test_notify_all_reaches_every_stream() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = StreamRegistry::new();

        for descriptor in [3, 5, 7] {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            let callback: StreamCallback = Arc::new(move |event| {
                calls.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push(event);
            });
            let id = registry.add(StreamHandle::new("s", descriptor, (), callback));
            registry.get_mut(id).unwrap().bytes_written = 10;
        }

        registry.notify_all();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_by_key(|event| event.raw().0);
        assert_eq!(
            seen,
            vec![
                StreamEvent::Progress { descriptor: 3, bytes_written: 10 },
                StreamEvent::Progress { descriptor: 5, bytes_written: 10 },
                StreamEvent::Progress { descriptor: 7, bytes_written: 10 },
            ]
        );
    }

    #[test]
    fn test_drain_empties_registry() {
        let mut registry = StreamRegistry::new();
        registry.add(handle("a", 1));
        registry.add(handle("b", 2));

        let drained: Vec<_> = registry.drain().collect();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
        assert!(registry.descriptors().is_empty());
    }

    #[test]
    fn test_file_slot_take_and_degraded() {
        let mut slot = FileSlot::Ready(1u8);
        assert_eq!(slot.take(), Some(1));
        assert!(matches!(slot, FileSlot::Busy));
        assert_eq!(slot.take(), None);

        let mut slot: FileSlot<u8> = FileSlot::Degraded;
        assert_eq!(slot.take(), None);
        assert!(slot.is_degraded());
    }

    #[test]
    fn test_created_event_raw_form_uses_sentinel() {
        let event = StreamEvent::Created { id: StreamId::from(3) };
        assert_eq!(event.raw(), (3, -1));
        let event = StreamEvent::Progress { descriptor: 9, bytes_written: 14 };
        assert_eq!(event.raw(), (9, 14));
    }
}
