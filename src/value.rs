//! Thread-safe byte buffer backing a member's value, with on-update and
//! on-change callback fan-out.

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicI32, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::serialize::{Deserializer, Serializer};

/// Handle identifying a registered value callback. Handles are unique within
/// their entity and always positive; 0 is reserved invalid.
pub type CallbackHandle = i32;

/// Reserved handle that never identifies a registered callback.
pub const INVALID_CALLBACK_HANDLE: CallbackHandle = 0;

/// Selects which fan-out list a value callback joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueUpdateMode {
    /// Invoked only when a write actually changed the bytes.
    OnChange,
    /// Invoked on every successful write.
    OnUpdate,
}

pub type ValueCallback = std::sync::Arc<dyn Fn(&ValueEntity) + Send + Sync>;

#[derive(Default)]
struct CallbackLists {
    on_change: Vec<(CallbackHandle, ValueCallback)>,
    on_update: Vec<(CallbackHandle, ValueCallback)>,
}

/// Serialized value storage of a member.
///
/// Every successful [`set_data`](Self::set_data) emits an on-update event; it
/// additionally emits an on-change event iff the new bytes differ from the old
/// ones. Callbacks run in registration order with no internal lock held, so
/// they may freely register or unregister further callbacks and set values.
pub struct ValueEntity {
    data: Mutex<Vec<u8>>,
    callbacks: Mutex<CallbackLists>,
    next_handle: AtomicI32,
    /// Serializes codec access from `begin` through `end`.
    codec_lock: Mutex<()>,
}

impl Default for ValueEntity {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueEntity {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Vec::new()),
            callbacks: Mutex::new(CallbackLists::default()),
            next_handle: AtomicI32::new(1),
            codec_lock: Mutex::new(()),
        }
    }

    /// Replaces the buffer and fans out to the registered callbacks:
    /// on-change first (only if the bytes differ), then on-update.
    ///
    /// The callback lists are snapshotted before dispatch so callbacks can
    /// mutate the registration state of the very entity that invoked them.
    pub fn set_data(&self, new_data: Vec<u8>) {
        let changed = {
            let mut data = self.data.lock();
            if *data != new_data {
                *data = new_data;
                true
            } else {
                false
            }
        };

        let (on_change, on_update) = {
            let lists = self.callbacks.lock();
            (
                changed.then(|| lists.on_change.clone()),
                lists.on_update.clone(),
            )
        };
        if let Some(on_change) = on_change {
            for (_, callback) in &on_change {
                callback(self);
            }
        }
        for (_, callback) in &on_update {
            callback(self);
        }
    }

    /// Returns an owned copy of the buffer.
    pub fn copy_data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Timestamp of the last update. Currently always 0; no clock writes it.
    pub fn last_update_time(&self) -> i64 {
        0
    }

    /// Timestamp of the last change. Currently always 0; no clock writes it.
    pub fn last_change_time(&self) -> i64 {
        0
    }

    /// Registers `callback` on the list selected by `mode` and returns its
    /// handle (always ≥ 1).
    pub fn register_callback(&self, callback: ValueCallback, mode: ValueUpdateMode) -> CallbackHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let mut lists = self.callbacks.lock();
        match mode {
            ValueUpdateMode::OnChange => lists.on_change.push((handle, callback)),
            ValueUpdateMode::OnUpdate => lists.on_update.push((handle, callback)),
        }
        handle
    }

    /// Removes the callback registered under `handle` from both lists.
    /// Unknown handles (including [`INVALID_CALLBACK_HANDLE`]) are ignored.
    pub fn unregister_callback(&self, handle: CallbackHandle) {
        if handle == INVALID_CALLBACK_HANDLE {
            debug!("ignoring unregister of the invalid callback handle");
            return;
        }
        let mut lists = self.callbacks.lock();
        lists.on_update.retain(|(h, _)| *h != handle);
        lists.on_change.retain(|(h, _)| *h != handle);
    }

    /// Starts serializing a new value. The returned guard owns the entity's
    /// codec lock until it is consumed; [`ValueSerializer::end`] commits the
    /// collected bytes via [`set_data`](Self::set_data).
    pub fn serializer(&self) -> ValueSerializer<'_> {
        ValueSerializer {
            entity: self,
            _guard: self.codec_lock.lock(),
            inner: Serializer::new(),
        }
    }

    /// Starts deserializing the current value from an owned copy of the
    /// buffer. The returned guard owns the entity's codec lock until dropped.
    pub fn deserializer(&self) -> ValueDeserializer<'_> {
        let guard = self.codec_lock.lock();
        let inner = Deserializer::new(self.copy_data());
        ValueDeserializer {
            _guard: guard,
            inner,
        }
    }
}

/// Write half of a value entity's codec pair. Dropping the guard without
/// calling [`end`](Self::end) abandons the write.
pub struct ValueSerializer<'a> {
    entity: &'a ValueEntity,
    _guard: MutexGuard<'a, ()>,
    inner: Serializer,
}

impl ValueSerializer<'_> {
    /// Commits the serialized bytes to the entity and releases the codec lock.
    pub fn end(self) {
        self.entity.set_data(self.inner.finish());
    }
}

impl Deref for ValueSerializer<'_> {
    type Target = Serializer;

    fn deref(&self) -> &Serializer {
        &self.inner
    }
}

impl DerefMut for ValueSerializer<'_> {
    fn deref_mut(&mut self) -> &mut Serializer {
        &mut self.inner
    }
}

/// Read half of a value entity's codec pair.
pub struct ValueDeserializer<'a> {
    _guard: MutexGuard<'a, ()>,
    inner: Deserializer,
}

impl ValueDeserializer<'_> {
    /// Releases the codec lock.
    pub fn end(self) {}
}

impl Deref for ValueDeserializer<'_> {
    type Target = Deserializer;

    fn deref(&self) -> &Deserializer {
        &self.inner
    }
}

impl DerefMut for ValueDeserializer<'_> {
    fn deref_mut(&mut self) -> &mut Deserializer {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter_callback(counter: &Arc<AtomicUsize>) -> ValueCallback {
        let counter = Arc::clone(counter);
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn changed_write_fires_on_change_then_on_update_once_each() {
        let entity = ValueEntity::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = Arc::clone(&order);
        entity.register_callback(
            Arc::new(move |_| o.lock().push("change")),
            ValueUpdateMode::OnChange,
        );
        let o = Arc::clone(&order);
        entity.register_callback(
            Arc::new(move |_| o.lock().push("update")),
            ValueUpdateMode::OnUpdate,
        );

        entity.set_data(vec![1, 0, 0, 0]);
        assert_eq!(*order.lock(), vec!["change", "update"]);
    }

    #[test]
    fn unchanged_write_fires_only_on_update() {
        let entity = ValueEntity::new();
        let changes = Arc::new(AtomicUsize::new(0));
        let updates = Arc::new(AtomicUsize::new(0));
        entity.register_callback(counter_callback(&changes), ValueUpdateMode::OnChange);
        entity.register_callback(counter_callback(&updates), ValueUpdateMode::OnUpdate);

        entity.set_data(vec![1, 0, 0, 0]);
        entity.set_data(vec![1, 0, 0, 0]);
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert_eq!(updates.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let entity = ValueEntity::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let o = Arc::clone(&order);
            entity.register_callback(Arc::new(move |_| o.lock().push(i)), ValueUpdateMode::OnUpdate);
        }
        entity.set_data(vec![42]);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn unregister_removes_from_both_lists() {
        let entity = ValueEntity::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = entity.register_callback(counter_callback(&hits), ValueUpdateMode::OnChange);
        assert!(handle >= 1);
        entity.unregister_callback(handle);
        entity.set_data(vec![1]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handles_are_unique_per_entity() {
        let entity = ValueEntity::new();
        let a = entity.register_callback(Arc::new(|_| {}), ValueUpdateMode::OnUpdate);
        let b = entity.register_callback(Arc::new(|_| {}), ValueUpdateMode::OnChange);
        assert_ne!(a, b);
        assert_ne!(a, INVALID_CALLBACK_HANDLE);
        assert_ne!(b, INVALID_CALLBACK_HANDLE);
    }

    #[test]
    fn callback_may_register_another_callback_without_deadlock() {
        let entity = Arc::new(ValueEntity::new());
        let late = Arc::new(AtomicUsize::new(0));
        let entity2 = Arc::clone(&entity);
        let late2 = Arc::clone(&late);
        entity.register_callback(
            Arc::new(move |_| {
                entity2.register_callback(counter_callback(&late2), ValueUpdateMode::OnUpdate);
            }),
            ValueUpdateMode::OnUpdate,
        );

        entity.set_data(vec![1]);
        // The late registration sees the next write, not the one in flight.
        entity.set_data(vec![2]);
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn serializer_commits_through_set_data() {
        let entity = ValueEntity::new();
        let updates = Arc::new(AtomicUsize::new(0));
        entity.register_callback(counter_callback(&updates), ValueUpdateMode::OnUpdate);

        let mut ser = entity.serializer();
        ser.write_i32(42, 32);
        ser.end();

        assert_eq!(entity.copy_data(), vec![42, 0, 0, 0]);
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        let mut de = entity.deserializer();
        assert_eq!(de.read_i32(32).unwrap(), 42);
    }

    #[test]
    fn abandoned_serializer_leaves_the_value_untouched() {
        let entity = ValueEntity::new();
        entity.set_data(vec![7]);
        {
            let mut ser = entity.serializer();
            ser.write_u8(99, 8);
            // dropped without end()
        }
        assert_eq!(entity.copy_data(), vec![7]);
    }
}
