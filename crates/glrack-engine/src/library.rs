//! Shader registry shared by every module in a patch.
//!
//! Publishers own an append-only list of named shader pairs. Subscribers point
//! at one entry of one publisher by `(publisher, index)`. The registry is an
//! explicitly constructed value handed around as `Arc<ShaderLibrary>`; a single
//! `RwLock` guards both maps so readers always see a consistent pair.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::EngineError;
use crate::events::{EngineEvent, EventTx};
use crate::{logi, logw};

/// Stable identity of a module instance in the patch.
pub type ModuleId = i64;

const TAG: &str = "LIB";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderPair {
    pub name: String,
    pub vertex_source: String,
    pub fragment_source: String,
    pub is_valid: bool,
    pub error_log: String,
}

impl ShaderPair {
    /// A pair is considered valid until a compile says otherwise.
    pub fn new(
        name: impl Into<String>,
        vertex_source: impl Into<String>,
        fragment_source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            vertex_source: vertex_source.into(),
            fragment_source: fragment_source.into(),
            is_valid: true,
            error_log: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub publisher_id: ModuleId,
    pub shader_index: i32,
    /// Computed once at subscribe time and never re-checked.
    pub is_valid: bool,
}

#[derive(Debug, Default)]
struct Registry {
    publishers: BTreeMap<ModuleId, Vec<ShaderPair>>,
    subscriptions: HashMap<ModuleId, Subscription>,
}

impl Registry {
    fn index_in_bounds(&self, publisher: ModuleId, index: i32) -> bool {
        self.publishers
            .get(&publisher)
            .map(|list| index >= 0 && (index as usize) < list.len())
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
pub struct ShaderLibrary {
    inner: RwLock<Registry>,
    events: EventTx,
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: EventTx) -> Self {
        Self {
            inner: RwLock::default(),
            events,
        }
    }

    // The maps only hold plain values, so a panic elsewhere cannot leave them torn.
    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty list for `id` if it has none. Idempotent.
    pub fn register_publisher(&self, id: ModuleId) {
        let mut reg = self.write();
        if !reg.publishers.contains_key(&id) {
            reg.publishers.insert(id, Vec::new());
            logi!(TAG, "registered publisher {id}");
        }
    }

    /// Drop a publisher and its shaders. Subscriptions pointing at it are left
    /// as they are and simply stop resolving.
    pub fn remove_publisher(&self, id: ModuleId) {
        if self.write().publishers.remove(&id).is_some() {
            logi!(TAG, "removed publisher {id}");
        }
    }

    /// Append a pair to `publisher`'s list and return its index.
    pub fn add_shader(&self, publisher: ModuleId, pair: ShaderPair) -> Result<usize, EngineError> {
        let name = pair.name.clone();
        let index = {
            let mut reg = self.write();
            let Some(list) = reg.publishers.get_mut(&publisher) else {
                logw!(TAG, "cannot add shader '{name}': publisher {publisher} is not registered");
                return Err(EngineError::UnregisteredPublisher { publisher });
            };
            list.push(pair);
            list.len() - 1
        };
        logi!(TAG, "publisher {publisher} added shader #{index} '{name}'");
        self.events.emit(EngineEvent::Published { publisher, index, name });
        Ok(index)
    }

    /// Record that `subscriber` follows `publisher[index]`.
    ///
    /// The subscription is stored even when it points nowhere.
    pub fn subscribe(&self, subscriber: ModuleId, publisher: ModuleId, index: i32) -> Subscription {
        let sub = {
            let mut reg = self.write();
            let sub = Subscription {
                publisher_id: publisher,
                shader_index: index,
                is_valid: reg.index_in_bounds(publisher, index),
            };
            reg.subscriptions.insert(subscriber, sub);
            sub
        };

        if sub.is_valid {
            logi!(TAG, "module {subscriber} subscribed to publisher {publisher} shader #{index}");
        } else {
            logw!(
                TAG,
                "module {subscriber} stored an invalid subscription to publisher {publisher} shader #{index}"
            );
        }
        self.events.emit(EngineEvent::Subscribed {
            subscriber,
            publisher,
            index,
            valid: sub.is_valid,
        });
        sub
    }

    pub fn subscription(&self, subscriber: ModuleId) -> Option<Subscription> {
        self.read().subscriptions.get(&subscriber).copied()
    }

    /// Resolve the pair `subscriber` currently follows.
    ///
    /// Everything is checked again on each call: the subscription exists, its
    /// publisher is still registered, the index is in range and the pair is valid.
    pub fn shader_for_module(&self, subscriber: ModuleId) -> Option<ShaderPair> {
        let reg = self.read();
        let Some(sub) = reg.subscriptions.get(&subscriber) else {
            logw!(TAG, "module {subscriber} has no subscription");
            return None;
        };
        let Some(list) = reg.publishers.get(&sub.publisher_id) else {
            logw!(
                TAG,
                "module {subscriber} follows publisher {} which is not registered",
                sub.publisher_id
            );
            return None;
        };
        if sub.shader_index < 0 || sub.shader_index as usize >= list.len() {
            logw!(
                TAG,
                "module {subscriber} follows shader #{} but publisher {} has {}",
                sub.shader_index,
                sub.publisher_id,
                list.len()
            );
            return None;
        }
        let pair = &list[sub.shader_index as usize];
        if !pair.is_valid {
            logw!(TAG, "module {subscriber} follows shader '{}' which failed to compile", pair.name);
            return None;
        }
        Some(pair.clone())
    }

    pub fn shaders_for_publisher(&self, publisher: ModuleId) -> Option<Vec<ShaderPair>> {
        self.read().publishers.get(&publisher).cloned()
    }

    /// Registered publishers in ascending id order.
    pub fn publisher_ids(&self) -> Vec<ModuleId> {
        self.read().publishers.keys().copied().collect()
    }

    pub fn is_valid_subscription(&self, publisher: ModuleId, index: i32) -> bool {
        self.read().index_in_bounds(publisher, index)
    }

    /// Update the compile verdict of an existing pair. Returns false when the
    /// entry does not exist.
    pub fn set_validity(&self, publisher: ModuleId, index: usize, is_valid: bool, error_log: String) -> bool {
        let mut reg = self.write();
        match reg.publishers.get_mut(&publisher).and_then(|l| l.get_mut(index)) {
            Some(pair) => {
                pair.is_valid = is_valid;
                pair.error_log = error_log;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(name: &str) -> ShaderPair {
        ShaderPair::new(name, "void main() {}", "void main() {}")
    }

    #[test]
    fn add_shader_appends_and_keeps_indices() {
        let lib = ShaderLibrary::new();
        lib.register_publisher(7);
        assert_eq!(lib.add_shader(7, pair("a")).unwrap(), 0);
        assert_eq!(lib.add_shader(7, pair("b")).unwrap(), 1);
        assert_eq!(lib.add_shader(7, pair("c")).unwrap(), 2);

        let names: Vec<_> = lib
            .shaders_for_publisher(7)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn register_is_idempotent() {
        let lib = ShaderLibrary::new();
        lib.register_publisher(1);
        lib.add_shader(1, pair("keep")).unwrap();
        lib.register_publisher(1);
        assert_eq!(lib.shaders_for_publisher(1).unwrap().len(), 1);
    }

    #[test]
    fn add_to_unregistered_publisher_is_rejected() {
        let lib = ShaderLibrary::new();
        let err = lib.add_shader(3, pair("x")).unwrap_err();
        assert!(matches!(err, EngineError::UnregisteredPublisher { publisher: 3 }));
        assert!(lib.shaders_for_publisher(3).is_none());
        assert!(lib.publisher_ids().is_empty());
    }

    #[test]
    fn subscribe_stores_even_invalid_subscriptions() {
        let lib = ShaderLibrary::new();
        lib.register_publisher(10);
        lib.add_shader(10, pair("a")).unwrap();

        let ok = lib.subscribe(1, 10, 0);
        assert!(ok.is_valid);
        assert_eq!(lib.subscription(1), Some(ok));

        let bad = lib.subscribe(2, 999, 0);
        assert!(!bad.is_valid);
        assert_eq!(
            lib.subscription(2),
            Some(Subscription { publisher_id: 999, shader_index: 0, is_valid: false })
        );

        let out_of_range = lib.subscribe(3, 10, 5);
        assert!(!out_of_range.is_valid);
        assert!(!lib.subscribe(4, 10, -1).is_valid);
    }

    #[test]
    fn shader_for_module_rechecks_everything() {
        let lib = ShaderLibrary::new();
        assert!(lib.shader_for_module(1).is_none());

        lib.register_publisher(10);
        lib.add_shader(10, pair("a")).unwrap();
        lib.subscribe(1, 10, 0);
        assert_eq!(lib.shader_for_module(1).unwrap().name, "a");

        lib.set_validity(10, 0, false, "0:1: error".into());
        assert!(lib.shader_for_module(1).is_none());

        lib.set_validity(10, 0, true, String::new());
        lib.remove_publisher(10);
        assert!(lib.shader_for_module(1).is_none());
        // The stale subscription is kept as recorded.
        assert!(lib.subscription(1).unwrap().is_valid);
    }

    #[test]
    fn publisher_ids_are_ordered() {
        let lib = ShaderLibrary::new();
        for id in [30, 10, 20] {
            lib.register_publisher(id);
        }
        assert_eq!(lib.publisher_ids(), vec![10, 20, 30]);
    }

    #[test]
    fn events_are_emitted_for_publish_and_subscribe() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let lib = ShaderLibrary::with_events(EventTx::new(tx));
        lib.register_publisher(5);
        lib.add_shader(5, pair("a")).unwrap();
        lib.subscribe(9, 5, 3);

        let evs: Vec<_> = rx.try_iter().collect();
        assert!(matches!(evs[0], EngineEvent::Published { publisher: 5, index: 0, .. }));
        assert!(matches!(
            evs[1],
            EngineEvent::Subscribed { subscriber: 9, publisher: 5, index: 3, valid: false }
        ));
    }
}
