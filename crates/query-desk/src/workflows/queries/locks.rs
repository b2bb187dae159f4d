use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Keyed mutex map giving each application its own critical section.
///
/// Mutations on one key serialise; different keys never contend past the brief map lookup.
#[derive(Default)]
pub(crate) struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    /// Run `f` while holding the critical section for `key`.
    ///
    /// The slot is dropped from the map once no other caller holds or waits on it, so the
    /// map only ever holds keys that are in use.
    pub(crate) fn with<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let slot = {
            let mut slots = self.slots();
            slots.entry(key.to_string()).or_default().clone()
        };
        let result = {
            // Poisoning carries no torn state here; every write lands through an atomic commit.
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut slots = self.slots();
        // One reference in the map plus ours: nobody else is queued on this key.
        if Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
        result
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.slots().len()
    }
}
