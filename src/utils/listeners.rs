use std::sync::Arc;

use smallvec::SmallVec;

crate::utils::ids::id_gen!(listener_ids);

/// Unique identifier handle for a registered listener.
///
/// Returned when a listener is added to one of the notification lists and
/// used to remove it again. Dropping the last clone of the id releases the
/// underlying identifier.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ListenerId(Arc<InnerId>);

impl ListenerId {
    fn new() -> Self {
        ListenerId(Arc::new(InnerId(listener_ids::next())))
    }
}

#[derive(Debug, Eq, PartialEq)]
struct InnerId(usize);

impl Drop for InnerId {
    fn drop(&mut self) {
        listener_ids::release(self.0);
    }
}

struct Entry<K, T: ?Sized> {
    id: ListenerId,
    key: K,
    listener: Arc<T>,
}

/// Ordered list of listeners, keyed so that notifications can be delivered
/// to a subset (for example only the listeners of one seat).
///
/// Delivery is synchronous and follows registration order. Callers are
/// expected to [`snapshot`](Listeners::snapshot) the relevant listeners
/// while holding their state lock and invoke them after releasing it.
pub(crate) struct Listeners<K, T: ?Sized> {
    entries: Vec<Entry<K, T>>,
}

impl<K, T: ?Sized> std::fmt::Debug for Listeners<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl<K, T: ?Sized> Default for Listeners<K, T> {
    fn default() -> Self {
        Listeners { entries: Vec::new() }
    }
}

impl<K, T: ?Sized> Listeners<K, T> {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add(&mut self, key: K, listener: Arc<T>) -> ListenerId {
        let id = ListenerId::new();
        self.entries.push(Entry {
            id: id.clone(),
            key,
            listener,
        });
        id
    }

    pub fn remove(&mut self, id: &ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| &entry.id != id);
        self.entries.len() != before
    }

    pub fn snapshot_all(&self) -> SmallVec<[Arc<T>; 2]> {
        self.entries.iter().map(|entry| entry.listener.clone()).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<K: PartialEq, T: ?Sized> Listeners<K, T> {
    pub fn snapshot(&self, key: &K) -> SmallVec<[Arc<T>; 2]> {
        self.entries
            .iter()
            .filter(|entry| &entry.key == key)
            .map(|entry| entry.listener.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn keyed_snapshot_preserves_registration_order() {
        let mut listeners: Listeners<u32, Mutex<Vec<&'static str>>> = Listeners::new();
        let first = Arc::new(Mutex::new(vec!["first"]));
        let second = Arc::new(Mutex::new(vec!["second"]));
        let other_key = Arc::new(Mutex::new(vec!["other"]));

        listeners.add(0, first.clone());
        listeners.add(1, other_key);
        listeners.add(0, second.clone());

        let snapshot = listeners.snapshot(&0);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].lock().unwrap()[0], "first");
        assert_eq!(snapshot[1].lock().unwrap()[0], "second");
        assert_eq!(listeners.snapshot_all().len(), 3);
    }

    #[test]
    fn remove_only_drops_the_matching_entry() {
        let mut listeners: Listeners<(), str> = Listeners::new();
        let a = listeners.add((), Arc::from("a"));
        let b = listeners.add((), Arc::from("b"));

        assert!(listeners.remove(&a));
        assert!(!listeners.remove(&a));
        assert_eq!(listeners.len(), 1);
        assert!(listeners.remove(&b));
        assert!(listeners.snapshot(&()).is_empty());
    }
}
