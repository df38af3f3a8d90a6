//! Shared state of in-memory databases.

use crate::engine::Completion;
use crate::error::{EngineError, EngineResult};
use crate::event_loop::EventLoop;
use crate::key::{Key, KeyPath, KeyRange};
use crate::types::{Direction, IndexParameters, StoreParameters};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Bound, RangeBounds};

/// Largest key the generator hands out (2^53).
const MAX_GENERATED_KEY: u64 = 1 << 53;

/// One named database, shared by all of its connections.
pub(crate) struct DbState {
    pub(crate) name: String,
    pub(crate) version: Cell<u32>,
    pub(crate) stores: RefCell<BTreeMap<String, StoreData>>,
    pub(crate) events: EventLoop,
    open_connections: Cell<usize>,
    parked: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl DbState {
    pub(crate) fn new(name: &str, events: EventLoop) -> Self {
        Self {
            name: name.to_string(),
            version: Cell::new(0),
            stores: RefCell::new(BTreeMap::new()),
            events,
            open_connections: Cell::new(0),
            parked: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn open_connections(&self) -> usize {
        self.open_connections.get()
    }

    pub(crate) fn connection_opened(&self) {
        self.open_connections.set(self.open_connections.get() + 1);
    }

    /// Records a closed connection; releases parked requests once the last
    /// one is gone.
    pub(crate) fn connection_closed(&self) {
        let remaining = self.open_connections.get().saturating_sub(1);
        self.open_connections.set(remaining);
        if remaining == 0 {
            let parked = std::mem::take(&mut *self.parked.borrow_mut());
            for task in parked {
                self.events.schedule(task);
            }
        }
    }

    /// Holds a request until every open connection has closed.
    pub(crate) fn park(&self, task: impl FnOnce() + 'static) {
        self.parked.borrow_mut().push(Box::new(task));
    }

    /// Delivers a request result from a later event loop task.
    pub(crate) fn answer<T: 'static>(&self, done: Completion<T>, result: EngineResult<T>) {
        self.events.schedule(move || done(result));
    }
}

/// Records, key generator and indexes of one store.
#[derive(Debug, Clone)]
pub(crate) struct StoreData {
    pub(crate) key_path: Option<KeyPath>,
    pub(crate) auto_increment: bool,
    generator: u64,
    pub(crate) records: BTreeMap<Key, Value>,
    pub(crate) indexes: BTreeMap<String, IndexData>,
}

impl StoreData {
    pub(crate) fn new(params: &StoreParameters) -> Self {
        Self {
            key_path: params.key_path.clone(),
            auto_increment: params.auto_increment,
            generator: 1,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    /// Determines the key of a record being written, generating and
    /// injecting one when the store allows it.
    pub(crate) fn resolve_key(&mut self, value: &mut Value, key: Option<Key>) -> EngineResult<Key> {
        let key = match (self.key_path.clone(), key) {
            (Some(_), Some(_)) => {
                return Err(EngineError::data(
                    "a key was provided for a store that uses inline keys",
                ))
            }
            (Some(path), None) => match path.extract(value) {
                Some(key) => key.validated()?,
                None if self.auto_increment => {
                    let key = self.generate()?;
                    path.inject(value, &key)?;
                    key
                }
                None => {
                    return Err(EngineError::data(format!(
                        "value has no valid key at key path {path}"
                    )))
                }
            },
            (None, Some(key)) => key.validated()?,
            (None, None) if self.auto_increment => self.generate()?,
            (None, None) => {
                return Err(EngineError::data(
                    "no key was provided for a store with out-of-line keys",
                ))
            }
        };

        if self.auto_increment {
            self.bump_generator(&key);
        }
        Ok(key)
    }

    /// Current value of the key generator.
    pub(crate) fn generator(&self) -> u64 {
        self.generator
    }

    /// Puts the key generator back to a value read before a failed or
    /// reverted write.
    pub(crate) fn restore_generator(&mut self, generator: u64) {
        self.generator = generator;
    }

    fn generate(&mut self) -> EngineResult<Key> {
        if self.generator > MAX_GENERATED_KEY {
            return Err(EngineError::constraint("key generator is exhausted"));
        }
        let key = Key::Number(self.generator as f64);
        self.generator += 1;
        Ok(key)
    }

    fn bump_generator(&mut self, key: &Key) {
        if let Some(n) = key.as_number() {
            if n >= self.generator as f64 {
                self.generator = (n.floor() as u64).saturating_add(1).min(MAX_GENERATED_KEY + 1);
            }
        }
    }

    /// Returns the name of a unique index that `value` would collide in.
    pub(crate) fn unique_violation(&self, key: &Key, value: &Value) -> Option<&str> {
        self.indexes
            .iter()
            .find(|(_, index)| index.unique && index.collides(key, value))
            .map(|(name, _)| name.as_str())
    }

    /// Sets or removes a record, keeping indexes in step. Returns the
    /// previous value.
    pub(crate) fn write(&mut self, key: Key, value: Option<Value>) -> Option<Value> {
        let previous = self.records.remove(&key);
        if let Some(old) = &previous {
            for index in self.indexes.values_mut() {
                index.remove(&key, old);
            }
        }
        if let Some(value) = value {
            for index in self.indexes.values_mut() {
                index.insert(&key, &value);
            }
            self.records.insert(key, value);
        }
        previous
    }

    /// Keys of all records in `range`.
    pub(crate) fn keys_in(&self, range: Option<&KeyRange>) -> Vec<Key> {
        match range {
            Some(range) => self.records.range::<Key, _>(range.clone()).map(|(k, _)| k.clone()).collect(),
            None => self.records.keys().cloned().collect(),
        }
    }

    /// Next record position for a store cursor.
    pub(crate) fn seek_record(
        &self,
        range: Option<&KeyRange>,
        direction: Direction,
        current: Option<&Key>,
    ) -> Option<(&Key, &Value)> {
        seek(&self.records, range, direction.is_forward(), current)
    }
}

/// Entries of one secondary index: index key to the primary keys sharing it.
#[derive(Debug, Clone)]
pub(crate) struct IndexData {
    pub(crate) key_path: KeyPath,
    pub(crate) unique: bool,
    pub(crate) multi_entry: bool,
    pub(crate) entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl IndexData {
    /// Builds an index over existing records.
    pub(crate) fn build(
        name: &str,
        key_path: &KeyPath,
        params: &IndexParameters,
        records: &BTreeMap<Key, Value>,
    ) -> EngineResult<Self> {
        let mut index = Self {
            key_path: key_path.clone(),
            unique: params.unique,
            multi_entry: params.multi_entry,
            entries: BTreeMap::new(),
        };
        for (key, value) in records {
            if index.unique && index.collides(key, value) {
                return Err(EngineError::constraint(format!(
                    "existing records violate unique index '{name}'"
                )));
            }
            index.insert(key, value);
        }
        Ok(index)
    }

    /// Index keys produced by a record; records without a valid key at the
    /// key path are not indexed.
    pub(crate) fn keys_for(&self, value: &Value) -> Vec<Key> {
        if self.multi_entry {
            if let Some(Value::Array(items)) = self.key_path.locate(value) {
                let keys: BTreeSet<Key> = items
                    .iter()
                    .filter_map(Key::from_value)
                    .filter(Key::is_valid)
                    .collect();
                return keys.into_iter().collect();
            }
        }
        self.key_path
            .extract(value)
            .filter(Key::is_valid)
            .into_iter()
            .collect()
    }

    fn collides(&self, primary_key: &Key, value: &Value) -> bool {
        self.keys_for(value).iter().any(|key| {
            self.entries
                .get(key)
                .is_some_and(|owners| owners.iter().any(|owner| owner != primary_key))
        })
    }

    fn insert(&mut self, primary_key: &Key, value: &Value) {
        for key in self.keys_for(value) {
            self.entries.entry(key).or_default().insert(primary_key.clone());
        }
    }

    fn remove(&mut self, primary_key: &Key, value: &Value) {
        for key in self.keys_for(value) {
            if let Some(owners) = self.entries.get_mut(&key) {
                owners.remove(primary_key);
                if owners.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// Number of entries whose index key lies in `range`.
    pub(crate) fn count(&self, range: Option<&KeyRange>) -> u64 {
        let total: usize = match range {
            Some(range) => self.entries.range::<Key, _>(range.clone()).map(|(_, pks)| pks.len()).sum(),
            None => self.entries.values().map(BTreeSet::len).sum(),
        };
        total as u64
    }

    /// Next `(index key, primary key)` position for an index cursor.
    ///
    /// Forward cursors start at the lowest primary key of an index key.
    /// `Prev` walks primary keys downwards, while `PrevUnique` lands on the
    /// lowest primary key of each index key as IndexedDB does.
    pub(crate) fn seek(
        &self,
        range: Option<&KeyRange>,
        direction: Direction,
        current: Option<&(Key, Key)>,
    ) -> Option<(Key, Key)> {
        let forward = direction.is_forward();

        if let (Direction::Next | Direction::Prev, Some((index_key, primary_key))) =
            (direction, current)
        {
            let sibling = self.entries.get(index_key).and_then(|owners| {
                if forward {
                    owners
                        .range((Bound::Excluded(primary_key), Bound::Unbounded))
                        .next()
                } else {
                    owners.range(..primary_key).next_back()
                }
            });
            if let Some(sibling) = sibling {
                return Some((index_key.clone(), sibling.clone()));
            }
        }

        let (index_key, owners) = seek(&self.entries, range, forward, current.map(|(k, _)| k))?;
        let primary_key = match direction {
            Direction::Prev => owners.last(),
            Direction::Next | Direction::NextUnique | Direction::PrevUnique => owners.first(),
        }?;
        Some((index_key.clone(), primary_key.clone()))
    }
}

/// Finds the first entry strictly beyond `current` in the travel direction,
/// restricted to `range`.
pub(crate) fn seek<'m, 'b, V>(
    map: &'m BTreeMap<Key, V>,
    range: Option<&'b KeyRange>,
    forward: bool,
    current: Option<&'b Key>,
) -> Option<(&'m Key, &'m V)> {
    let (mut start, mut end) = match range {
        Some(range) => (range.start_bound(), range.end_bound()),
        None => (Bound::Unbounded, Bound::Unbounded),
    };
    if let Some(current) = current {
        if forward {
            start = after(start, current);
        } else {
            end = before(end, current);
        }
    }
    if is_empty_span(start, end) {
        return None;
    }

    let mut entries = map.range::<Key, _>((start, end));
    if forward {
        entries.next()
    } else {
        entries.next_back()
    }
}

fn after<'a>(bound: Bound<&'a Key>, current: &'a Key) -> Bound<&'a Key> {
    match bound {
        Bound::Included(k) if k > current => bound,
        Bound::Excluded(k) if k >= current => bound,
        _ => Bound::Excluded(current),
    }
}

fn before<'a>(bound: Bound<&'a Key>, current: &'a Key) -> Bound<&'a Key> {
    match bound {
        Bound::Included(k) if k < current => bound,
        Bound::Excluded(k) if k <= current => bound,
        _ => Bound::Excluded(current),
    }
}

// BTreeMap::range panics on inverted or empty-and-excluded spans.
fn is_empty_span(start: Bound<&Key>, end: Bound<&Key>) -> bool {
    match (start, end) {
        (
            Bound::Included(s) | Bound::Excluded(s),
            Bound::Included(e) | Bound::Excluded(e),
        ) => s > e || (s == e && !matches!((start, end), (Bound::Included(_), Bound::Included(_)))),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn numbers(keys: &[i32]) -> BTreeMap<Key, ()> {
        keys.iter().map(|k| (Key::from(*k), ())).collect()
    }

    fn walk(map: &BTreeMap<Key, ()>, range: Option<&KeyRange>, forward: bool) -> Vec<Key> {
        let mut out = Vec::new();
        let mut current: Option<Key> = None;
        while let Some((key, _)) = seek(map, range, forward, current.as_ref()) {
            out.push(key.clone());
            current = Some(key.clone());
        }
        out
    }

    #[test]
    fn seek_walks_both_directions() {
        let map = numbers(&[1, 2, 3]);
        assert_eq!(walk(&map, None, true), vec![Key::from(1), Key::from(2), Key::from(3)]);
        assert_eq!(walk(&map, None, false), vec![Key::from(3), Key::from(2), Key::from(1)]);
    }

    #[test]
    fn seek_respects_open_bounds() {
        let map = numbers(&[1, 2, 3, 4]);
        let range = KeyRange::bound(1, 4, true, true).unwrap();
        assert_eq!(walk(&map, Some(&range), true), vec![Key::from(2), Key::from(3)]);
        assert_eq!(walk(&map, Some(&range), false), vec![Key::from(3), Key::from(2)]);
    }

    #[test]
    fn seek_on_single_key_range_does_not_panic() {
        let map = numbers(&[5]);
        let range = KeyRange::only(5).unwrap();
        assert_eq!(walk(&map, Some(&range), true), vec![Key::from(5)]);
        assert_eq!(walk(&map, Some(&range), false), vec![Key::from(5)]);
    }

    #[test]
    fn generator_skips_past_explicit_keys() {
        let mut store = StoreData::new(&StoreParameters::new().auto_increment(true));
        let mut value = json!("a");
        assert_eq!(store.resolve_key(&mut value, None).unwrap(), Key::from(1));
        assert_eq!(store.resolve_key(&mut value, Some(Key::from(10.5))).unwrap(), Key::from(10.5));
        assert_eq!(store.resolve_key(&mut value, None).unwrap(), Key::from(11));
        // Non-numeric keys leave the generator alone.
        store.resolve_key(&mut value, Some(Key::from("x"))).unwrap();
        assert_eq!(store.resolve_key(&mut value, None).unwrap(), Key::from(12));
    }

    #[test]
    fn restored_generator_hands_out_keys_again() {
        let mut store = StoreData::new(&StoreParameters::new().auto_increment(true));
        let mut value = json!("a");
        let before = store.generator();
        assert_eq!(store.resolve_key(&mut value, None).unwrap(), Key::from(1));
        store.restore_generator(before);
        assert_eq!(store.resolve_key(&mut value, None).unwrap(), Key::from(1));
    }

    #[test]
    fn inline_keys_are_injected() {
        let mut store = StoreData::new(&StoreParameters::new().key_path("id").auto_increment(true));
        let mut value = json!({"name": "a"});
        let key = store.resolve_key(&mut value, None).unwrap();
        assert_eq!(key, Key::from(1));
        assert_eq!(value, json!({"name": "a", "id": 1}));
    }

    #[test]
    fn inline_store_rejects_explicit_key() {
        let mut store = StoreData::new(&StoreParameters::new().key_path("id"));
        let mut value = json!({"id": 1});
        assert!(matches!(
            store.resolve_key(&mut value, Some(Key::from(1))),
            Err(EngineError::Data(_))
        ));
    }

    #[test]
    fn out_of_line_store_requires_key() {
        let mut store = StoreData::new(&StoreParameters::new());
        assert!(store.resolve_key(&mut json!(1), None).is_err());
    }

    #[test]
    fn write_maintains_indexes() {
        let mut store = StoreData::new(&StoreParameters::new());
        let index = IndexData::build(
            "by_tag",
            &KeyPath::from("tags"),
            &IndexParameters::new().multi_entry(true),
            &store.records,
        )
        .unwrap();
        store.indexes.insert("by_tag".into(), index);

        store.write(Key::from(1), Some(json!({"tags": ["a", "b", "a"]})));
        store.write(Key::from(2), Some(json!({"tags": ["b"]})));
        let index = &store.indexes["by_tag"];
        assert_eq!(index.count(None), 3);

        store.write(Key::from(1), None);
        let index = &store.indexes["by_tag"];
        assert_eq!(index.count(None), 1);
        assert!(!index.entries.contains_key(&Key::from("a")));
    }

    #[test]
    fn unique_index_detects_collisions() {
        let mut store = StoreData::new(&StoreParameters::new());
        store.write(Key::from(1), Some(json!({"email": "a"})));
        let index = IndexData::build(
            "by_email",
            &KeyPath::from("email"),
            &IndexParameters::new().unique(true),
            &store.records,
        )
        .unwrap();
        store.indexes.insert("by_email".into(), index);

        assert_eq!(store.unique_violation(&Key::from(2), &json!({"email": "a"})), Some("by_email"));
        assert_eq!(store.unique_violation(&Key::from(1), &json!({"email": "a"})), None);
        assert_eq!(store.unique_violation(&Key::from(2), &json!({"email": "b"})), None);
    }

    #[test]
    fn index_seek_unique_directions() {
        let mut entries: BTreeMap<Key, BTreeSet<Key>> = BTreeMap::new();
        entries.insert(Key::from("a"), [Key::from(1), Key::from(2)].into_iter().collect());
        entries.insert(Key::from("b"), [Key::from(3), Key::from(4)].into_iter().collect());
        let index = IndexData {
            key_path: KeyPath::from("k"),
            unique: false,
            multi_entry: false,
            entries,
        };

        let collect = |direction| {
            let mut out = Vec::new();
            let mut current = None;
            while let Some(pos) = index.seek(None, direction, current.as_ref()) {
                out.push(pos.1.as_number().unwrap() as i32);
                current = Some(pos);
            }
            out
        };

        assert_eq!(collect(Direction::Next), vec![1, 2, 3, 4]);
        assert_eq!(collect(Direction::Prev), vec![4, 3, 2, 1]);
        assert_eq!(collect(Direction::NextUnique), vec![1, 3]);
        assert_eq!(collect(Direction::PrevUnique), vec![3, 1]);
    }
}
