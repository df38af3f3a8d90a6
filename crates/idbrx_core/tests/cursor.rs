//! Integration tests for cursor walks.

use futures::{FutureExt, StreamExt};
use idbrx_core::{
    Connection, Direction, EngineError, Error, IndexParameters, Key, KeyRange, StoreParameters,
    TransactionMode,
};
use idbrx_testkit::prelude::*;
use serde_json::json;
use std::io;
use std::sync::{Arc, Mutex};

fn keys(values: &[i32]) -> Vec<Key> {
    values.iter().copied().map(Key::from).collect()
}

/// A database whose `people` store is keyed by `id` and indexed by city.
fn people(env: &TestContext) -> Connection {
    let db = env
        .block_on(env.context.open("people").version(1).on_upgrade(|upgrade| {
            let people = upgrade
                .create_object_store("people", StoreParameters::new().key_path("id"))?;
            people.create_index("by_city", "city", IndexParameters::new())?;
            people.create_index("by_tag", "tags", IndexParameters::new().multi_entry(true))?;
            Ok(())
        }))
        .unwrap();

    let txn = db.transaction(&["people"], TransactionMode::ReadWrite).unwrap();
    let store = txn.object_store("people").unwrap();
    for person in [
        json!({ "id": 1, "city": "Oslo", "tags": ["a", "b"] }),
        json!({ "id": 2, "city": "Bergen", "tags": ["b"] }),
        json!({ "id": 3, "city": "Oslo", "tags": [] }),
        json!({ "id": 4, "name": "no city", "tags": ["a", "a"] }),
    ] {
        env.block_on(store.put(person, None).unwrap()).unwrap();
    }
    let done = txn.done();
    txn.commit().unwrap();
    env.block_on(done).unwrap();
    db
}

#[test]
fn empty_store_walk_completes() {
    let env = TestContext::new();
    let db = env.seeded("db", "items", Vec::new());
    let store = read_store(&db, "items");
    assert!(env.collect(store.open_cursor(None, None)).is_empty());
}

#[test]
fn walks_in_both_directions() {
    init_tracing();
    let env = TestContext::new();
    let db = env.seeded("db", "items", numbered_records(5));
    let store = read_store(&db, "items");

    assert_eq!(env.keys(store.open_cursor(None, None)), keys(&[1, 2, 3, 4, 5]));
    assert_eq!(
        env.keys(store.open_cursor(None, Some(Direction::Prev))),
        keys(&[5, 4, 3, 2, 1])
    );
}

#[test]
fn records_carry_values() {
    let env = TestContext::new();
    let db = env.seeded("db", "items", numbered_records(2));
    let records: Vec<_> = env
        .collect(read_store(&db, "items").open_cursor(None, None))
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(records[1].key, Key::from(2));
    assert_eq!(records[1].primary_key, None);
    assert_eq!(records[1].value, json!({ "n": 2 }));
}

#[test]
fn range_limits_the_walk() {
    let env = TestContext::new();
    let db = env.seeded("db", "items", numbered_records(5));
    let store = read_store(&db, "items");

    let range = KeyRange::bound(2, 4, false, true).unwrap();
    assert_eq!(env.keys(store.open_cursor(Some(range), None)), keys(&[2, 3]));

    let range = KeyRange::lower_bound(4, true).unwrap();
    assert_eq!(
        env.keys(store.open_cursor(Some(range), Some(Direction::Prev))),
        keys(&[5])
    );
}

#[test]
fn stream_is_lazy_until_polled() {
    let env = TestContext::new();
    let db = env.seeded("db", "items", numbered_records(3));
    let store = read_store(&db, "items");
    env.events.run_until_idle();

    let stream = store.open_cursor(None, None);
    assert!(env.events.is_idle());
    drop(stream);
    assert!(env.events.is_idle());
}

#[test]
fn dropping_after_first_record_stops_the_walk() {
    let env = TestContext::new();
    let db = env.seeded("db", "items", numbered_records(5));
    let store = read_store(&db, "items");
    env.events.run_until_idle();

    let mut stream = store.open_cursor(None, None);
    let first = env.block_on(stream.next()).unwrap().unwrap();
    assert_eq!(first.key, Key::from(1));

    // The advance issued for the first record is the only step in flight.
    assert_eq!(env.events.pending(), 1);
    drop(stream);
    assert_eq!(env.events.run_until_idle(), 1);
    assert!(env.events.is_idle());
}

#[test]
fn dropping_with_a_parked_position_stops_the_walk() {
    let env = TestContext::new();
    let db = env.seeded("db", "items", numbered_records(5));
    let store = read_store(&db, "items");
    env.events.run_until_idle();

    let mut stream = store.open_cursor(None, None);
    let first = env.block_on(stream.next()).unwrap().unwrap();
    assert_eq!(first.key, Key::from(1));

    // The second position lands in the stream but is never taken.
    assert_eq!(env.events.run_until_idle(), 1);
    drop(stream);
    assert!(env.events.is_idle());
    assert_eq!(env.events.run_until_idle(), 0);
}

/// Log output captured by a scoped subscriber.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn late_positions_after_a_drop_are_not_warnings() {
    let env = TestContext::new();
    let db = env.seeded("db", "items", numbered_records(3));
    let store = read_store(&db, "items");
    env.events.run_until_idle();

    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let mut stream = store.open_cursor(None, None);
        env.block_on(stream.next()).unwrap().unwrap();
        drop(stream);
        env.events.run_until_idle();
    });

    let text = captured.text();
    let line = text
        .lines()
        .find(|line| line.contains("arrived after the walk was dropped"))
        .expect("late position was logged");
    assert!(line.contains("DEBUG"), "unexpected level: {line}");
    assert!(!text.contains("WARN"), "unexpected warning: {text}");
}

#[test]
fn index_walks_report_primary_keys() {
    let env = TestContext::new();
    let db = people(&env);
    let index = read_store(&db, "people").index("by_city").unwrap();

    let records: Vec<_> = env
        .collect(index.open_cursor(None, None))
        .into_iter()
        .map(Result::unwrap)
        .collect();
    let pairs: Vec<_> = records
        .iter()
        .map(|r| (r.key.clone(), r.store_key().clone()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            (Key::from("Bergen"), Key::from(2)),
            (Key::from("Oslo"), Key::from(1)),
            (Key::from("Oslo"), Key::from(3)),
        ]
    );
    assert_eq!(records[0].value["city"], json!("Bergen"));
}

#[test]
fn unique_directions_skip_duplicate_index_keys() {
    let env = TestContext::new();
    let db = people(&env);
    let index = read_store(&db, "people").index("by_city").unwrap();
    let primary = |direction| -> Vec<Key> {
        env.collect(index.open_cursor(None, Some(direction)))
            .into_iter()
            .map(|r| r.unwrap().store_key().clone())
            .collect()
    };

    assert_eq!(primary(Direction::Next), keys(&[2, 1, 3]));
    assert_eq!(primary(Direction::NextUnique), keys(&[2, 1]));
    assert_eq!(primary(Direction::Prev), keys(&[3, 1, 2]));
    assert_eq!(primary(Direction::PrevUnique), keys(&[1, 2]));
}

#[test]
fn multi_entry_index_lists_each_tag() {
    let env = TestContext::new();
    let db = people(&env);
    let index = read_store(&db, "people").index("by_tag").unwrap();
    assert!(index.multi_entry());

    let entries: Vec<_> = env
        .collect(index.open_cursor(None, None))
        .into_iter()
        .map(|r| {
            let r = r.unwrap();
            (r.key, r.primary_key.unwrap())
        })
        .collect();
    assert_eq!(
        entries,
        vec![
            (Key::from("a"), Key::from(1)),
            (Key::from("a"), Key::from(4)),
            (Key::from("b"), Key::from(1)),
            (Key::from("b"), Key::from(2)),
        ]
    );
}

#[test]
fn transaction_ending_mid_walk_errors_once() {
    let env = TestContext::new();
    let db = env.seeded("db", "items", numbered_records(3));
    let txn = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let store = txn.object_store("items").unwrap();

    let mut stream = store.open_cursor(None, None);
    assert!(env.block_on(stream.next()).unwrap().is_ok());
    txn.commit().unwrap();

    let err = env.block_on(stream.next()).unwrap().unwrap_err();
    assert!(matches!(err, Error::Engine(EngineError::Abort(_))));
    assert!(env.block_on(stream.next()).is_none());
    assert!(env.block_on(stream.next()).is_none());
}

#[test]
fn failed_advance_yields_record_then_error() {
    let env = TestContext::new();
    let db = env.seeded("db", "items", numbered_records(3));
    let txn = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let store = txn.object_store("items").unwrap();

    let mut stream = store.open_cursor(None, None);
    assert!(stream.next().now_or_never().is_none());
    env.events.run_until_idle();
    // The first position is waiting in the stream when the transaction ends.
    txn.commit().unwrap();

    let record = stream.next().now_or_never().unwrap().unwrap().unwrap();
    assert_eq!(record.key, Key::from(1));
    let err = stream.next().now_or_never().unwrap().unwrap().unwrap_err();
    assert!(matches!(err, Error::Engine(EngineError::TransactionInactive)));
    assert!(stream.next().now_or_never().unwrap().is_none());
}

#[test]
fn open_failure_is_a_single_error() {
    let env = TestContext::new();
    let db = env.seeded("db", "items", numbered_records(3));
    let txn = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let store = txn.object_store("items").unwrap();
    txn.abort().unwrap();

    let results = env.collect(store.open_cursor(None, None));
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
}
