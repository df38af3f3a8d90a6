//! In-memory cursors.
//!
//! A cursor remembers the last position it reported and re-seeks from there
//! on every advance, so writes made between positions are observed but a
//! position is never visited twice.

use super::transaction::TxnState;
use crate::engine::{CursorHandle, CursorSink};
use crate::error::{EngineError, EngineResult};
use crate::key::{Key, KeyRange};
use crate::types::Direction;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::trace;

/// What a cursor walks over.
pub(crate) enum CursorSource {
    Store,
    Index(String),
}

pub(crate) struct MemoryCursor {
    this: Weak<MemoryCursor>,
    txn: Rc<TxnState>,
    store: String,
    source: CursorSource,
    range: Option<KeyRange>,
    direction: Direction,
    /// Last reported `(key, primary key)`.
    position: RefCell<Option<(Key, Key)>>,
    /// Set while a reported position may be advanced from.
    got_value: Cell<bool>,
    finished: Cell<bool>,
    sink: RefCell<Option<Box<dyn CursorSink>>>,
}

impl MemoryCursor {
    pub(crate) fn open(
        txn: Rc<TxnState>,
        store: &str,
        source: CursorSource,
        range: Option<KeyRange>,
        direction: Direction,
        sink: Box<dyn CursorSink>,
    ) -> EngineResult<()> {
        txn.ensure_active()?;
        let cursor = Rc::new_cyclic(|this| Self {
            this: this.clone(),
            txn,
            store: store.to_string(),
            source,
            range,
            direction,
            position: RefCell::new(None),
            got_value: Cell::new(false),
            finished: Cell::new(false),
            sink: RefCell::new(Some(sink)),
        });
        trace!(store = %cursor.store, direction = %direction, "cursor opened");
        cursor.schedule_step();
        Ok(())
    }

    fn schedule_step(&self) {
        if let Some(cursor) = self.this.upgrade() {
            self.txn.db.events.schedule(move || cursor.step());
        }
    }

    fn step(self: Rc<Self>) {
        if !self.txn.is_active() {
            self.finish_with(|sink| {
                sink.on_error(EngineError::abort(
                    "transaction finished before the cursor request completed",
                ));
            });
            return;
        }

        match self.seek() {
            Ok(Some((key, primary_key, value))) => {
                trace!(store = %self.store, key = %key, "cursor positioned");
                *self.position.borrow_mut() = Some((key.clone(), primary_key.clone()));
                self.got_value.set(true);
                let handle: Rc<dyn CursorHandle> = Rc::new(Position {
                    cursor: Rc::clone(&self),
                    key,
                    primary_key,
                    value,
                });
                self.deliver(|sink| sink.on_success(Some(handle)));
            }
            Ok(None) => {
                trace!(store = %self.store, "cursor exhausted");
                self.finish_with(|sink| sink.on_success(None));
            }
            Err(err) => self.finish_with(|sink| sink.on_error(err)),
        }
    }

    fn seek(&self) -> EngineResult<Option<(Key, Key, Value)>> {
        let stores = self.txn.db.stores.borrow();
        let store = stores.get(&self.store).ok_or_else(|| {
            EngineError::invalid_state(format!("object store '{}' has been deleted", self.store))
        })?;
        let current = self.position.borrow();
        let range = self.range.as_ref();

        let found = match &self.source {
            CursorSource::Store => store
                .seek_record(range, self.direction, current.as_ref().map(|(k, _)| k))
                .map(|(key, value)| (key.clone(), key.clone(), value.clone())),
            CursorSource::Index(name) => {
                let index = store.indexes.get(name).ok_or_else(|| {
                    EngineError::invalid_state(format!("index '{name}' has been deleted"))
                })?;
                index
                    .seek(range, self.direction, current.as_ref())
                    .and_then(|(key, primary_key)| {
                        let value = store.records.get(&primary_key)?.clone();
                        Some((key, primary_key, value))
                    })
            }
        };
        Ok(found)
    }

    // The sink is taken out while it runs so a re-entrant advance never
    // finds it borrowed.
    fn deliver(&self, f: impl FnOnce(&mut dyn CursorSink)) {
        let sink = self.sink.borrow_mut().take();
        if let Some(mut sink) = sink {
            f(sink.as_mut());
            if !self.finished.get() {
                *self.sink.borrow_mut() = Some(sink);
            }
        }
    }

    fn finish_with(&self, f: impl FnOnce(&mut dyn CursorSink)) {
        self.finished.set(true);
        self.got_value.set(false);
        self.deliver(f);
    }

    fn advance(&self) -> EngineResult<()> {
        if !self.txn.is_active() {
            return Err(EngineError::TransactionInactive);
        }
        if self.finished.get() || !self.got_value.replace(false) {
            return Err(EngineError::invalid_state(
                "cursor is already advancing or has been exhausted",
            ));
        }
        trace!(store = %self.store, "cursor advance requested");
        self.schedule_step();
        Ok(())
    }
}

/// A cursor as reported at one position.
struct Position {
    cursor: Rc<MemoryCursor>,
    key: Key,
    primary_key: Key,
    value: Value,
}

impl CursorHandle for Position {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn primary_key(&self) -> Key {
        self.primary_key.clone()
    }

    fn value(&self) -> Value {
        self.value.clone()
    }

    fn direction(&self) -> Direction {
        self.cursor.direction
    }

    fn advance(&self) -> EngineResult<()> {
        let current = matches!(
            &*self.cursor.position.borrow(),
            Some((key, primary_key)) if *key == self.key && *primary_key == self.primary_key
        );
        if !current {
            return Err(EngineError::invalid_state(
                "cursor has moved past this position",
            ));
        }
        self.cursor.advance()
    }
}
