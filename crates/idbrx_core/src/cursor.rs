//! Cursor walks as streams.
//!
//! A [`RecordStream`] turns the engine's cursor events into a lazy,
//! cancellable `Stream`. The engine pushes one position at a time into a
//! shared slot; the stream takes it out, produces the record and asks the
//! cursor for the next position. At most one event is ever held between
//! the engine and the consumer.
//!
//! Dropping the stream cancels the walk: the slot is marked cancelled, so a
//! position that arrives afterwards is discarded and the cursor is never
//! advanced again.

use crate::error::{Error, Result};
use futures::stream::{FusedStream, Stream};
use idbrx_engine::{
    CursorHandle, CursorSink, Direction, EngineError, IndexHandle, Key, KeyRange,
    ObjectStoreHandle, Value,
};
use std::cell::RefCell;
use std::fmt;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use tracing::{debug, trace};

/// One record visited by a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Key at the cursor position: the primary key for store walks, the
    /// index key for index walks.
    pub key: Key,
    /// Primary key of the record. Only set for index walks.
    pub primary_key: Option<Key>,
    /// Record value.
    pub value: Value,
}

impl Record {
    fn read(cursor: &dyn CursorHandle, index_walk: bool) -> Self {
        Self {
            key: cursor.key(),
            primary_key: index_walk.then(|| cursor.primary_key()),
            value: cursor.value(),
        }
    }

    /// The record's primary key, whichever kind of walk produced it.
    #[must_use]
    pub fn store_key(&self) -> &Key {
        self.primary_key.as_ref().unwrap_or(&self.key)
    }
}

/// What a cursor walks over.
#[derive(Clone)]
pub(crate) enum CursorSource {
    Store(Rc<dyn ObjectStoreHandle>),
    Index(Rc<dyn IndexHandle>),
}

impl CursorSource {
    fn name(&self) -> String {
        match self {
            Self::Store(store) => store.name(),
            Self::Index(index) => index.name(),
        }
    }
}

enum CursorEvent {
    Positioned(Rc<dyn CursorHandle>),
    Exhausted,
    Failed(EngineError),
}

#[derive(Default)]
struct Slot {
    event: Option<CursorEvent>,
    waker: Option<Waker>,
    cancelled: bool,
}

/// Receives cursor events from the engine on behalf of a stream.
struct SlotSink {
    slot: Rc<RefCell<Slot>>,
}

impl SlotSink {
    fn deliver(&self, event: CursorEvent) {
        let waker = {
            let mut slot = self.slot.borrow_mut();
            if slot.cancelled {
                if matches!(event, CursorEvent::Positioned(_)) {
                    debug!("cursor position arrived after the walk was dropped; not advancing");
                }
                return;
            }
            slot.event = Some(event);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl CursorSink for SlotSink {
    fn on_success(&mut self, cursor: Option<Rc<dyn CursorHandle>>) {
        self.deliver(match cursor {
            Some(cursor) => CursorEvent::Positioned(cursor),
            None => CursorEvent::Exhausted,
        });
    }

    fn on_error(&mut self, error: EngineError) {
        self.deliver(CursorEvent::Failed(error));
    }
}

enum State {
    AwaitingOpen {
        source: CursorSource,
        range: Option<KeyRange>,
        direction: Direction,
    },
    AwaitingPosition {
        index_walk: bool,
    },
    Failing(EngineError),
    Done,
}

/// A lazy walk over the records of a store or index.
///
/// Yields `Ok(record)` for each position in the engine's visit order, then
/// ends. An engine failure yields one `Err` and then ends; once ended the
/// stream keeps returning `None`.
#[must_use = "streams do nothing unless polled"]
pub struct RecordStream {
    state: State,
    slot: Rc<RefCell<Slot>>,
}

impl RecordStream {
    pub(crate) fn new(
        source: CursorSource,
        range: Option<KeyRange>,
        direction: Direction,
    ) -> Self {
        Self {
            state: State::AwaitingOpen {
                source,
                range,
                direction,
            },
            slot: Rc::new(RefCell::new(Slot::default())),
        }
    }

    fn open(
        &self,
        source: &CursorSource,
        range: Option<&KeyRange>,
        direction: Direction,
    ) -> Result<()> {
        trace!(source = %source.name(), %direction, "opening cursor");
        let sink = Box::new(SlotSink {
            slot: Rc::clone(&self.slot),
        });
        match source {
            CursorSource::Store(store) => store.open_cursor(range, direction, sink),
            CursorSource::Index(index) => index.open_cursor(range, direction, sink),
        }
        .map_err(Error::from)
    }

    fn take_event(&self, waker: &Waker) -> Option<CursorEvent> {
        let mut slot = self.slot.borrow_mut();
        let event = slot.event.take();
        if event.is_none() {
            slot.waker = Some(waker.clone());
        }
        event
    }
}

impl Stream for RecordStream {
    type Item = Result<Record>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match std::mem::replace(&mut this.state, State::Done) {
                State::AwaitingOpen {
                    source,
                    range,
                    direction,
                } => {
                    if let Err(err) = this.open(&source, range.as_ref(), direction) {
                        return Poll::Ready(Some(Err(err)));
                    }
                    this.state = State::AwaitingPosition {
                        index_walk: matches!(source, CursorSource::Index(_)),
                    };
                }
                State::AwaitingPosition { index_walk } => {
                    let Some(event) = this.take_event(cx.waker()) else {
                        this.state = State::AwaitingPosition { index_walk };
                        return Poll::Pending;
                    };
                    return match event {
                        CursorEvent::Positioned(cursor) => {
                            let record = Record::read(cursor.as_ref(), index_walk);
                            trace!(key = %record.key, "cursor position");
                            this.state = match cursor.advance() {
                                Ok(()) => State::AwaitingPosition { index_walk },
                                Err(err) => State::Failing(err),
                            };
                            Poll::Ready(Some(Ok(record)))
                        }
                        CursorEvent::Exhausted => {
                            trace!("cursor exhausted");
                            Poll::Ready(None)
                        }
                        CursorEvent::Failed(err) => Poll::Ready(Some(Err(err.into()))),
                    };
                }
                State::Failing(err) => return Poll::Ready(Some(Err(err.into()))),
                State::Done => return Poll::Ready(None),
            }
        }
    }
}

impl FusedStream for RecordStream {
    fn is_terminated(&self) -> bool {
        matches!(self.state, State::Done)
    }
}

impl Drop for RecordStream {
    fn drop(&mut self) {
        let mut slot = self.slot.borrow_mut();
        slot.cancelled = true;
        // The held cursor keeps its sink, and so this slot, alive.
        slot.event = None;
        slot.waker = None;
    }
}

impl fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::AwaitingOpen { .. } => "awaiting open",
            State::AwaitingPosition { .. } => "awaiting position",
            State::Failing(_) => "failing",
            State::Done => "done",
        };
        f.debug_struct("RecordStream").field("state", &state).finish()
    }
}
