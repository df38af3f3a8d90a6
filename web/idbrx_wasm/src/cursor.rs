//! Cursor requests.
//!
//! An IndexedDB cursor request fires `success` once per position, the last
//! time with a `null` result. Each event is converted and handed to the
//! sink; the sink decides whether to continue.

use crate::convert::{direction_from_js, key_from_js, value_from_js};
use crate::error::{dom_error, request_error};
use crate::request::clear_handlers;
use idbrx_engine::{CursorHandle, CursorSink, Direction, EngineError, EngineResult, Key, Value};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Event, IdbCursorWithValue, IdbRequest};

/// Forwards the events of a cursor request to `sink`.
pub(crate) fn watch(request: &IdbRequest, sink: Box<dyn CursorSink>) {
    let sink = Rc::new(RefCell::new(sink));

    let on_success = {
        let request = request.clone();
        let sink = Rc::clone(&sink);
        Closure::<dyn FnMut(Event)>::new(move |_event: Event| {
            match request.result().map_err(dom_error).and_then(position) {
                Ok(Some(cursor)) => {
                    trace!(key = %cursor.key, "cursor positioned");
                    sink.borrow_mut().on_success(Some(Rc::new(cursor)));
                }
                Ok(None) => {
                    clear_handlers(&request);
                    sink.borrow_mut().on_success(None);
                }
                Err(err) => {
                    clear_handlers(&request);
                    sink.borrow_mut().on_error(err);
                }
            }
        })
    };
    request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
    on_success.forget();

    let on_error = {
        let request = request.clone();
        Closure::<dyn FnMut(Event)>::new(move |_event: Event| {
            let err = request_error(&request);
            clear_handlers(&request);
            sink.borrow_mut().on_error(err);
        })
    };
    request.set_onerror(Some(on_error.as_ref().unchecked_ref()));
    on_error.forget();
}

fn position(result: JsValue) -> EngineResult<Option<WebCursor>> {
    if result.is_null() || result.is_undefined() {
        return Ok(None);
    }
    let cursor = result
        .dyn_into::<IdbCursorWithValue>()
        .map_err(|_| EngineError::Unknown("cursor request produced a non-cursor".into()))?;
    WebCursor::read(cursor).map(Some)
}

/// A cursor position, converted when the event arrives.
struct WebCursor {
    cursor: IdbCursorWithValue,
    key: Key,
    primary_key: Key,
    value: Value,
}

impl WebCursor {
    fn read(cursor: IdbCursorWithValue) -> EngineResult<Self> {
        let key = key_from_js(&cursor.key().map_err(dom_error)?)?;
        let primary_key = key_from_js(&cursor.primary_key().map_err(dom_error)?)?;
        let value = value_from_js(cursor.value().map_err(dom_error)?)?;
        Ok(Self {
            cursor,
            key,
            primary_key,
            value,
        })
    }
}

impl CursorHandle for WebCursor {
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
        direction_from_js(self.cursor.direction())
    }

    fn advance(&self) -> EngineResult<()> {
        self.cursor.continue_().map_err(dom_error)
    }
}
