//! Routing IndexedDB request events to engine completions.

use crate::error::{dom_error, request_error};
use idbrx_engine::{Completion, EngineResult};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Event, IdbRequest};

/// Delivers the single answer of `request` to `done`.
///
/// `read` converts the request's result on success.
pub(crate) fn answer<T: 'static>(
    request: &IdbRequest,
    read: impl FnOnce(JsValue) -> EngineResult<T> + 'static,
    done: Completion<T>,
) {
    let done = Rc::new(RefCell::new(Some(done)));

    let on_success = {
        let request = request.clone();
        let done = Rc::clone(&done);
        Closure::once(move |_event: Event| {
            let result = request.result().map_err(dom_error).and_then(read);
            clear_handlers(&request);
            let done = done.borrow_mut().take();
            if let Some(done) = done {
                done(result);
            }
        })
    };
    request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
    on_success.forget();

    let on_error = {
        let request = request.clone();
        Closure::once(move |_event: Event| {
            let err = request_error(&request);
            clear_handlers(&request);
            let done = done.borrow_mut().take();
            if let Some(done) = done {
                done(Err(err));
            }
        })
    };
    request.set_onerror(Some(on_error.as_ref().unchecked_ref()));
    on_error.forget();
}

/// Unregisters the success and error handlers of a request.
pub(crate) fn clear_handlers(request: &IdbRequest) {
    request.set_onsuccess(None);
    request.set_onerror(None);
}

/// Discards the request's result.
pub(crate) fn ignore(_: JsValue) -> EngineResult<()> {
    Ok(())
}
