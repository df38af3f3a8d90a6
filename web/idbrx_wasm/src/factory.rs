//! The browser's `IDBFactory` as an engine factory.

use crate::error::{dom_error, request_error, WasmError, WasmResult};
use crate::handles::{WebDatabase, WebTransaction};
use crate::request::{answer, clear_handlers, ignore};
use idbrx_engine::{
    Completion, DatabaseInfo, EngineError, EngineResult, Factory, OpenCallbacks, VersionChange,
};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, warn};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{Event, IdbDatabase, IdbFactory, IdbOpenDbRequest, IdbVersionChangeEvent};

type SharedCallbacks = Rc<RefCell<Option<Box<dyn OpenCallbacks>>>>;

/// An engine factory backed by the browser's IndexedDB.
#[derive(Clone, Debug)]
pub struct WebFactory {
    factory: IdbFactory,
}

impl WebFactory {
    /// Wraps an `IDBFactory`.
    #[must_use]
    pub fn new(factory: IdbFactory) -> Self {
        Self { factory }
    }

    /// Uses the `indexedDB` of the current window or worker.
    ///
    /// # Errors
    ///
    /// Fails if the global scope has no `indexedDB`.
    pub fn from_global() -> WasmResult<Self> {
        let global = js_sys::global();
        let factory = if let Some(window) = global.dyn_ref::<web_sys::Window>() {
            window.indexed_db()?
        } else if let Some(worker) = global.dyn_ref::<web_sys::WorkerGlobalScope>() {
            worker.indexed_db()?
        } else {
            None
        };
        factory
            .map(Self::new)
            .ok_or_else(|| WasmError::NotSupported("IndexedDB is not available".into()))
    }
}

impl Factory for WebFactory {
    fn open(
        &self,
        name: &str,
        version: Option<u32>,
        callbacks: Box<dyn OpenCallbacks>,
    ) -> EngineResult<()> {
        let request = match version {
            Some(version) => self.factory.open_with_u32(name, version),
            None => self.factory.open(name),
        }
        .map_err(dom_error)?;
        debug!(db = name, ?version, "IndexedDB open requested");
        watch_open(&request, Rc::new(RefCell::new(Some(callbacks))));
        Ok(())
    }

    fn delete_database(&self, name: &str, done: Completion<()>) -> EngineResult<()> {
        let request = self.factory.delete_database(name).map_err(dom_error)?;
        answer(&request, ignore, done);
        Ok(())
    }

    fn databases(&self, done: Completion<Vec<DatabaseInfo>>) -> EngineResult<()> {
        let list = js_sys::Reflect::get(&self.factory, &JsValue::from_str("databases"))
            .map_err(dom_error)?
            .dyn_into::<js_sys::Function>()
            .map_err(|_| EngineError::Unknown("this browser cannot list databases".into()))?;
        let promise = list
            .call0(&self.factory)
            .map_err(dom_error)?
            .dyn_into::<js_sys::Promise>()
            .map_err(|_| EngineError::Unknown("databases() did not return a promise".into()))?;

        spawn_local(async move {
            let result = JsFuture::from(promise)
                .await
                .map_err(dom_error)
                .and_then(|listed| {
                    serde_wasm_bindgen::from_value::<Vec<DatabaseInfo>>(listed)
                        .map_err(|err| EngineError::Unknown(err.to_string()))
                });
            done(result);
        });
        Ok(())
    }
}

fn version_change(event: &IdbVersionChangeEvent) -> VersionChange {
    VersionChange {
        old_version: event.old_version() as u32,
        new_version: event.new_version().unwrap_or_default() as u32,
    }
}

fn watch_open(request: &IdbOpenDbRequest, callbacks: SharedCallbacks) {
    let on_upgrade = {
        let request = request.clone();
        let callbacks = Rc::clone(&callbacks);
        Closure::once(move |event: IdbVersionChangeEvent| {
            let change = version_change(&event);
            let (Ok(db), Some(transaction)) = (
                request.result().and_then(|db| db.dyn_into::<IdbDatabase>()),
                request.transaction(),
            ) else {
                warn!(%change, "upgrade event without a database");
                return;
            };
            let outcome = match callbacks.borrow_mut().as_mut() {
                Some(callbacks) => callbacks.on_upgrade_needed(
                    Rc::new(WebDatabase::new(db)),
                    Rc::new(WebTransaction::new(transaction.clone())),
                    change,
                ),
                None => Ok(()),
            };
            if let Err(err) = outcome {
                warn!(%change, error = %err, "aborting upgrade");
                // Already finished transactions cannot be aborted again.
                let _ = transaction.abort();
            }
        })
    };
    request.set_onupgradeneeded(Some(on_upgrade.as_ref().unchecked_ref()));
    on_upgrade.forget();

    let on_blocked = {
        let callbacks = Rc::clone(&callbacks);
        Closure::<dyn FnMut(IdbVersionChangeEvent)>::new(move |event: IdbVersionChangeEvent| {
            if let Some(callbacks) = callbacks.borrow_mut().as_mut() {
                callbacks.on_blocked(version_change(&event));
            }
        })
    };
    request.set_onblocked(Some(on_blocked.as_ref().unchecked_ref()));
    on_blocked.forget();

    let on_success = {
        let request = request.clone();
        let callbacks = Rc::clone(&callbacks);
        Closure::once(move |_event: Event| {
            clear_open_handlers(&request);
            let Some(callbacks) = callbacks.borrow_mut().take() else {
                return;
            };
            match request.result().and_then(|db| db.dyn_into::<IdbDatabase>()) {
                Ok(db) => callbacks.on_success(Rc::new(WebDatabase::new(db))),
                Err(err) => callbacks.on_error(dom_error(err)),
            }
        })
    };
    request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
    on_success.forget();

    let on_error = {
        let request = request.clone();
        Closure::once(move |_event: Event| {
            let err = request_error(&request);
            clear_open_handlers(&request);
            let taken = callbacks.borrow_mut().take();
            if let Some(callbacks) = taken {
                callbacks.on_error(err);
            }
        })
    };
    request.set_onerror(Some(on_error.as_ref().unchecked_ref()));
    on_error.forget();
}

fn clear_open_handlers(request: &IdbOpenDbRequest) {
    clear_handlers(request);
    request.set_onupgradeneeded(None);
    request.set_onblocked(None);
}
