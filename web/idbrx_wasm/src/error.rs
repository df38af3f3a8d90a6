//! Error types for the browser engine.

use idbrx_engine::EngineError;
use thiserror::Error;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::DomException;

/// Errors raised while setting up the browser engine.
#[derive(Debug, Error)]
pub enum WasmError {
    /// The global scope exposes no `indexedDB`.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// JavaScript error occurred.
    #[error("JS error: {0}")]
    JsError(String),
}

impl From<WasmError> for JsValue {
    fn from(err: WasmError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}

impl From<JsValue> for WasmError {
    fn from(val: JsValue) -> Self {
        WasmError::JsError(val.as_string().unwrap_or_else(|| format!("{val:?}")))
    }
}

/// Result type for WASM operations.
pub type WasmResult<T> = Result<T, WasmError>;

/// Maps a thrown value or a request error to an engine error.
///
/// `DOMException`s keep their name; other errors become `TypeError` or
/// `UnknownError`.
pub(crate) fn dom_error(value: JsValue) -> EngineError {
    if let Some(exception) = value.dyn_ref::<DomException>() {
        return EngineError::from_dom(&exception.name(), &exception.message());
    }
    if let Some(error) = value.dyn_ref::<js_sys::TypeError>() {
        return EngineError::Type(String::from(error.message()));
    }
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return EngineError::Unknown(String::from(error.message()));
    }
    EngineError::Unknown(value.as_string().unwrap_or_else(|| format!("{value:?}")))
}

/// The error recorded on a failed request, or a generic one.
pub(crate) fn request_error(request: &web_sys::IdbRequest) -> EngineError {
    match request.error() {
        Ok(Some(exception)) => EngineError::from_dom(&exception.name(), &exception.message()),
        Ok(None) => EngineError::Unknown("request failed without an error".into()),
        Err(thrown) => dom_error(thrown),
    }
}
