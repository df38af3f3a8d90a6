//! Conversions between engine values and JavaScript values.

use crate::error::dom_error;
use idbrx_engine::{
    Direction, EngineError, EngineResult, Key, KeyPath, KeyRange, TransactionMode, Value,
};
use js_sys::{Array, ArrayBuffer, Date, Uint8Array};
use serde::Serialize;
use serde_wasm_bindgen::Serializer;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{IdbCursorDirection, IdbKeyRange, IdbTransactionMode};

/// Converts a key into the JavaScript value IndexedDB expects.
pub(crate) fn key_to_js(key: &Key) -> JsValue {
    match key {
        Key::Number(n) => JsValue::from_f64(*n),
        Key::Date(ms) => Date::new(&JsValue::from_f64(*ms)).into(),
        Key::String(s) => JsValue::from_str(s),
        Key::Binary(bytes) => Uint8Array::from(bytes.as_slice()).buffer().into(),
        Key::Array(items) => items.iter().map(key_to_js).collect::<Array>().into(),
    }
}

/// Converts a key reported by IndexedDB.
pub(crate) fn key_from_js(value: &JsValue) -> EngineResult<Key> {
    if let Some(n) = value.as_f64() {
        return Key::Number(n).validated();
    }
    if let Some(s) = value.as_string() {
        return Ok(Key::String(s));
    }
    if let Some(date) = value.dyn_ref::<Date>() {
        return Key::Date(date.get_time()).validated();
    }
    if let Some(buffer) = value.dyn_ref::<ArrayBuffer>() {
        return Ok(Key::Binary(Uint8Array::new(buffer).to_vec()));
    }
    if let Some(view) = value.dyn_ref::<Uint8Array>() {
        return Ok(Key::Binary(view.to_vec()));
    }
    if Array::is_array(value) {
        return Array::from(value)
            .iter()
            .map(|item| key_from_js(&item))
            .collect::<EngineResult<Vec<_>>>()
            .map(Key::Array);
    }
    Err(EngineError::data(format!("{value:?} is not a valid key")))
}

/// Converts a stored value into a JavaScript object graph.
pub(crate) fn value_to_js(value: &Value) -> EngineResult<JsValue> {
    value
        .serialize(&Serializer::json_compatible())
        .map_err(|err| EngineError::data(format!("value cannot be stored: {err}")))
}

/// Converts a value read from IndexedDB.
pub(crate) fn value_from_js(value: JsValue) -> EngineResult<Value> {
    if value.is_undefined() {
        return Ok(Value::Null);
    }
    serde_wasm_bindgen::from_value(value)
        .map_err(|err| EngineError::data(format!("stored value cannot be read: {err}")))
}

pub(crate) fn key_path_to_js(key_path: &KeyPath) -> JsValue {
    match key_path {
        KeyPath::Single(path) => JsValue::from_str(path),
        KeyPath::Multiple(paths) => paths
            .iter()
            .map(|path| JsValue::from_str(path))
            .collect::<Array>()
            .into(),
    }
}

/// Reads a key path; `null` means the store uses out-of-line keys.
pub(crate) fn key_path_from_js(value: &JsValue) -> Option<KeyPath> {
    if let Some(path) = value.as_string() {
        return Some(KeyPath::Single(path));
    }
    if Array::is_array(value) {
        let paths = Array::from(value).iter().filter_map(|p| p.as_string()).collect();
        return Some(KeyPath::Multiple(paths));
    }
    None
}

pub(crate) fn range_to_js(range: &KeyRange) -> EngineResult<IdbKeyRange> {
    let lower = range.lower().map(key_to_js);
    let upper = range.upper().map(key_to_js);
    match (lower, upper) {
        (Some(lower), Some(_)) if range.lower() == range.upper() => IdbKeyRange::only(&lower),
        (Some(lower), Some(upper)) => IdbKeyRange::bound_with_lower_open_and_upper_open(
            &lower,
            &upper,
            range.lower_open(),
            range.upper_open(),
        ),
        (Some(lower), None) => IdbKeyRange::lower_bound_with_open(&lower, range.lower_open()),
        (None, Some(upper)) => IdbKeyRange::upper_bound_with_open(&upper, range.upper_open()),
        (None, None) => return Err(EngineError::data("a key range needs at least one bound")),
    }
    .map_err(dom_error)
}

/// The query argument for a request: a range, or `undefined` for all.
pub(crate) fn query(range: Option<&KeyRange>) -> EngineResult<JsValue> {
    match range {
        Some(range) => range_to_js(range).map(JsValue::from),
        None => Ok(JsValue::UNDEFINED),
    }
}

pub(crate) fn direction_to_js(direction: Direction) -> IdbCursorDirection {
    match direction {
        Direction::Next => IdbCursorDirection::Next,
        Direction::NextUnique => IdbCursorDirection::Nextunique,
        Direction::Prev => IdbCursorDirection::Prev,
        Direction::PrevUnique => IdbCursorDirection::Prevunique,
    }
}

pub(crate) fn direction_from_js(direction: IdbCursorDirection) -> Direction {
    match direction {
        IdbCursorDirection::Nextunique => Direction::NextUnique,
        IdbCursorDirection::Prev => Direction::Prev,
        IdbCursorDirection::Prevunique => Direction::PrevUnique,
        _ => Direction::Next,
    }
}

pub(crate) fn mode_to_js(mode: TransactionMode) -> IdbTransactionMode {
    match mode {
        TransactionMode::ReadOnly => IdbTransactionMode::Readonly,
        TransactionMode::ReadWrite => IdbTransactionMode::Readwrite,
        TransactionMode::VersionChange => IdbTransactionMode::Versionchange,
    }
}

pub(crate) fn mode_from_js(mode: IdbTransactionMode) -> TransactionMode {
    match mode {
        IdbTransactionMode::Readwrite => TransactionMode::ReadWrite,
        IdbTransactionMode::Versionchange => TransactionMode::VersionChange,
        _ => TransactionMode::ReadOnly,
    }
}

/// Collects a `DOMStringList` into a sorted vector.
pub(crate) fn string_list(list: &web_sys::DomStringList) -> Vec<String> {
    let mut names: Vec<String> = (0..list.length()).filter_map(|i| list.item(i)).collect();
    names.sort();
    names
}
