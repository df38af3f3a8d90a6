//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, key ranges and directions that always
//! satisfy the engine's validity rules.

use idbrx_engine::{Direction, Key, KeyRange};
use proptest::prelude::*;

/// Strategy for valid non-array keys of every type.
pub fn scalar_key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        (-1.0e6f64..1.0e6).prop_map(Key::Number),
        any::<i32>().prop_map(Key::from),
        (0.0f64..4.0e12).prop_map(Key::Date),
        prop::string::string_regex("[a-zA-Z0-9 _\u{e9}\u{1f600}]{0,8}")
            .expect("Invalid regex")
            .prop_map(Key::String),
        prop::collection::vec(any::<u8>(), 0..6).prop_map(Key::Binary),
    ]
}

/// Strategy for valid keys, including nested arrays.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    scalar_key_strategy().prop_recursive(2, 16, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Key::Array)
    })
}

/// Strategy for small integer keys, convenient for store contents.
pub fn int_key_strategy() -> impl Strategy<Value = Key> {
    (-50i32..50).prop_map(Key::from)
}

/// Strategy for valid key ranges over small integer keys.
pub fn key_range_strategy() -> impl Strategy<Value = KeyRange> {
    let bound = -60i32..60;
    prop_oneof![
        bound.clone().prop_map(|key| KeyRange::only(key).expect("valid key")),
        (bound.clone(), any::<bool>())
            .prop_map(|(key, open)| KeyRange::lower_bound(key, open).expect("valid key")),
        (bound.clone(), any::<bool>())
            .prop_map(|(key, open)| KeyRange::upper_bound(key, open).expect("valid key")),
        (bound.clone(), 1i32..40, any::<bool>(), any::<bool>()).prop_map(
            |(lower, width, lower_open, upper_open)| {
                KeyRange::bound(lower, lower + width, lower_open, upper_open)
                    .expect("lower is below upper")
            }
        ),
    ]
}

/// Strategy for cursor directions.
pub fn direction_strategy() -> impl Strategy<Value = Direction> {
    prop_oneof![
        Just(Direction::Next),
        Just(Direction::NextUnique),
        Just(Direction::Prev),
        Just(Direction::PrevUnique),
    ]
}

/// Strategy for valid store names.
pub fn store_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}
