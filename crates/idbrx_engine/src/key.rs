//! Keys, key paths and key ranges.
//!
//! Keys follow IndexedDB's ordering: every number sorts before every date,
//! dates before strings, strings before binary keys and binary keys before
//! arrays. Within a type, numbers and dates compare numerically, strings by
//! UTF-16 code unit, binary keys bytewise and arrays element by element.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Bound, RangeBounds};

/// A key identifying a record in a store or an entry in an index.
#[derive(Debug, Clone)]
pub enum Key {
    /// A finite number (NaN is not a valid key).
    Number(f64),
    /// A date, as milliseconds since the Unix epoch.
    Date(f64),
    /// A string.
    String(String),
    /// A byte sequence.
    Binary(Vec<u8>),
    /// An array of keys.
    Array(Vec<Key>),
}

impl Key {
    /// Returns the key if it is valid, or a data error otherwise.
    pub fn validated(self) -> EngineResult<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(EngineError::data(format!("{self} is not a valid key")))
        }
    }

    /// Returns true if the key contains no NaN numbers or dates.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Number(n) | Self::Date(n) => !n.is_nan(),
            Self::String(_) | Self::Binary(_) => true,
            Self::Array(items) => items.iter().all(Self::is_valid),
        }
    }

    /// Converts a structured value into a key.
    ///
    /// Numbers, strings and arrays of convertible values are keys; anything
    /// else (objects, booleans, null) is not.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Self::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Self::Array),
            _ => None,
        }
    }

    /// Converts the key into a structured value.
    ///
    /// Dates become their millisecond timestamp and binary keys an array of
    /// byte values, since the value model has no dedicated types for them.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) | Self::Date(n) => number_value(*n),
            Self::String(s) => Value::String(s.clone()),
            Self::Binary(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_value).collect()),
        }
    }

    /// Returns the numeric value of a number key.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Number(_) => 0,
            Self::Date(_) => 1,
            Self::String(_) => 2,
            Self::Binary(_) => 3,
            Self::Array(_) => 4,
        }
    }
}

fn number_value(n: f64) -> Value {
    // Integral numbers keep an integer representation so they round-trip
    // through the value model unchanged.
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn compare_numbers(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) | (Self::Date(a), Self::Date(b)) => {
                compare_numbers(*a, *b)
            }
            (Self::String(a), Self::String(b)) => a.encode_utf16().cmp(b.encode_utf16()),
            (Self::Binary(a), Self::Binary(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Date(ms) => write!(f, "date({ms})"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Binary(bytes) => write!(f, "binary({} bytes)", bytes.len()),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Self::Array(items)
    }
}

/// A path locating a key inside a stored value.
///
/// A single path is a dot-separated list of property names; the empty
/// string designates the value itself. A multiple path produces an array
/// key from several single paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    /// One dot-separated path.
    Single(String),
    /// Several paths combined into an array key.
    Multiple(Vec<String>),
}

impl KeyPath {
    /// Returns true if every path is empty or a dot-separated list of
    /// identifiers.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Single(path) => is_valid_path(path),
            Self::Multiple(paths) => !paths.is_empty() && paths.iter().all(|p| is_valid_path(p)),
        }
    }

    /// Evaluates the path against a value.
    ///
    /// Returns `None` if a property is missing or the located value is not
    /// a valid key.
    #[must_use]
    pub fn extract(&self, value: &Value) -> Option<Key> {
        match self {
            Self::Single(path) => evaluate(path, value).and_then(Key::from_value),
            Self::Multiple(paths) => paths
                .iter()
                .map(|p| evaluate(p, value).and_then(Key::from_value))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Evaluates the path and returns the raw located value.
    ///
    /// Multi-entry indexes need the raw array rather than an array key.
    #[must_use]
    pub fn locate<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match self {
            Self::Single(path) => evaluate(path, value),
            Self::Multiple(_) => None,
        }
    }

    /// Writes a generated key into `value` at this path.
    ///
    /// Missing intermediate objects are created. Fails if the path is a
    /// multiple path or crosses a non-object value.
    pub fn inject(&self, value: &mut Value, key: &Key) -> EngineResult<()> {
        let Self::Single(path) = self else {
            return Err(EngineError::data("cannot inject a key into a multiple key path"));
        };
        if path.is_empty() {
            return Err(EngineError::data("cannot inject a key at the empty key path"));
        }

        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop().unwrap_or_default();
        let mut cursor = value;
        for segment in segments {
            let Value::Object(map) = cursor else {
                return Err(EngineError::data(format!(
                    "key path '{path}' crosses a non-object value"
                )));
            };
            cursor = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
        }
        match cursor {
            Value::Object(map) => {
                map.insert(last.to_string(), key.to_value());
                Ok(())
            }
            _ => Err(EngineError::data(format!(
                "key path '{path}' crosses a non-object value"
            ))),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        Self::Single(path.to_string())
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(paths: Vec<&str>) -> Self {
        Self::Multiple(paths.into_iter().map(str::to_string).collect())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(path) => write!(f, "{path:?}"),
            Self::Multiple(paths) => write!(f, "{paths:?}"),
        }
    }
}

fn is_valid_path(path: &str) -> bool {
    path.is_empty()
        || path.split('.').all(|segment| {
            let mut chars = segment.chars();
            chars
                .next()
                .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
                && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        })
}

fn evaluate<'a>(path: &str, value: &'a Value) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| current.get(segment))
}

/// A contiguous span of keys with optional, possibly open, bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    /// A range containing exactly `key`.
    pub fn only(key: impl Into<Key>) -> EngineResult<Self> {
        let key = key.into().validated()?;
        Ok(Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        })
    }

    /// A range of all keys above `lower` (excluding it when `open`).
    pub fn lower_bound(lower: impl Into<Key>, open: bool) -> EngineResult<Self> {
        Ok(Self {
            lower: Some(lower.into().validated()?),
            upper: None,
            lower_open: open,
            upper_open: false,
        })
    }

    /// A range of all keys below `upper` (excluding it when `open`).
    pub fn upper_bound(upper: impl Into<Key>, open: bool) -> EngineResult<Self> {
        Ok(Self {
            lower: None,
            upper: Some(upper.into().validated()?),
            lower_open: false,
            upper_open: open,
        })
    }

    /// A range between `lower` and `upper`.
    ///
    /// Fails if `lower` sorts after `upper`, or if they are equal and either
    /// side is open.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> EngineResult<Self> {
        let lower = lower.into().validated()?;
        let upper = upper.into().validated()?;
        match lower.cmp(&upper) {
            Ordering::Greater => {
                return Err(EngineError::data(format!(
                    "lower bound {lower} is greater than upper bound {upper}"
                )))
            }
            Ordering::Equal if lower_open || upper_open => {
                return Err(EngineError::data(format!(
                    "range around {lower} is empty because a bound is open"
                )))
            }
            _ => {}
        }
        Ok(Self {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        })
    }

    /// The lower bound, if any.
    #[must_use]
    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    /// The upper bound, if any.
    #[must_use]
    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    /// Whether the lower bound is excluded.
    #[must_use]
    pub const fn lower_open(&self) -> bool {
        self.lower_open
    }

    /// Whether the upper bound is excluded.
    #[must_use]
    pub const fn upper_open(&self) -> bool {
        self.upper_open
    }

    /// Returns true if `key` lies inside the range.
    #[must_use]
    pub fn includes(&self, key: &Key) -> bool {
        self.contains(key)
    }
}

impl RangeBounds<Key> for KeyRange {
    fn start_bound(&self) -> Bound<&Key> {
        match (&self.lower, self.lower_open) {
            (None, _) => Bound::Unbounded,
            (Some(key), true) => Bound::Excluded(key),
            (Some(key), false) => Bound::Included(key),
        }
    }

    fn end_bound(&self) -> Bound<&Key> {
        match (&self.upper, self.upper_open) {
            (None, _) => Bound::Unbounded,
            (Some(key), true) => Bound::Excluded(key),
            (Some(key), false) => Bound::Included(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_ranks_order_keys() {
        let keys = [
            Key::Number(100.0),
            Key::Date(0.0),
            Key::from("a"),
            Key::from(vec![0u8]),
            Key::Array(vec![]),
        ];
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn numbers_compare_numerically() {
        assert!(Key::from(2) < Key::from(10));
        assert!(Key::from(-1.5) < Key::from(0));
        assert_eq!(Key::Number(0.0), Key::Number(-0.0));
    }

    #[test]
    fn strings_compare_by_utf16_code_unit() {
        // U+FF61 is one code unit; U+1F600 is a surrogate pair starting 0xD83D.
        assert!(Key::from("\u{1F600}") < Key::from("\u{FF61}"));
    }

    #[test]
    fn arrays_compare_lexicographically() {
        let short = Key::Array(vec![Key::from(1)]);
        let long = Key::Array(vec![Key::from(1), Key::from(0)]);
        assert!(short < long);
        assert!(Key::Array(vec![Key::from(2)]) > long);
    }

    #[test]
    fn nan_is_not_a_valid_key() {
        assert!(Key::Number(f64::NAN).validated().is_err());
        assert!(Key::Array(vec![Key::Date(f64::NAN)]).validated().is_err());
        assert!(KeyRange::only(f64::NAN).is_err());
    }

    #[test]
    fn key_from_value() {
        assert_eq!(Key::from_value(&json!(3)), Some(Key::from(3)));
        assert_eq!(Key::from_value(&json!("x")), Some(Key::from("x")));
        assert_eq!(
            Key::from_value(&json!([1, "b"])),
            Some(Key::Array(vec![Key::from(1), Key::from("b")]))
        );
        assert_eq!(Key::from_value(&json!({"a": 1})), None);
        assert_eq!(Key::from_value(&json!([1, null])), None);
        assert_eq!(Key::from_value(&json!(true)), None);
    }

    #[test]
    fn integral_numbers_stay_integers() {
        assert_eq!(Key::from(7).to_value(), json!(7));
        assert_eq!(Key::from(7.5).to_value(), json!(7.5));
    }

    #[test]
    fn key_path_extract() {
        let value = json!({"id": 4, "profile": {"email": "a@b.c"}, "tags": ["x"]});
        assert_eq!(KeyPath::from("id").extract(&value), Some(Key::from(4)));
        assert_eq!(
            KeyPath::from("profile.email").extract(&value),
            Some(Key::from("a@b.c"))
        );
        assert_eq!(KeyPath::from("missing").extract(&value), None);
        assert_eq!(
            KeyPath::from(vec!["id", "profile.email"]).extract(&value),
            Some(Key::Array(vec![Key::from(4), Key::from("a@b.c")]))
        );
        assert_eq!(KeyPath::from("").extract(&json!(9)), Some(Key::from(9)));
    }

    #[test]
    fn key_path_validity() {
        assert!(KeyPath::from("").is_valid());
        assert!(KeyPath::from("a.b_c.$d").is_valid());
        assert!(!KeyPath::from("a..b").is_valid());
        assert!(!KeyPath::from("1a").is_valid());
        assert!(!KeyPath::Multiple(vec![]).is_valid());
    }

    #[test]
    fn key_path_inject_creates_objects() {
        let mut value = json!({"name": "n"});
        KeyPath::from("meta.id")
            .inject(&mut value, &Key::from(1))
            .unwrap();
        assert_eq!(value, json!({"name": "n", "meta": {"id": 1}}));

        let mut scalar = json!(5);
        assert!(KeyPath::from("id").inject(&mut scalar, &Key::from(1)).is_err());
    }

    #[test]
    fn bound_rejects_inverted_ranges() {
        assert!(KeyRange::bound(5, 1, false, false).is_err());
        assert!(KeyRange::bound(1, 1, true, false).is_err());
        assert!(KeyRange::bound(1, 1, false, false).is_ok());
    }

    #[test]
    fn range_includes() {
        let range = KeyRange::bound(2, 4, true, false).unwrap();
        assert!(!range.includes(&Key::from(2)));
        assert!(range.includes(&Key::from(3)));
        assert!(range.includes(&Key::from(4)));
        assert!(!range.includes(&Key::from(5)));

        let lower = KeyRange::lower_bound("m", false).unwrap();
        assert!(lower.includes(&Key::from("z")));
        assert!(!lower.includes(&Key::from(1)));
    }

    proptest::proptest! {
        #[test]
        fn range_membership_matches_bounds(
            lower in -100i32..100,
            width in 0i32..50,
            lower_open: bool,
            upper_open: bool,
            probe in -200i32..200,
        ) {
            proptest::prop_assume!(width > 0 || !(lower_open || upper_open));
            let upper = lower + width;
            let range = KeyRange::bound(lower, upper, lower_open, upper_open).unwrap();
            let above = if lower_open { probe > lower } else { probe >= lower };
            let below = if upper_open { probe < upper } else { probe <= upper };
            proptest::prop_assert_eq!(range.includes(&Key::from(probe)), above && below);
        }

        #[test]
        fn integral_numbers_round_trip_through_values(n in proptest::num::i32::ANY) {
            let key = Key::from(n);
            proptest::prop_assert_eq!(Key::from_value(&key.to_value()), Some(key));
        }
    }
}
