//! Denotable: native structural data accepted as input to build a Value.
//!
//! A `Denotable` is an unchecked tree; `Value::from_denotable` runs it
//! through the validation here. Rejections are the ones the construction
//! contract demands: empty lists, empty records, mixed schemas inside a
//! list, mixed keysets inside a list of named records, and nested None.
//! Existing Values embed directly and keep their storage.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::data::Data;
use crate::dict::Dictionary;
use crate::kind::{Kind, WORD_LIST, WORD_NUMBER, WORD_RECORD, WORD_STRING};
use crate::schema::Schema;
use crate::{Value, ValueError};

#[derive(Debug, Clone)]
pub enum Denotable {
    None,
    Number(f64),
    String(String),
    /// Homogeneous list; all elements must share one schema.
    List(Vec<Denotable>),
    /// Named record: ordered key/value pairs with unique string keys.
    Record(Vec<(String, Denotable)>),
    /// Unnamed record: fixed-length heterogeneous tuple.
    Tuple(Vec<Denotable>),
    /// An existing Value used as a building block.
    Value(Value),
}

impl Denotable {
    pub(crate) fn kind(&self) -> Kind {
        match self {
            Denotable::None => Kind::None,
            Denotable::Number(_) => Kind::Number,
            Denotable::String(_) => Kind::String,
            Denotable::List(_) => Kind::List,
            Denotable::Record(_) | Denotable::Tuple(_) => Kind::Record,
            Denotable::Value(value) => value.kind(),
        }
    }

    /// Top-level record keys, or `None` for unnamed records and non-records.
    /// Used to enforce a single keyset across a list of named records.
    fn top_keys(&self) -> Option<Vec<&str>> {
        match self {
            Denotable::Record(entries) => {
                Some(entries.iter().map(|(key, _)| key.as_str()).collect())
            }
            Denotable::Value(value) => {
                let keys: Vec<&str> = value.keys().collect();
                if keys.is_empty() { None } else { Some(keys) }
            }
            _ => None,
        }
    }
}

/// Builds the schema for a denotable, validating the construction rules on
/// the way. `nested` rejects None below the root.
pub(crate) fn schema_of(denotable: &Denotable) -> Result<Schema, ValueError> {
    let mut words = Vec::new();
    build_schema(denotable, &mut words, false)?;
    Ok(Schema::from_words(words))
}

fn build_schema(denotable: &Denotable, out: &mut Vec<u64>, nested: bool) -> Result<(), ValueError> {
    match denotable {
        Denotable::None => {
            if nested {
                return Err(ValueError::NestedNone);
            }
            out.push(crate::kind::WORD_NONE);
        }
        Denotable::Number(_) => out.push(WORD_NUMBER),
        Denotable::String(_) => out.push(WORD_STRING),
        Denotable::Value(value) => {
            if nested && value.is_none() {
                return Err(ValueError::NestedNone);
            }
            out.extend_from_slice(value.schema().words());
        }
        Denotable::List(items) => {
            if items.is_empty() {
                return Err(ValueError::EmptyList);
            }
            let reference = schema_of_nested(&items[0])?;
            for item in &items[1..] {
                if schema_of_nested(item)? != reference {
                    return Err(ValueError::MixedListSchema);
                }
            }
            if items[0].kind() == Kind::Record {
                let reference_keys = items[0].top_keys();
                for item in &items[1..] {
                    if item.top_keys() != reference_keys {
                        return Err(ValueError::MixedListKeys);
                    }
                }
            }
            out.push(WORD_LIST);
            out.extend_from_slice(reference.words());
        }
        Denotable::Record(entries) => {
            if entries.is_empty() {
                return Err(ValueError::EmptyRecord);
            }
            let mut seen: Vec<&str> = Vec::with_capacity(entries.len());
            for (key, _) in entries {
                if seen.contains(&key.as_str()) {
                    return Err(ValueError::DuplicateKey(key.clone()));
                }
                seen.push(key);
            }
            build_record_schema(entries.iter().map(|(_, child)| child), entries.len(), out)?;
        }
        Denotable::Tuple(items) => {
            if items.is_empty() {
                return Err(ValueError::EmptyRecord);
            }
            build_record_schema(items.iter(), items.len(), out)?;
        }
    }
    Ok(())
}

pub(crate) fn schema_of_nested(denotable: &Denotable) -> Result<Schema, ValueError> {
    let mut words = Vec::new();
    build_schema(denotable, &mut words, true)?;
    Ok(Schema::from_words(words))
}

/// Record schema assembly: header, one body slot per child, then the
/// non-ground subschemas appended. A single trailing non-ground child is
/// inlined in place of its body slot.
fn build_record_schema<'a>(
    children: impl Iterator<Item = &'a Denotable>,
    count: usize,
    out: &mut Vec<u64>,
) -> Result<(), ValueError> {
    out.push(WORD_RECORD);
    out.push(count as u64);
    let body = out.len();
    out.resize(body + count, 0);

    for (index, child) in children.enumerate() {
        let slot = body + index;
        if child.kind().is_ground() {
            out[slot] = child.kind().word();
        } else {
            let offset = (out.len() - slot) as u64;
            debug_assert!(offset > 0);
            if offset == 1 {
                // the only non-ground child sits at the very end; inline it
                out.pop();
            } else {
                out[slot] = offset;
            }
            build_schema(child, out, true)?;
        }
    }
    Ok(())
}

/// Builds the data tree. Assumes the denotable already passed validation.
pub(crate) fn data_of(denotable: &Denotable) -> Data {
    match denotable {
        Denotable::None => Data::None,
        Denotable::Number(number) => Data::Number(*number),
        Denotable::String(string) => Data::String(Arc::from(string.as_str())),
        Denotable::List(items) => Data::List(items.iter().map(data_of).collect()),
        Denotable::Record(entries) => {
            Data::Record(entries.iter().map(|(_, child)| data_of(child)).collect())
        }
        Denotable::Tuple(items) => Data::Record(items.iter().map(data_of).collect()),
        Denotable::Value(value) => value.data().clone(),
    }
}

/// Builds the dictionary, or `None` if the denotable contains no record.
pub(crate) fn dict_of(denotable: &Denotable) -> Option<Arc<Dictionary>> {
    match denotable {
        Denotable::None | Denotable::Number(_) | Denotable::String(_) => None,
        // a list's dictionary is its element's dictionary
        Denotable::List(items) => dict_of(items.first()?),
        Denotable::Record(entries) => {
            let mut names = IndexMap::with_capacity(entries.len());
            for (index, (key, _)) in entries.iter().enumerate() {
                names.insert(key.clone(), index);
            }
            let children = entries.iter().map(|(_, child)| dict_of(child)).collect();
            Some(Arc::new(Dictionary::new(names, children)))
        }
        Denotable::Tuple(items) => {
            let children = items.iter().map(dict_of).collect();
            Some(Arc::new(Dictionary::new(IndexMap::new(), children)))
        }
        Denotable::Value(value) => value.dictionary().cloned(),
    }
}

impl From<f64> for Denotable {
    fn from(value: f64) -> Self {
        Denotable::Number(value)
    }
}

impl From<f32> for Denotable {
    fn from(value: f32) -> Self {
        Denotable::Number(value as f64)
    }
}

impl From<i32> for Denotable {
    fn from(value: i32) -> Self {
        Denotable::Number(value as f64)
    }
}

impl From<i64> for Denotable {
    fn from(value: i64) -> Self {
        Denotable::Number(value as f64)
    }
}

impl From<u32> for Denotable {
    fn from(value: u32) -> Self {
        Denotable::Number(value as f64)
    }
}

impl From<usize> for Denotable {
    fn from(value: usize) -> Self {
        Denotable::Number(value as f64)
    }
}

impl From<&str> for Denotable {
    fn from(value: &str) -> Self {
        Denotable::String(value.to_string())
    }
}

impl From<String> for Denotable {
    fn from(value: String) -> Self {
        Denotable::String(value)
    }
}

impl From<Value> for Denotable {
    fn from(value: Value) -> Self {
        Denotable::Value(value)
    }
}

impl From<&Value> for Denotable {
    fn from(value: &Value) -> Self {
        Denotable::Value(value.clone())
    }
}

impl<T: Into<Denotable>> From<Vec<T>> for Denotable {
    fn from(items: Vec<T>) -> Self {
        Denotable::List(items.into_iter().map(Into::into).collect())
    }
}

/// Builds a `Denotable` literal, in the spirit of `serde_json::json!`:
///
/// ```
/// use core_value::{den, Value};
/// let value = Value::from_denotable(den!({
///     "pos": 32.2,
///     "coords": [{"x": 0, "name": "a"}, {"x": 2, "name": "b"}],
///     "pair": (1, "one"),
/// })).unwrap();
/// assert_eq!(value.index("pos").unwrap(), 32.2);
/// ```
///
/// `{..}` builds a named record, `[..]` a list, `(..)` an unnamed record,
/// and any other expression converts through `Denotable::from`.
#[macro_export]
macro_rules! den {
    () => { $crate::Denotable::None };
    ({ $($key:literal : $val:tt),* $(,)? }) => {
        $crate::Denotable::Record(vec![
            $( (($key).to_string(), $crate::den!($val)) ),*
        ])
    };
    ([ $($val:tt),* $(,)? ]) => {
        $crate::Denotable::List(vec![ $( $crate::den!($val) ),* ])
    };
    (( $($val:tt),+ $(,)? )) => {
        $crate::Denotable::Tuple(vec![ $( $crate::den!($val) ),+ ])
    };
    ($other:expr) => { $crate::Denotable::from($other) };
}
