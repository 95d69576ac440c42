//! Immutable, schema-typed, persistent data containers.
//!
//! A `Value` is the triple (Schema, Data, optional Dictionary): a
//! self-describing structural type, the storage tree itself, and a side
//! table of record keys. Values are immutable after construction; `mutate`
//! produces a new Value sharing every subtree not on the mutation path, and
//! returns the *original* (same storage) when nothing actually changed;
//! the dataflow layer leans on that identity to skip no-op emissions.
//!
//! Equality and hashing compare schema and data only; the dictionary is
//! ignored, so `{x, y, z}` equals `{r, g, b}` when the numbers agree.
//!
//! Construction goes through [`Denotable`] (see the [`den!`] macro); JSON
//! round-trips live in [`Value::as_json`] / [`Value::from_json`].

mod data;
mod denotable;
mod dict;
mod json;
pub mod kind;
mod mutate;
mod schema;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub use data::Data;
pub use denotable::Denotable;
pub use dict::Dictionary;
pub use kind::Kind;
pub use schema::Schema;

use schema::{subschema_end, subschema_start};

/// Everything that can go wrong constructing, accessing, or mutating a
/// Value. Construction rejections and schema checks are synchronous; they
/// indicate programming bugs in the caller, not runtime conditions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("lists cannot be empty during value definition")]
    EmptyList,
    #[error("records cannot be empty")]
    EmptyRecord,
    #[error("all items in a list must share one schema")]
    MixedListSchema,
    #[error("all records in a list must share one set of keys")]
    MixedListKeys,
    #[error("if present, none must be the only data in a value")]
    NestedNone,
    #[error("duplicate record key \"{0}\"")]
    DuplicateKey(String),
    #[error("cannot index into a {0:?} value")]
    KindMismatch(Kind),
    #[error("index {index} is out of range for size {size}")]
    IndexOutOfRange { index: i64, size: usize },
    #[error("unknown key \"{key}\" in record; available keys are: {available}")]
    UnknownKey { key: String, available: String },
    #[error("this record has only unnamed entries; use an index to access them")]
    UnnamedRecord,
    #[error("schema mismatch: expected {expected:?}, got {got:?}")]
    SchemaMismatch { expected: Schema, got: Schema },
    #[error("cannot set a {0:?} value to the empty list")]
    CannotSetEmptyList(Kind),
    #[error("cannot modify the none value")]
    MutateNone,
    #[error("value is not a number")]
    NotANumber,
    #[error("value is not a string")]
    NotAString,
    #[error("value does not hold a schema")]
    NotASchema,
    #[error("cannot represent {0} in a value")]
    Unrepresentable(String),
    #[error("malformed json: {0}")]
    Json(String),
}

/// One step of a mutation or access path: a list/record index or a record
/// key. Negative indices address from the end.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Index(i64),
    Key(String),
}

impl From<i64> for Step {
    fn from(index: i64) -> Self {
        Step::Index(index)
    }
}

impl From<i32> for Step {
    fn from(index: i32) -> Self {
        Step::Index(index as i64)
    }
}

impl From<usize> for Step {
    fn from(index: usize) -> Self {
        Step::Index(index as i64)
    }
}

impl From<&str> for Step {
    fn from(key: &str) -> Self {
        Step::Key(key.to_string())
    }
}

impl From<String> for Step {
    fn from(key: String) -> Self {
        Step::Key(key)
    }
}

#[derive(Clone)]
pub struct Value {
    schema: Schema,
    data: Data,
    dict: Option<Arc<Dictionary>>,
}

impl Value {
    /// The None Value.
    pub fn none() -> Self {
        Self {
            schema: Schema::none(),
            data: Data::None,
            dict: None,
        }
    }

    /// Builds a Value from native structural data, inferring schema and
    /// dictionary. See the crate docs for the rejection rules.
    pub fn from_denotable(denotable: impl Into<Denotable>) -> Result<Self, ValueError> {
        let denotable = denotable.into();
        match denotable {
            Denotable::None => Ok(Self::none()),
            Denotable::Value(value) => Ok(value),
            other => {
                let schema = denotable::schema_of(&other)?;
                let data = denotable::data_of(&other);
                let dict = denotable::dict_of(&other);
                Ok(Self { schema, data, dict })
            }
        }
    }

    /// Zero-initializes a Value for the given schema: numbers 0, strings
    /// empty, lists empty, records recursively zeroed. Schema-built records
    /// carry no dictionary, so their entries are only reachable by index.
    pub fn from_schema(schema: &Schema) -> Self {
        Self {
            schema: schema.clone(),
            data: data::data_from_schema(schema),
            dict: None,
        }
    }

    pub(crate) fn from_parts(schema: Schema, data: Data, dict: Option<Arc<Dictionary>>) -> Self {
        Self { schema, data, dict }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn kind(&self) -> Kind {
        self.schema.kind()
    }

    pub fn is_none(&self) -> bool {
        matches!(self.data, Data::None)
    }

    pub fn is_number(&self) -> bool {
        matches!(self.data, Data::Number(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self.data, Data::String(_))
    }

    pub(crate) fn data(&self) -> &Data {
        &self.data
    }

    pub(crate) fn dictionary(&self) -> Option<&Arc<Dictionary>> {
        self.dict.as_ref()
    }

    /// True iff both values share the same storage (the identity that
    /// no-op mutations preserve). Strictly stronger than equality.
    pub fn is_same(&self, other: &Value) -> bool {
        self.data.is_same(&other.data)
    }

    /// Number of children for lists and records, zero otherwise.
    pub fn len(&self) -> usize {
        match &self.data {
            Data::List(items) => items.len(),
            Data::Record(_) => self.schema.words()[1] as usize,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record keys in slot order; empty for everything but named records.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.dict
            .as_deref()
            .filter(|_| self.kind() == Kind::Record)
            .into_iter()
            .flat_map(|dict| dict.keys())
    }

    pub fn as_f64(&self) -> Result<f64, ValueError> {
        match &self.data {
            Data::Number(number) => Ok(*number),
            _ => Err(ValueError::NotANumber),
        }
    }

    pub fn as_str(&self) -> Result<&str, ValueError> {
        match &self.data {
            Data::String(string) => Ok(string),
            _ => Err(ValueError::NotAString),
        }
    }

    /// Returns the child addressed by `step`, aliasing this value's storage.
    ///
    /// Integer steps work on lists and records (negative counts from the
    /// end); key steps on named records only.
    pub fn index(&self, step: impl Into<Step>) -> Result<Value, ValueError> {
        match step.into() {
            Step::Index(index) => match self.kind() {
                Kind::List | Kind::Record => self.item_by_index(index),
                kind => Err(ValueError::KindMismatch(kind)),
            },
            Step::Key(key) => match self.kind() {
                Kind::Record => self.item_by_name(&key),
                kind => Err(ValueError::KindMismatch(kind)),
            },
        }
    }

    /// Iterates the children of a list or record.
    pub fn items(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.len()).map(|index| {
            self.item_by_index(index as i64)
                .expect("index within len is valid")
        })
    }

    fn item_by_index(&self, index: i64) -> Result<Value, ValueError> {
        let size = self.len();
        let resolved = if index < 0 { size as i64 + index } else { index };
        if resolved < 0 || resolved >= size as i64 {
            return Err(ValueError::IndexOutOfRange { index, size });
        }
        let slot = resolved as usize;
        let words = self.schema.words();
        match (&self.data, self.kind()) {
            (Data::List(items), Kind::List) => {
                let end = subschema_end(words, 1);
                Ok(Value {
                    schema: self.schema.slice(1, end),
                    data: items[slot].clone(),
                    // a list's dictionary already is its element's dictionary
                    dict: self.dict.clone(),
                })
            }
            (Data::Record(items), Kind::Record) => {
                let start = subschema_start(words, 0, slot);
                let end = subschema_end(words, start);
                Ok(Value {
                    schema: self.schema.slice(start, end),
                    data: items[slot].clone(),
                    dict: self.dict.as_ref().and_then(|dict| dict.child(slot)).cloned(),
                })
            }
            (_, kind) => Err(ValueError::KindMismatch(kind)),
        }
    }

    fn item_by_name(&self, key: &str) -> Result<Value, ValueError> {
        let Some(dict) = self.dict.as_deref() else {
            return Err(ValueError::UnnamedRecord);
        };
        if dict.is_unnamed() {
            return Err(ValueError::UnnamedRecord);
        }
        let Some(slot) = dict.get(key) else {
            return Err(ValueError::UnknownKey {
                key: key.to_string(),
                available: dict.keys().collect::<Vec<_>>().join(", "),
            });
        };
        self.item_by_index(slot as i64)
    }

    /// Mutates the data at `path`, returning a new Value that shares every
    /// subtree not on the path. Returns the original storage (see
    /// [`Value::is_same`]) when the new data equals the old.
    pub fn mutate(
        &self,
        path: &[Step],
        new_data: impl Into<Denotable>,
    ) -> Result<Value, ValueError> {
        mutate::mutate_value(self, path, &new_data.into())
    }

    /// Applies several mutations in order on a transient copy; identity is
    /// preserved iff no change altered any leaf.
    pub fn multi_mutate<I, D>(&self, changes: I) -> Result<Value, ValueError>
    where
        I: IntoIterator<Item = (Vec<Step>, D)>,
        D: Into<Denotable>,
    {
        mutate::multi_mutate_value(self, changes)
    }

    /// Serializes to JSON. Integral numbers come out as JSON integers,
    /// named records as objects, unnamed records as arrays whose first
    /// element is `null`.
    pub fn as_json(&self) -> Result<String, ValueError> {
        json::value_to_json(self)
    }

    /// Deserializes from JSON; the inverse of [`Value::as_json`]. A
    /// `reference` Value supplies schema and dictionary so empty JSON
    /// arrays can be decoded (they are rejected without one).
    pub fn from_json(text: &str, reference: Option<&Value>) -> Result<Value, ValueError> {
        json::value_from_json(text, reference)
    }

    // ---------------------------------------------------------------------
    // Number arithmetic. Every operation requires a Number value and keeps
    // the operand schema.
    // ---------------------------------------------------------------------

    fn map_number(&self, op: impl FnOnce(f64) -> f64) -> Result<Value, ValueError> {
        Ok(Value {
            schema: self.schema.clone(),
            data: Data::Number(op(self.as_f64()?)),
            dict: None,
        })
    }

    pub fn neg(&self) -> Result<Value, ValueError> {
        self.map_number(|n| -n)
    }

    pub fn abs(&self) -> Result<Value, ValueError> {
        self.map_number(f64::abs)
    }

    pub fn floor(&self) -> Result<Value, ValueError> {
        self.map_number(f64::floor)
    }

    pub fn ceil(&self) -> Result<Value, ValueError> {
        self.map_number(f64::ceil)
    }

    pub fn round(&self) -> Result<Value, ValueError> {
        self.map_number(f64::round)
    }

    pub fn trunc(&self) -> Result<Value, ValueError> {
        self.map_number(f64::trunc)
    }

    pub fn add(&self, rhs: f64) -> Result<Value, ValueError> {
        self.map_number(|n| n + rhs)
    }

    pub fn sub(&self, rhs: f64) -> Result<Value, ValueError> {
        self.map_number(|n| n - rhs)
    }

    pub fn mul(&self, rhs: f64) -> Result<Value, ValueError> {
        self.map_number(|n| n * rhs)
    }

    pub fn div(&self, rhs: f64) -> Result<Value, ValueError> {
        self.map_number(|n| n / rhs)
    }

    /// Floor division (`//`): `floor(self / rhs)`.
    pub fn floor_div(&self, rhs: f64) -> Result<Value, ValueError> {
        self.map_number(|n| (n / rhs).floor())
    }

    /// Floored remainder, so the result takes the sign of the divisor.
    pub fn rem(&self, rhs: f64) -> Result<Value, ValueError> {
        self.map_number(|n| n - rhs * (n / rhs).floor())
    }

    pub fn pow(&self, exponent: f64) -> Result<Value, ValueError> {
        self.map_number(|n| n.powf(exponent))
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::none()
    }
}

impl From<f64> for Value {
    fn from(number: f64) -> Self {
        Self {
            schema: Schema::from_words(vec![kind::WORD_NUMBER]),
            data: Data::Number(number),
            dict: None,
        }
    }
}

impl From<&str> for Value {
    fn from(string: &str) -> Self {
        Self {
            schema: Schema::from_words(vec![kind::WORD_STRING]),
            data: Data::String(Arc::from(string)),
            dict: None,
        }
    }
}

impl From<String> for Value {
    fn from(string: String) -> Self {
        Self::from(string.as_str())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        // the dictionary is deliberately ignored
        self.schema == other.schema && self.data == other.data
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.schema.hash(state);
        self.data.hash(state);
    }
}

impl PartialEq<f64> for Value {
    fn eq(&self, other: &f64) -> bool {
        matches!(&self.data, Data::Number(n) if n == other)
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        matches!(&self.data, Data::String(s) if &**s == *other)
    }
}

impl PartialOrd<f64> for Value {
    fn partial_cmp(&self, other: &f64) -> Option<std::cmp::Ordering> {
        match &self.data {
            Data::Number(n) => n.partial_cmp(other),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value(")?;
        fmt_value(f, self)?;
        write!(f, ")")
    }
}

fn fmt_value(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value.data() {
        Data::None => write!(f, "None"),
        Data::Number(n) => {
            if n.trunc() == *n && n.is_finite() {
                write!(f, "{}", *n as i64)
            } else {
                write!(f, "{n}")
            }
        }
        Data::String(s) => write!(f, "\"{s}\""),
        Data::List(_) => {
            write!(f, "[")?;
            for (index, item) in value.items().enumerate() {
                if index > 0 {
                    write!(f, ", ")?;
                }
                fmt_value(f, &item)?;
            }
            write!(f, "]")
        }
        Data::Record(_) => {
            write!(f, "{{")?;
            for (slot, item) in value.items().enumerate() {
                if slot > 0 {
                    write!(f, ", ")?;
                }
                if let Some(key) = value
                    .dictionary()
                    .and_then(|dict| dict.key_at(slot).map(str::to_string))
                {
                    write!(f, "{key}: ")?;
                }
                fmt_value(f, &item)?;
            }
            write!(f, "}}")
        }
    }
}
