//! JSON round-trip for Values.
//!
//! The mapping is mostly the obvious one; the two wrinkles are:
//! - Numbers with integral magnitude serialize as JSON integers, everything
//!   else as floats. Non-finite numbers are not representable.
//! - JSON has no tuple type, so unnamed records serialize as arrays whose
//!   first element is `null`. Decoding applies the inverse rule: a
//!   non-empty array starting with `null` becomes an unnamed record.
//!
//! Empty JSON arrays carry no element schema and are rejected unless the
//! caller passes a reference Value; the reference then supplies the schema
//! and dictionary for the whole decoded Value.

use serde_json::Value as Json;

use crate::denotable::{self, Denotable};
use crate::kind::WORD_CEILING;
use crate::{Value, ValueError};

pub(crate) fn value_to_json(value: &Value) -> Result<String, ValueError> {
    Ok(to_json(value)?.to_string())
}

fn to_json(value: &Value) -> Result<Json, ValueError> {
    match value.kind() {
        crate::Kind::None => Ok(Json::Null),
        crate::Kind::Number => {
            let number = value.as_f64()?;
            if !number.is_finite() {
                return Err(ValueError::Unrepresentable(format!(
                    "non-finite number {number}"
                )));
            }
            if number.trunc() == number && number.abs() <= WORD_CEILING as f64 {
                Ok(Json::from(number as i64))
            } else {
                Ok(Json::from(number))
            }
        }
        crate::Kind::String => Ok(Json::from(value.as_str()?)),
        crate::Kind::List => {
            let mut items = Vec::with_capacity(value.len());
            for item in value.items() {
                items.push(to_json(&item)?);
            }
            Ok(Json::Array(items))
        }
        crate::Kind::Record => {
            let named = value
                .dictionary()
                .is_some_and(|dict| !dict.is_unnamed());
            if named {
                let mut object = serde_json::Map::with_capacity(value.len());
                for (slot, item) in value.items().enumerate() {
                    let key = value
                        .dictionary()
                        .and_then(|dict| dict.key_at(slot))
                        .expect("named record has a key per slot");
                    object.insert(key.to_string(), to_json(&item)?);
                }
                Ok(Json::Object(object))
            } else {
                // unnamed records are arrays with a null sentinel up front
                let mut items = Vec::with_capacity(value.len() + 1);
                items.push(Json::Null);
                for item in value.items() {
                    items.push(to_json(&item)?);
                }
                Ok(Json::Array(items))
            }
        }
    }
}

pub(crate) fn value_from_json(text: &str, reference: Option<&Value>) -> Result<Value, ValueError> {
    let json: Json =
        serde_json::from_str(text).map_err(|error| ValueError::Json(error.to_string()))?;
    if json.is_null() {
        return Ok(Value::none());
    }
    let denotable = denotable_from_json(&json)?;
    match reference {
        Some(reference) => Ok(Value::from_parts(
            reference.schema().clone(),
            denotable::data_of(&denotable),
            reference.dictionary().cloned(),
        )),
        None => Value::from_denotable(denotable),
    }
}

fn denotable_from_json(json: &Json) -> Result<Denotable, ValueError> {
    match json {
        Json::Null => Err(ValueError::NestedNone),
        Json::Bool(_) => Err(ValueError::Unrepresentable("a json boolean".to_string())),
        Json::Number(number) => number
            .as_f64()
            .map(Denotable::Number)
            .ok_or_else(|| ValueError::Unrepresentable(format!("json number {number}"))),
        Json::String(string) => Ok(Denotable::String(string.clone())),
        Json::Array(items) => {
            // the null sentinel marks an unnamed record
            if items.first().is_some_and(Json::is_null) {
                let mut children = Vec::with_capacity(items.len() - 1);
                for item in &items[1..] {
                    children.push(denotable_from_json(item)?);
                }
                return Ok(Denotable::Tuple(children));
            }
            let mut children = Vec::with_capacity(items.len());
            for item in items {
                children.push(denotable_from_json(item)?);
            }
            Ok(Denotable::List(children))
        }
        Json::Object(entries) => {
            let mut children = Vec::with_capacity(entries.len());
            for (key, item) in entries {
                children.push((key.clone(), denotable_from_json(item)?));
            }
            Ok(Denotable::Record(children))
        }
    }
}
