//! Path-addressed mutation of Value data.
//!
//! Mutation never changes a Value in place; it produces a new Value whose
//! data tree shares every subtree that is not on the mutation path. The one
//! invariant everything downstream relies on: if the new data equals the
//! old, the *original* storage is returned, so `Value::is_same` holds and
//! no-op updates are detectable without deep comparison.

use crate::data::Data;
use crate::denotable::{self, Denotable};
use crate::dict::Dictionary;
use crate::kind::{Kind, WORD_LIST, WORD_RECORD, is_ground_word};
use crate::schema::{Schema, subschema_end, subschema_start};
use crate::{Step, Value, ValueError};

use std::sync::Arc;

pub(crate) fn mutate_value(
    value: &Value,
    path: &[Step],
    new_data: &Denotable,
) -> Result<Value, ValueError> {
    if value.is_none() {
        // setting None to None is the only legal "mutation" of the None Value
        if path.is_empty() && matches!(new_data, Denotable::None) {
            return Ok(value.clone());
        }
        return Err(ValueError::MutateNone);
    }
    let (data, changed) = mutate_recursive(
        value.data(),
        new_data,
        value.schema().words(),
        0,
        value.dictionary(),
        path,
    )?;
    if changed {
        Ok(Value::from_parts(
            value.schema().clone(),
            data,
            value.dictionary().cloned(),
        ))
    } else {
        Ok(value.clone())
    }
}

pub(crate) fn multi_mutate_value<I, D>(value: &Value, changes: I) -> Result<Value, ValueError>
where
    I: IntoIterator<Item = (Vec<Step>, D)>,
    D: Into<Denotable>,
{
    if value.is_none() {
        return Err(ValueError::MutateNone);
    }
    let mut data = value.data().clone();
    let mut any_change = false;
    for (path, new_data) in changes {
        let (next, changed) = mutate_recursive(
            &data,
            &new_data.into(),
            value.schema().words(),
            0,
            value.dictionary(),
            &path,
        )?;
        data = next;
        any_change |= changed;
    }
    if any_change {
        Ok(Value::from_parts(
            value.schema().clone(),
            data,
            value.dictionary().cloned(),
        ))
    } else {
        Ok(value.clone())
    }
}

/// The terminal step: validates the replacement's schema against the
/// subschema at `at` and reports whether the data actually changed.
fn mutate_data(
    current: &Data,
    new_data: &Denotable,
    words: &[u64],
    at: usize,
) -> Result<(Data, bool), ValueError> {
    // the empty list has no schema of its own; it is legal wherever a list is
    if let Denotable::List(items) = new_data
        && items.is_empty()
    {
        return if words[at] == WORD_LIST {
            match current {
                Data::List(existing) if existing.is_empty() => Ok((current.clone(), false)),
                _ => Ok((Data::empty_list(), true)),
            }
        } else {
            let kind = Kind::from_word(words[at]).unwrap_or(Kind::Record);
            Err(ValueError::CannotSetEmptyList(kind))
        };
    }

    let got = denotable::schema_of_nested(new_data)?;
    let end = subschema_end(words, at);
    if got.words() != &words[at..end] {
        return Err(ValueError::SchemaMismatch {
            expected: Schema::from_words(words[at..end].to_vec()),
            got,
        });
    }

    let replacement = denotable::data_of(new_data);
    if replacement.equals(current) {
        Ok((current.clone(), false))
    } else {
        Ok((replacement, true))
    }
}

fn mutate_recursive(
    current: &Data,
    new_data: &Denotable,
    words: &[u64],
    at: usize,
    dict: Option<&Arc<Dictionary>>,
    path: &[Step],
) -> Result<(Data, bool), ValueError> {
    let Some(step) = path.first() else {
        return mutate_data(current, new_data, words, at);
    };

    // recursion cannot continue past a ground value
    if is_ground_word(words[at]) {
        let kind = Kind::from_word(words[at]).expect("ground word is a kind");
        return Err(ValueError::KindMismatch(kind));
    }
    let is_list = words[at] == WORD_LIST;
    debug_assert!(is_list || words[at] == WORD_RECORD);

    let (items, size) = match current {
        Data::List(items) => (items, items.len()),
        Data::Record(items) => (items, items.len()),
        _ => unreachable!("container schema word over ground data"),
    };

    // resolve the step to a child slot
    let slot: usize = match step {
        Step::Key(key) => {
            let Some(dict) = dict else {
                return Err(if is_list {
                    ValueError::KindMismatch(Kind::List)
                } else {
                    ValueError::UnnamedRecord
                });
            };
            if is_list {
                return Err(ValueError::KindMismatch(Kind::List));
            }
            if dict.is_unnamed() {
                return Err(ValueError::UnnamedRecord);
            }
            dict.get(key).ok_or_else(|| ValueError::UnknownKey {
                key: key.clone(),
                available: dict.keys().collect::<Vec<_>>().join(", "),
            })?
        }
        Step::Index(index) => {
            let resolved = if *index < 0 {
                size as i64 + index
            } else {
                *index
            };
            if resolved < 0 || resolved >= size as i64 {
                return Err(ValueError::IndexOutOfRange {
                    index: *index,
                    size,
                });
            }
            resolved as usize
        }
    };

    // advance schema and dictionary to the child
    let child_at = if is_list {
        at + 1
    } else {
        subschema_start(words, at, slot)
    };
    let child_dict = if is_list {
        dict // a list's dictionary is its element's dictionary
    } else {
        dict.and_then(|d| d.child(slot))
    };

    let (child, changed) =
        mutate_recursive(&items[slot], new_data, words, child_at, child_dict, &path[1..])?;
    if !changed {
        return Ok((current.clone(), false));
    }

    let mut rebuilt: Vec<Data> = items.to_vec();
    rebuilt[slot] = child;
    let container = if is_list {
        Data::List(rebuilt.into())
    } else {
        Data::Record(rebuilt.into())
    };
    Ok((container, true))
}
