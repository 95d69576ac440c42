//! The immutable storage tree behind a Value.
//!
//! Containers share their children through `Arc`, which is what makes
//! mutation persistent: a mutated Value rebuilds only the spine from the
//! root to the changed leaf and shares everything else with the original.
//!
//! Unlike the schema, Data carries no type information of its own; it is
//! only meaningful next to the Schema that describes it.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::kind::{self, WORD_LIST, WORD_NONE, WORD_NUMBER, WORD_RECORD, WORD_STRING};
use crate::schema::{Schema, subschema_start};

#[derive(Debug, Clone)]
pub enum Data {
    None,
    Number(f64),
    String(Arc<str>),
    List(Arc<[Data]>),
    Record(Arc<[Data]>),
}

impl Data {
    pub fn empty_list() -> Data {
        Data::List(Arc::from(Vec::new()))
    }

    /// Structural equality down to the leaves. NaN equals NaN so that the
    /// relation stays reflexive (required for the identity-preserving
    /// mutation check).
    pub fn equals(&self, other: &Data) -> bool {
        match (self, other) {
            (Data::None, Data::None) => true,
            (Data::Number(a), Data::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Data::String(a), Data::String(b)) => a == b,
            (Data::List(a), Data::List(b)) | (Data::Record(a), Data::Record(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y)))
            }
            _ => false,
        }
    }

    /// Pointer-level identity: true iff the two trees share their storage.
    /// Ground data compares by value (there is nothing to share).
    pub fn is_same(&self, other: &Data) -> bool {
        match (self, other) {
            (Data::None, Data::None) => true,
            (Data::Number(a), Data::Number(b)) => a.to_bits() == b.to_bits(),
            (Data::String(a), Data::String(b)) => Arc::ptr_eq(a, b),
            (Data::List(a), Data::List(b)) | (Data::Record(a), Data::Record(b)) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for Data {}

impl Hash for Data {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Data::None => state.write_u8(0),
            Data::Number(n) => {
                state.write_u8(1);
                // canonicalize NaN so equal data hashes equally
                let bits = if n.is_nan() {
                    f64::NAN.to_bits()
                } else {
                    n.to_bits()
                };
                state.write_u64(bits);
            }
            Data::String(s) => {
                state.write_u8(2);
                s.hash(state);
            }
            Data::List(items) => {
                state.write_u8(3);
                state.write_usize(items.len());
                for item in items.iter() {
                    item.hash(state);
                }
            }
            Data::Record(items) => {
                state.write_u8(4);
                for item in items.iter() {
                    item.hash(state);
                }
            }
        }
    }
}

/// Default-initializes data conforming to `schema`: numbers become 0,
/// strings empty, lists empty, records recurse.
pub(crate) fn data_from_schema(schema: &Schema) -> Data {
    fn build(words: &[u64], at: usize) -> Data {
        match words[at] {
            WORD_NONE => Data::None,
            WORD_NUMBER => Data::Number(0.0),
            WORD_STRING => Data::String(Arc::from("")),
            WORD_LIST => Data::empty_list(),
            WORD_RECORD => {
                let child_count = words[at + 1] as usize;
                let mut children = Vec::with_capacity(child_count);
                for child in 0..child_count {
                    children.push(build(words, subschema_start(words, at, child)));
                }
                Data::Record(children.into())
            }
            word => {
                debug_assert!(kind::is_offset_word(word));
                build(words, at + word as usize)
            }
        }
    }
    build(schema.words(), 0)
}
