//! Integer-encoded type layout of a Value.
//!
//! A Schema is a non-empty sequence of words. The first word is the kind of
//! the whole value; containers follow with their children:
//!
//! ```text
//! Number:  || Number ||
//! List:    || List || <child schema ...> ||
//! Record:  || Record | N || slot_0 ... slot_N-1 || <appended subschemas> ||
//! ```
//!
//! A record body slot holds the child's kind word if the child is ground, or
//! a forward offset to the child's subschema appended after the body. When
//! exactly one non-ground child exists and it is the last slot, its subschema
//! replaces the slot word (the offset would be 1, so the word is saved).
//!
//! The schema alone is sufficient to compute the start and end of every
//! subschema; `subschema_start`/`subschema_end` below are that computation.
//! Schemas are cheap-to-clone views into a shared word buffer so a child
//! Value can alias its parent's schema without copying.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::kind::{self, Kind, WORD_LIST, WORD_NONE, WORD_RECORD};
use crate::{Value, ValueError};

#[derive(Clone)]
pub struct Schema {
    words: Arc<[u64]>,
    start: usize,
    end: usize,
}

impl Schema {
    /// The None schema, `[None]`.
    pub fn none() -> Self {
        Self::from_words(vec![WORD_NONE])
    }

    pub(crate) fn from_words(words: Vec<u64>) -> Self {
        debug_assert!(!words.is_empty());
        let end = words.len();
        Self {
            words: words.into(),
            start: 0,
            end,
        }
    }

    /// A sub-view of this schema. `start`/`end` are relative to this view.
    pub(crate) fn slice(&self, start: usize, end: usize) -> Self {
        debug_assert!(start < end && self.start + end <= self.end);
        Self {
            words: Arc::clone(&self.words),
            start: self.start + start,
            end: self.start + end,
        }
    }

    /// The viewed schema words.
    pub fn words(&self) -> &[u64] {
        &self.words[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        false // a schema is never empty; the None schema still has one word
    }

    /// The kind of the value this schema describes.
    pub fn kind(&self) -> Kind {
        // The first word of a (sub)schema is always a kind word.
        Kind::from_word(self.words()[0]).expect("schema starts with a kind word")
    }

    pub fn is_none(&self) -> bool {
        self.words()[0] == WORD_NONE
    }

    /// The schema of a list whose elements have this schema. The None schema
    /// has no corresponding list schema and is returned unchanged.
    pub fn as_list(&self) -> Self {
        if self.is_none() {
            return self.clone();
        }
        let mut words = Vec::with_capacity(self.len() + 1);
        words.push(WORD_LIST);
        words.extend_from_slice(self.words());
        Self::from_words(words)
    }

    /// Reads a schema out of a Value holding a list of numbers (the
    /// representation used to pass schemas through operator arguments).
    pub fn from_value(value: &Value) -> Result<Self, ValueError> {
        if value.kind() != Kind::List || value.schema().words().get(1) != Some(&kind::WORD_NUMBER)
        {
            return Err(ValueError::NotASchema);
        }
        let mut words = Vec::with_capacity(value.len());
        for index in 0..value.len() {
            words.push(value.index(index as i64)?.as_f64()? as u64);
        }
        if words.is_empty() {
            return Err(ValueError::NotASchema);
        }
        Ok(Self::from_words(words))
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.words() == other.words()
    }
}

impl Eq for Schema {}

impl Hash for Schema {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.words().hash(state);
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schema[")?;
        let words = self.words();
        let mut expect_record_size = false;
        for (index, &word) in words.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            if expect_record_size {
                write!(f, "size:{word}")?;
                expect_record_size = false;
                continue;
            }
            match Kind::from_word(word) {
                Some(Kind::None) => write!(f, "None")?,
                Some(Kind::Number) => write!(f, "Number")?,
                Some(Kind::String) => write!(f, "String")?,
                Some(Kind::List) => write!(f, "List")?,
                Some(Kind::Record) => {
                    write!(f, "Record")?;
                    expect_record_size = true;
                }
                None => write!(f, "->{}", index as u64 + word)?,
            }
        }
        write!(f, "]")
    }
}

/// Start index of a record child's subschema.
///
/// `record_at` points at the `Record` word of the parent within `words`;
/// `child` is the child's slot index. Resolves the body slot's forward
/// offset when the child is not ground.
pub(crate) fn subschema_start(words: &[u64], record_at: usize, child: usize) -> usize {
    debug_assert_eq!(words[record_at], WORD_RECORD);
    let slot = record_at + 2 + child;
    let entry = words[slot];
    if kind::is_offset_word(entry) {
        slot + entry as usize
    } else {
        slot
    }
}

/// One past the end of the subschema starting at `start`.
pub(crate) fn subschema_end(words: &[u64], start: usize) -> usize {
    debug_assert!(start < words.len());
    match words[start] {
        w if kind::is_ground_word(w) || w == WORD_NONE => start + 1,
        WORD_LIST => subschema_end(words, start + 1),
        WORD_RECORD => {
            let child_count = words[start + 1] as usize;
            debug_assert!(child_count > 0);
            // The end of the record is the end of its rightmost non-ground
            // child; if every child is ground the record ends after its body.
            for child in (0..child_count).rev() {
                let slot = start + 2 + child;
                let entry = words[slot];
                if kind::is_ground_word(entry) {
                    continue;
                }
                if kind::is_offset_word(entry) {
                    return subschema_end(words, slot + entry as usize);
                }
                return subschema_end(words, slot);
            }
            start + 2 + child_count
        }
        word => unreachable!("invalid schema word {word} at subschema start"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::den;

    fn schema_of(d: crate::Denotable) -> Schema {
        Value::from_denotable(d).unwrap().schema().clone()
    }

    #[test]
    fn ground_schemas_are_single_words() {
        assert_eq!(Schema::none().words(), &[WORD_NONE]);
        assert_eq!(schema_of(den!(1)).words(), &[kind::WORD_NUMBER]);
        assert_eq!(schema_of(den!("hi")).words(), &[kind::WORD_STRING]);
    }

    #[test]
    fn list_schema_prefixes_the_child() {
        let schema = schema_of(den!([1, 2, 3]));
        assert_eq!(schema.words(), &[WORD_LIST, kind::WORD_NUMBER]);
        assert_eq!(schema_of(den!(1)).as_list(), schema);
    }

    #[test]
    fn record_with_ground_children_inlines_kinds() {
        let schema = schema_of(den!({"x": 1, "name": "a"}));
        assert_eq!(
            schema.words(),
            &[WORD_RECORD, 2, kind::WORD_NUMBER, kind::WORD_STRING]
        );
    }

    #[test]
    fn trailing_single_nonground_child_is_inlined() {
        // {x: Number, nums: [Number]} -- the list is the only non-ground
        // child and comes last, so its subschema replaces the slot word.
        let schema = schema_of(den!({"x": 1, "nums": [1]}));
        assert_eq!(
            schema.words(),
            &[WORD_RECORD, 2, kind::WORD_NUMBER, WORD_LIST, kind::WORD_NUMBER]
        );
    }

    #[test]
    fn two_nonground_children_use_offsets() {
        // {a: [Number], b: [String]}
        let schema = schema_of(den!({"a": [1], "b": ["s"]}));
        let words = schema.words();
        assert_eq!(words[0], WORD_RECORD);
        assert_eq!(words[1], 2);
        // slot a offsets to index 4, slot b to index 6
        assert_eq!(words[2], 2);
        assert_eq!(words[3], 3);
        assert_eq!(&words[4..], &[WORD_LIST, kind::WORD_NUMBER, WORD_LIST, kind::WORD_STRING]);
        assert_eq!(subschema_start(words, 0, 0), 4);
        assert_eq!(subschema_start(words, 0, 1), 6);
        assert_eq!(subschema_end(words, 4), 6);
        assert_eq!(subschema_end(words, 0), 8);
    }

    #[test]
    fn schema_ignores_record_names() {
        let xyz = schema_of(den!({"x": 1, "y": 2, "z": 3}));
        let rgb = schema_of(den!({"r": 4, "g": 5, "b": 6}));
        assert_eq!(xyz, rgb);
    }

    #[test]
    fn schema_round_trips_through_a_number_list_value() {
        let schema = schema_of(den!({"x": 1, "nums": [1]}));
        let as_value = Value::from_denotable(crate::Denotable::List(
            schema
                .words()
                .iter()
                .map(|&w| crate::Denotable::Number(w as f64))
                .collect(),
        ))
        .unwrap();
        let recovered = Schema::from_value(&as_value).unwrap();
        assert_eq!(recovered, schema);
    }
}
