//! The five denotable Value kinds and their schema-word encoding.
//!
//! Schema words are `u64`. To tell kind tags apart from forward offsets, the
//! container kinds occupy the highest three words while `None` and `Number`
//! take the lowest two; every word strictly between `NUMBER` and `STRING` is
//! an offset. Zero can never be a valid offset, so reserving it for `None`
//! costs nothing.
//!
//! The ceiling is `2^53 - 1` rather than `u64::MAX`: schemas are routinely
//! passed around as number-list Values (operator arguments), and every word
//! must survive the trip through an `f64` exactly.

/// Largest integer exactly representable as an `f64`; schema words never
/// exceed it.
pub const WORD_CEILING: u64 = (1 << 53) - 1;

/// Schema word for the None kind.
pub const WORD_NONE: u64 = 0;
/// Schema word for the Number kind.
pub const WORD_NUMBER: u64 = 1;
/// Schema word for the String kind.
pub const WORD_STRING: u64 = WORD_CEILING - 2;
/// Schema word for the List kind.
pub const WORD_LIST: u64 = WORD_CEILING - 1;
/// Schema word for the Record kind.
pub const WORD_RECORD: u64 = WORD_CEILING;

/// The kind of a Value: one ground of `None`/`Number`/`String` or one of the
/// two containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    None,
    Number,
    String,
    List,
    Record,
}

impl Kind {
    /// The schema word encoding this kind.
    pub const fn word(self) -> u64 {
        match self {
            Kind::None => WORD_NONE,
            Kind::Number => WORD_NUMBER,
            Kind::String => WORD_STRING,
            Kind::List => WORD_LIST,
            Kind::Record => WORD_RECORD,
        }
    }

    /// Decodes a schema word into a kind, or `None` if the word is a forward
    /// offset (or a record-size count, which the caller must rule out by
    /// position).
    pub const fn from_word(word: u64) -> Option<Kind> {
        match word {
            WORD_NONE => Some(Kind::None),
            WORD_NUMBER => Some(Kind::Number),
            WORD_STRING => Some(Kind::String),
            WORD_LIST => Some(Kind::List),
            WORD_RECORD => Some(Kind::Record),
            _ => None,
        }
    }

    pub const fn is_ground(self) -> bool {
        matches!(self, Kind::Number | Kind::String)
    }
}

/// Whether `word` encodes a kind (as opposed to an offset).
pub const fn is_kind_word(word: u64) -> bool {
    !(WORD_NUMBER < word && word < WORD_STRING)
}

/// Whether `word` is a forward offset into the schema.
pub const fn is_offset_word(word: u64) -> bool {
    !is_kind_word(word)
}

/// Whether `word` encodes one of the ground kinds (Number or String).
pub const fn is_ground_word(word: u64) -> bool {
    word == WORD_NUMBER || word == WORD_STRING
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_round_trip() {
        for kind in [
            Kind::None,
            Kind::Number,
            Kind::String,
            Kind::List,
            Kind::Record,
        ] {
            assert_eq!(Kind::from_word(kind.word()), Some(kind));
        }
    }

    #[test]
    fn everything_between_number_and_string_is_an_offset() {
        assert!(is_offset_word(2));
        assert!(is_offset_word(WORD_STRING - 1));
        assert!(!is_offset_word(WORD_NONE));
        assert!(!is_offset_word(WORD_NUMBER));
        assert!(!is_offset_word(WORD_STRING));
        assert!(!is_offset_word(WORD_LIST));
        assert!(!is_offset_word(WORD_RECORD));
    }

    #[test]
    fn ground_kinds() {
        assert!(Kind::Number.is_ground());
        assert!(Kind::String.is_ground());
        assert!(!Kind::None.is_ground());
        assert!(!Kind::List.is_ground());
        assert!(!Kind::Record.is_ground());
    }
}
