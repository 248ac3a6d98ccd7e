//! Room Codes
//!
//! Six-character human-shareable join tokens. The alphabet excludes the
//! ambiguous glyphs I, O, 0 and 1 so codes survive being read aloud or
//! copied from a phone screen. Codes are case-insensitive on input and
//! canonicalized to uppercase.

use rand::Rng;
use serde::Serialize;
use std::fmt;

use crate::error::CoordError;

/// Characters allowed in a room code.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Fixed room code length.
pub const CODE_LEN: usize = 6;

/// A canonical (uppercase, validated) room code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a random code. Uniqueness within a namespace is the
    /// registry's responsibility (it re-rolls on collision).
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let code: String = (0..CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        RoomCode(code)
    }

    /// Canonicalize and validate a client-supplied code.
    ///
    /// A code that cannot exist (wrong length, characters outside the
    /// alphabet) is reported as `room_not_found`, matching what a lookup
    /// would have said.
    pub fn parse(input: &str) -> Result<Self, CoordError> {
        let canonical = input.trim().to_ascii_uppercase();
        if canonical.len() != CODE_LEN {
            return Err(CoordError::RoomNotFound);
        }
        if !canonical.bytes().all(|b| CODE_ALPHABET.contains(&b)) {
            return Err(CoordError::RoomNotFound);
        }
        Ok(RoomCode(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_use_allowed_alphabet() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let code = RoomCode::generate(&mut rng);
            assert_eq!(code.as_str().len(), CODE_LEN);
            assert!(code
                .as_str()
                .bytes()
                .all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_parse_canonicalizes_to_uppercase() {
        let code = RoomCode::parse("  abcdef ").unwrap();
        assert_eq!(code.as_str(), "ABCDEF");
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert_eq!(RoomCode::parse("ABC"), Err(CoordError::RoomNotFound));
        assert_eq!(RoomCode::parse("ABCDEFG"), Err(CoordError::RoomNotFound));
        assert_eq!(RoomCode::parse(""), Err(CoordError::RoomNotFound));
    }

    #[test]
    fn test_parse_rejects_ambiguous_glyphs() {
        // I, O, 0 and 1 are excluded from the alphabet.
        assert_eq!(RoomCode::parse("ABCDE1"), Err(CoordError::RoomNotFound));
        assert_eq!(RoomCode::parse("ABCDE0"), Err(CoordError::RoomNotFound));
        assert_eq!(RoomCode::parse("ABCDEI"), Err(CoordError::RoomNotFound));
        assert_eq!(RoomCode::parse("ABCDEO"), Err(CoordError::RoomNotFound));
    }
}
