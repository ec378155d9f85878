use std::collections::{HashMap, HashSet};

use crate::error::CtcError;
use crate::types::LabelSequence;

pub const BLANK_ID: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Blank,
    Char(char),
}

/// Bidirectional character <-> label-index table with blank pinned at index 0.
#[derive(Debug, Clone)]
pub struct Alphabet {
    symbols: Vec<Symbol>,
    index: HashMap<char, u32>,
}

impl Alphabet {
    /// Builds an alphabet whose labels `1..=chars.len()` follow `chars` in order.
    pub fn new(chars: &[char]) -> Result<Self, CtcError> {
        if chars.is_empty() {
            return Err(CtcError::invalid_input("alphabet needs at least one symbol"));
        }
        let mut seen = HashSet::with_capacity(chars.len());
        if let Some(c) = chars.iter().find(|&&c| !seen.insert(c)) {
            return Err(CtcError::invalid_input(format!(
                "duplicate alphabet symbol {c:?}"
            )));
        }
        Ok(Self::from_unique_chars(chars))
    }

    /// `{blank, 'a'..='z', '\'', ' '}`: 29 classes.
    pub fn grid() -> Self {
        let mut chars: Vec<char> = ('a'..='z').collect();
        chars.push('\'');
        chars.push(' ');
        Self::from_unique_chars(&chars)
    }

    /// `chars` must be non-empty and duplicate-free.
    fn from_unique_chars(chars: &[char]) -> Self {
        let mut symbols = Vec::with_capacity(chars.len() + 1);
        symbols.push(Symbol::Blank);
        symbols.extend(chars.iter().copied().map(Symbol::Char));
        let index: HashMap<char, u32> = chars
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, (i + 1) as u32))
            .collect();
        assert_eq!(symbols[BLANK_ID as usize], Symbol::Blank);
        assert_eq!(index.len() + 1, symbols.len());
        Self { symbols, index }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn blank_id(&self) -> u32 {
        BLANK_ID
    }

    pub fn encode(&self, symbol: char) -> Result<u32, CtcError> {
        self.index
            .get(&symbol)
            .copied()
            .ok_or(CtcError::UnknownSymbol { symbol })
    }

    pub fn decode(&self, index: u32) -> Option<Symbol> {
        self.symbols.get(index as usize).copied()
    }

    /// Encodes a transcript, silently dropping characters outside the alphabet.
    pub fn encode_transcript(&self, transcript: &str) -> LabelSequence {
        transcript
            .chars()
            .filter_map(|c| self.index.get(&c).copied())
            .collect()
    }

    /// Renders labels as text; blanks and out-of-range indices render nothing.
    pub fn decode_labels(&self, labels: &[u32]) -> String {
        labels
            .iter()
            .filter_map(|&id| match self.decode(id) {
                Some(Symbol::Char(c)) => Some(c),
                _ => None,
            })
            .collect()
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::grid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_alphabet_has_29_classes() {
        let alphabet = Alphabet::grid();
        assert_eq!(alphabet.len(), 29);
        assert_eq!(alphabet.decode(0), Some(Symbol::Blank));
        assert_eq!(alphabet.encode('a').unwrap(), 1);
        assert_eq!(alphabet.encode('z').unwrap(), 26);
        assert_eq!(alphabet.encode('\'').unwrap(), 27);
        assert_eq!(alphabet.encode(' ').unwrap(), 28);
    }

    #[test]
    fn every_symbol_round_trips() {
        let alphabet = Alphabet::grid();
        for index in 1..alphabet.len() as u32 {
            let Some(Symbol::Char(c)) = alphabet.decode(index) else {
                panic!("index {index} should be a character");
            };
            assert_eq!(alphabet.encode(c).unwrap(), index);
        }
    }

    #[test]
    fn unknown_symbol_is_an_error_for_single_encode() {
        let alphabet = Alphabet::grid();
        assert!(matches!(
            alphabet.encode('5'),
            Err(CtcError::UnknownSymbol { symbol: '5' })
        ));
    }

    #[test]
    fn transcript_drops_unknown_characters() {
        let alphabet = Alphabet::grid();
        let labels = alphabet.encode_transcript("bin 5 blue");
        assert_eq!(alphabet.decode_labels(&labels), "bin  blue");
        assert!(!labels.contains(&BLANK_ID));
    }

    #[test]
    fn uppercase_is_outside_the_grid_alphabet() {
        let alphabet = Alphabet::grid();
        assert_eq!(alphabet.encode_transcript("Set").len(), 2);
    }

    #[test]
    fn out_of_range_index_decodes_to_none() {
        assert_eq!(Alphabet::grid().decode(29), None);
    }

    #[test]
    fn custom_alphabet_rejects_duplicates() {
        assert!(Alphabet::new(&['a', 'b', 'a']).is_err());
        assert!(Alphabet::new(&[]).is_err());
        let alphabet = Alphabet::new(&['x', 'y']).unwrap();
        assert_eq!(alphabet.len(), 3);
        assert_eq!(alphabet.encode('y').unwrap(), 2);
    }

    #[test]
    fn grid_matches_custom_alphabet_with_same_chars() {
        let mut chars: Vec<char> = ('a'..='z').collect();
        chars.extend(['\'', ' ']);
        let custom = Alphabet::new(&chars).unwrap();
        let grid = Alphabet::grid();
        assert_eq!(grid.len(), custom.len());
        assert_eq!(grid.decode(BLANK_ID), Some(Symbol::Blank));
        for index in 0..grid.len() as u32 {
            assert_eq!(grid.decode(index), custom.decode(index));
        }
    }
}
