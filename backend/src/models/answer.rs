// src/models/answer.rs

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Deserializer, Serialize};

/// A user's selection for one question, or the answer key of a question.
///
/// Serialized as a bare index for single choice and as an array of indices
/// for multiple choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Answer {
    Single(usize),
    Multiple(BTreeSet<usize>),
}

/// Question id -> selection.
pub type AnswerMap = HashMap<String, Answer>;

impl Answer {
    /// Selected option indices, ignoring whether the selection was single or multi.
    pub fn indices(&self) -> BTreeSet<usize> {
        match self {
            Answer::Single(index) => BTreeSet::from([*index]),
            Answer::Multiple(indices) => indices.clone(),
        }
    }

    /// Whether this selection matches `key`.
    /// Multi-select comparison is order-independent.
    pub fn matches(&self, key: &Answer) -> bool {
        match (self, key) {
            (Answer::Single(a), Answer::Single(b)) => a == b,
            _ => self.indices() == key.indices(),
        }
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self, Answer::Multiple(_))
    }

    /// Highest option index referenced, if any.
    pub fn max_index(&self) -> Option<usize> {
        match self {
            Answer::Single(index) => Some(*index),
            Answer::Multiple(indices) => indices.iter().next_back().copied(),
        }
    }
}

/// The shapes clients send a selection in.
/// Resolved into `Answer` once, at the request boundary.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawSelection {
    Index(usize),
    Indices(Vec<usize>),
    Labeled { index: usize },
    LabeledMany { indices: Vec<usize> },
}

impl From<RawSelection> for Answer {
    fn from(raw: RawSelection) -> Self {
        match raw {
            RawSelection::Index(index) | RawSelection::Labeled { index } => Answer::Single(index),
            RawSelection::Indices(indices) | RawSelection::LabeledMany { indices } => {
                Answer::Multiple(indices.into_iter().collect())
            }
        }
    }
}

impl<'de> Deserialize<'de> for Answer {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawSelection::deserialize(deserializer).map(Answer::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingests_every_client_shape() {
        let single: Answer = serde_json::from_str("2").unwrap();
        assert_eq!(single, Answer::Single(2));

        let many: Answer = serde_json::from_str("[3, 1, 3]").unwrap();
        assert_eq!(many, Answer::Multiple(BTreeSet::from([1, 3])));

        let labeled: Answer = serde_json::from_str(r#"{"index": 1}"#).unwrap();
        assert_eq!(labeled, Answer::Single(1));

        let labeled_many: Answer = serde_json::from_str(r#"{"indices": [0, 2]}"#).unwrap();
        assert_eq!(labeled_many, Answer::Multiple(BTreeSet::from([0, 2])));
    }

    #[test]
    fn test_rejects_negative_index() {
        assert!(serde_json::from_str::<Answer>("-1").is_err());
    }

    #[test]
    fn test_serializes_compactly() {
        assert_eq!(serde_json::to_string(&Answer::Single(4)).unwrap(), "4");
        let many = Answer::Multiple(BTreeSet::from([2, 0]));
        assert_eq!(serde_json::to_string(&many).unwrap(), "[0,2]");
    }

    #[test]
    fn test_multi_select_matches_regardless_of_order() {
        let key = Answer::Multiple(BTreeSet::from([0, 2]));
        let selection: Answer = serde_json::from_str("[2, 0]").unwrap();
        assert!(selection.matches(&key));
        assert!(!Answer::Multiple(BTreeSet::from([0])).matches(&key));
        assert!(Answer::Multiple(BTreeSet::from([1])).matches(&Answer::Single(1)));
    }
}
