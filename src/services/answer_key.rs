use std::collections::{BTreeSet, HashSet};

use thiserror::Error;

use crate::db::models::{Question, QuestionOption};
use crate::db::types::QuestionType;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum QuestionError {
    #[error("a question needs at least 2 options")]
    TooFewOptions,
    #[error("option {0} has an empty id")]
    EmptyOptionId(usize),
    #[error("option {0} has empty text")]
    EmptyOptionText(usize),
    #[error("option id '{0}' is used more than once")]
    DuplicateOptionId(String),
    #[error("option text '{0}' is used more than once")]
    DuplicateOptionText(String),
    #[error("at least one option must be marked correct")]
    NoCorrectOption,
    #[error("true/false questions need exactly 2 options")]
    TrueFalseOptionCount,
    #[error("true/false questions need exactly 1 correct option")]
    TrueFalseCorrectCount,
}

/// Correct option ids for a single question. Exposes only a yes/no verdict on a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AnswerKey {
    correct: BTreeSet<String>,
}

impl AnswerKey {
    pub(crate) fn from_options(options: &[QuestionOption]) -> Self {
        Self {
            correct: options
                .iter()
                .filter(|option| option.is_correct)
                .map(|option| option.id.clone())
                .collect(),
        }
    }

    /// Exact set match. Duplicates collapse and no partial credit is given.
    pub(crate) fn accepts<S: AsRef<str>>(&self, selected: &[S]) -> bool {
        let chosen: BTreeSet<&str> = selected.iter().map(AsRef::as_ref).collect();
        chosen.len() == self.correct.len()
            && chosen.iter().all(|option_id| self.correct.contains(*option_id))
    }

    /// Sorted correct option ids. Only for privileged readers.
    pub(crate) fn reveal(&self) -> Vec<String> {
        self.correct.iter().cloned().collect()
    }
}

impl Question {
    pub(crate) fn answer_key(&self) -> AnswerKey {
        AnswerKey::from_options(&self.options.0)
    }
}

pub(crate) fn validate_options(
    question_type: QuestionType,
    options: &[QuestionOption],
) -> Result<(), QuestionError> {
    if options.len() < 2 {
        return Err(QuestionError::TooFewOptions);
    }

    let mut ids = HashSet::new();
    let mut texts = HashSet::new();
    for (index, option) in options.iter().enumerate() {
        let id = option.id.trim();
        let text = option.text.trim();
        if id.is_empty() {
            return Err(QuestionError::EmptyOptionId(index));
        }
        if text.is_empty() {
            return Err(QuestionError::EmptyOptionText(index));
        }
        if !ids.insert(id) {
            return Err(QuestionError::DuplicateOptionId(id.to_string()));
        }
        if !texts.insert(text) {
            return Err(QuestionError::DuplicateOptionText(text.to_string()));
        }
    }

    let correct = options.iter().filter(|option| option.is_correct).count();
    if correct == 0 {
        return Err(QuestionError::NoCorrectOption);
    }

    if question_type == QuestionType::TrueFalse {
        if options.len() != 2 {
            return Err(QuestionError::TrueFalseOptionCount);
        }
        if correct != 1 {
            return Err(QuestionError::TrueFalseCorrectCount);
        }
    }

    Ok(())
}
