//! Question bank with non-repeating draws
//!
//! This module holds the per-category question lists used to prompt the
//! current speaker. Questions are drawn uniformly at random without
//! repetition: each category keeps a working set of not-yet-posed indices
//! that is lazily rebuilt when it runs out. Progress is tracked per
//! category, so switching the selected category never resets another
//! category's working set.

use std::collections::HashMap;

use garde::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named category of questions
///
/// Categories are validated at construction time: a category must have a
/// non-empty name and at least one question, all within the configured
/// length limits.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Category {
    /// The name of the category, used to select it
    #[garde(length(min = 1, max = crate::constants::questions::MAX_CATEGORY_LENGTH))]
    pub name: String,
    /// The questions belonging to this category
    #[garde(
        length(min = 1, max = crate::constants::questions::MAX_QUESTION_COUNT),
        inner(length(min = 1, max = crate::constants::questions::MAX_QUESTION_LENGTH))
    )]
    pub questions: Vec<String>,
}

/// Errors that can occur when building or using a question bank
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The bank was constructed without any category
    #[error("question bank has no categories")]
    NoCategories,
    /// The bank was constructed with more categories than allowed
    #[error("too many categories: {0}")]
    TooManyCategories(usize),
    /// Two categories share the same name
    #[error("duplicate category name: {0}")]
    DuplicateCategory(String),
    /// A category failed validation
    #[error("invalid category {name}: {report}")]
    InvalidCategory {
        /// The name of the offending category
        name: String,
        /// The rendered validation report
        report: String,
    },
    /// The requested category does not exist
    #[error("unknown category: {0}")]
    UnknownCategory(String),
}

/// Serialization helper for QuestionBank struct
#[derive(Deserialize)]
struct QuestionBankSerde {
    categories: Vec<Category>,
    selected: String,
}

/// Per-category question lists and consumption state
///
/// The bank tracks, for each category, which question indices have not yet
/// been posed. A draw picks uniformly among the remaining indices of the
/// selected category and removes it; once a category is exhausted its
/// working set is refilled with the full index range on the next draw.
#[derive(Debug, Serialize, Deserialize)]
#[serde(try_from = "QuestionBankSerde")]
pub struct QuestionBank {
    /// All configured categories, in configuration order
    categories: Vec<Category>,
    /// The currently selected category name
    selected: String,

    /// Not-yet-posed question indices per category, lazily populated
    #[serde(skip_serializing)]
    unposed: HashMap<String, Vec<usize>>,
}

impl TryFrom<QuestionBankSerde> for QuestionBank {
    type Error = Error;

    /// Reconstructs the QuestionBank from serialized data
    ///
    /// Deserialized data goes through the same validation as
    /// [`QuestionBank::new`], so a restored bank can never hold a state a
    /// freshly built one would have rejected. The working sets are not
    /// serialized; they are rebuilt lazily on the next draw, which
    /// restarts the no-repeat cycle for every category.
    fn try_from(serde: QuestionBankSerde) -> Result<Self, Error> {
        let QuestionBankSerde {
            categories,
            selected,
        } = serde;

        let mut bank = Self::new(categories)?;
        bank.select(&selected)?;
        Ok(bank)
    }
}

impl QuestionBank {
    /// Creates a question bank from a list of categories
    ///
    /// The first category becomes the initially selected one, matching the
    /// behavior of an operator panel that defaults to the first entry of
    /// its category list.
    ///
    /// # Arguments
    ///
    /// * `categories` - The categories to serve questions from
    ///
    /// # Errors
    ///
    /// Returns an error if the list is empty, a category name is
    /// duplicated, or any category fails validation. Configuration
    /// failures are fatal at startup; they never occur at runtime.
    pub fn new(categories: Vec<Category>) -> Result<Self, Error> {
        let Some(first) = categories.first() else {
            return Err(Error::NoCategories);
        };
        let selected = first.name.clone();

        if categories.len() > crate::constants::questions::MAX_CATEGORY_COUNT {
            return Err(Error::TooManyCategories(categories.len()));
        }

        let mut seen = std::collections::HashSet::new();
        for category in &categories {
            category
                .validate()
                .map_err(|report| Error::InvalidCategory {
                    name: category.name.clone(),
                    report: report.to_string(),
                })?;

            if !seen.insert(category.name.clone()) {
                return Err(Error::DuplicateCategory(category.name.clone()));
            }
        }

        Ok(Self {
            categories,
            selected,
            unposed: HashMap::new(),
        })
    }

    /// Creates a bank with the built-in question set
    ///
    /// Useful for embedders that do not load their own configuration.
    pub fn default_set() -> Self {
        let categories = vec![
            Category {
                name: "icebreakers".to_owned(),
                questions: [
                    "What made you smile today?",
                    "What is the best advice you ever received?",
                    "What did you want to become as a child?",
                    "What is a skill you wish you had?",
                    "What was the last thing you celebrated?",
                ]
                .map(str::to_owned)
                .to_vec(),
            },
            Category {
                name: "this city".to_owned(),
                questions: [
                    "What would you change about this city?",
                    "Where in this city do you go to think?",
                    "What should a visitor see here that no guidebook mentions?",
                    "What sound do you associate with this neighborhood?",
                ]
                .map(str::to_owned)
                .to_vec(),
            },
            Category {
                name: "music".to_owned(),
                questions: [
                    "What song is stuck in your head?",
                    "What was the first concert you attended?",
                    "What music did your parents play at home?",
                ]
                .map(str::to_owned)
                .to_vec(),
            },
        ];

        Self::new(categories).expect("built-in question set is valid")
    }

    /// Returns the currently selected category name
    pub fn selected(&self) -> &str {
        &self.selected
    }

    /// Returns the names of all configured categories
    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|c| c.name.as_str())
    }

    /// Selects the category used by subsequent draws
    ///
    /// Selecting a category does not draw a question and does not touch
    /// any category's working set; the newly selected category resumes
    /// wherever its own no-repeat cycle left off.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownCategory` if no category with that name
    /// exists.
    pub fn select(&mut self, name: &str) -> Result<(), Error> {
        if self.categories.iter().any(|c| c.name == name) {
            self.selected = name.to_owned();
            Ok(())
        } else {
            Err(Error::UnknownCategory(name.to_owned()))
        }
    }

    /// Draws a question from the selected category
    ///
    /// Picks uniformly at random among the category's not-yet-posed
    /// questions and removes it from the working set. When the working set
    /// is empty (first use or exhausted), it is repopulated with every
    /// index of the category first, so a category with M questions yields
    /// a full permutation every M consecutive draws.
    pub fn draw(&mut self) -> String {
        let category = self
            .categories
            .iter()
            .find(|c| c.name == self.selected)
            .expect("selected category is validated at construction");

        let unposed = self.unposed.entry(self.selected.clone()).or_default();
        if unposed.is_empty() {
            unposed.extend(0..category.questions.len());
        }

        let pick = fastrand::usize(..unposed.len());
        let question_index = unposed.swap_remove(pick);

        category.questions[question_index].clone()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn create_test_categories() -> Vec<Category> {
        vec![
            Category {
                name: "history".to_string(),
                questions: (0..5).map(|i| format!("history question {i}")).collect(),
            },
            Category {
                name: "science".to_string(),
                questions: (0..3).map(|i| format!("science question {i}")).collect(),
            },
        ]
    }

    #[test]
    fn test_default_set_is_valid() {
        let mut bank = QuestionBank::default_set();
        assert_eq!(bank.selected(), "icebreakers");
        assert!(bank.category_names().count() >= 2);
        assert!(!bank.draw().is_empty());
    }

    #[test]
    fn test_first_category_selected_by_default() {
        let bank = QuestionBank::new(create_test_categories()).unwrap();
        assert_eq!(bank.selected(), "history");
    }

    #[test]
    fn test_empty_bank_rejected() {
        assert_eq!(QuestionBank::new(vec![]).unwrap_err(), Error::NoCategories);
    }

    #[test]
    fn test_too_many_categories_rejected() {
        let categories = (0..=crate::constants::questions::MAX_CATEGORY_COUNT)
            .map(|i| Category {
                name: format!("category {i}"),
                questions: vec!["a question".to_string()],
            })
            .collect();

        assert!(matches!(
            QuestionBank::new(categories),
            Err(Error::TooManyCategories(_))
        ));
    }

    #[test]
    fn test_duplicate_category_rejected() {
        let mut categories = create_test_categories();
        categories.push(Category {
            name: "history".to_string(),
            questions: vec!["another".to_string()],
        });

        assert_eq!(
            QuestionBank::new(categories).unwrap_err(),
            Error::DuplicateCategory("history".to_string())
        );
    }

    #[test]
    fn test_category_without_questions_rejected() {
        let result = QuestionBank::new(vec![Category {
            name: "empty".to_string(),
            questions: vec![],
        }]);

        assert!(matches!(result, Err(Error::InvalidCategory { .. })));
    }

    #[test]
    fn test_question_too_long_rejected() {
        let result = QuestionBank::new(vec![Category {
            name: "long".to_string(),
            questions: vec![
                "a".repeat(crate::constants::questions::MAX_QUESTION_LENGTH + 1),
            ],
        }]);

        assert!(matches!(result, Err(Error::InvalidCategory { .. })));
    }

    #[test]
    fn test_select_unknown_category() {
        let mut bank = QuestionBank::new(create_test_categories()).unwrap();
        assert_eq!(
            bank.select("sports"),
            Err(Error::UnknownCategory("sports".to_string()))
        );
        assert_eq!(bank.selected(), "history");
    }

    #[test]
    fn test_draws_are_a_permutation() {
        let mut bank = QuestionBank::new(create_test_categories()).unwrap();

        let drawn: HashSet<String> = (0..5).map(|_| bank.draw()).collect();
        assert_eq!(drawn.len(), 5, "five draws must yield five distinct questions");

        // the sixth draw starts a new cycle and may repeat
        let sixth = bank.draw();
        assert!(drawn.contains(&sixth));
    }

    #[test]
    fn test_switching_category_preserves_progress() {
        let mut bank = QuestionBank::new(create_test_categories()).unwrap();

        // consume four of five history questions
        let mut drawn: HashSet<String> = (0..4).map(|_| bank.draw()).collect();
        assert_eq!(drawn.len(), 4);

        // detour through the other category
        bank.select("science").unwrap();
        let _ = bank.draw();
        bank.select("history").unwrap();

        // the remaining history question must not repeat anything drawn so far
        let fifth = bank.draw();
        assert!(drawn.insert(fifth), "history progress was reset by switching");
        assert_eq!(drawn.len(), 5);
    }

    #[test]
    fn test_deserializing_unknown_selection_is_rejected() {
        let json = r#"{"categories":[{"name":"history","questions":["a question"]}],"selected":"does-not-exist"}"#;
        let result: Result<QuestionBank, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserializing_invalid_categories_is_rejected() {
        // an empty question list would make draws impossible
        let json = r#"{"categories":[{"name":"history","questions":[]}],"selected":"history"}"#;
        let result: Result<QuestionBank, _> = serde_json::from_str(json);
        assert!(result.is_err());

        let json = r#"{"categories":[],"selected":"history"}"#;
        let result: Result<QuestionBank, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_serde_round_trip_keeps_selection() {
        let mut bank = QuestionBank::new(create_test_categories()).unwrap();
        bank.select("science").unwrap();

        let json = serde_json::to_string(&bank).unwrap();
        let mut restored: QuestionBank = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.selected(), "science");
        // draws still work after a round trip; working sets rebuild lazily
        let drawn: HashSet<String> = (0..3).map(|_| restored.draw()).collect();
        assert_eq!(drawn.len(), 3);
    }
}
