//! Configuration constants for the mic coordination system
//!
//! This module contains the configuration limits and constraints
//! used throughout the coordinator to ensure data integrity and
//! provide consistent boundaries for different components.

/// Session-wide configuration constants
pub mod session {
    /// Default number of physical microphone slots
    pub const DEFAULT_MIC_COUNT: usize = 4;
    /// Minimum number of microphone slots a session can be configured with
    pub const MIN_MIC_COUNT: usize = 1;
    /// Maximum number of microphone slots a session can be configured with
    pub const MAX_MIC_COUNT: usize = 16;
    /// Maximum number of connected clients in a single session
    pub const MAX_CLIENT_COUNT: usize = 1000;
}

/// Question bank configuration constants
pub mod questions {
    /// Maximum length of a category name in characters
    pub const MAX_CATEGORY_LENGTH: usize = 100;
    /// Maximum number of categories in a question bank
    pub const MAX_CATEGORY_COUNT: usize = 50;
    /// Maximum number of questions in a single category
    pub const MAX_QUESTION_COUNT: usize = 500;
    /// Maximum length of a single question in characters
    pub const MAX_QUESTION_LENGTH: usize = 500;
}
