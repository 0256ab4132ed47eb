pub mod csv;
pub mod pipeline;
pub mod rules;

pub use csv::{ColumnMapping, FileFormatSpec, FormatError, NumberFormat};
pub use pipeline::{ImportEntry, ImportError, ImportOutcome, ImportPipeline, ImportReport};
pub use rules::{compile_pattern, match_category, CategoryMatcher, RuleError};
