// ============================================================================
// Structural Diff Module
// ============================================================================

pub mod engine;
pub mod path;
pub mod summary;

pub use engine::{Comparator, DiffEngine, DiffOptions};
pub use path::PathSegment;
pub use summary::{DiffComplexity, DiffSummary, summarize_diff};
