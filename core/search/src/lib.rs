pub mod engine;
pub mod grouping;
pub mod render;

pub use engine::{escape_like, ScopedSearch, SearchHit, SearchResults};
pub use grouping::{group_fallback, FallbackGroup, GLOBAL_LABEL};
pub use render::{render_global_summary, render_results, render_results_at, render_scope_summary};
