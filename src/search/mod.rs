//! Search module - opens an extracted index and answers queries / 搜索模块
//!
//! Architecture principles / 架构原则：
//! - Search module only exposes primitives: open, query
//! - Fetching the index onto disk is the fetch module's job
//! - Supports multilingual search (Chinese, Japanese, Korean, Cyrillic, Latin)

pub mod engine;
pub mod index;
pub mod schema;
pub mod tokenizer;

pub use engine::{IndexStats, SearchEngine};
pub use index::SearchIndex;
pub use schema::{Document, FacetCount, IndexMeta, SearchError, SearchHit, SearchQuery, SearchResults};
