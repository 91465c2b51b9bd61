//! # stratum-search
//!
//! Tag query and suggestion engine for stratum.
//!
//! This crate provides:
//! - Multi-group tag filtering with union (`any`) and intersection (`all`) semantics
//! - Fuzzy tag autocomplete with a similarity cutoff
//! - Co-occurrence restricted suggestions
//!
//! ## Example
//!
//! ```ignore
//! use stratum_search::{TagQueryEngine, SuggestTagsRequest, TagFilterSpec, TagMatchMode};
//! use stratum_db::{create_pool, PgFileRepository, PgTagRepository};
//!
//! let pool = create_pool("postgres://...").await?;
//! let engine = TagQueryEngine::new(
//!     PgTagRepository::new(pool.clone()),
//!     PgFileRepository::new(pool),
//! );
//!
//! let filter = TagFilterSpec::new(TagMatchMode::All)
//!     .with_type_name("project", "apollo")
//!     .with_type_name("status", "final");
//! let files = engine.resolve_entities_by_tags(tenant_id, &filter, None, None).await?;
//!
//! let suggestions = engine
//!     .suggest_tags(tenant_id, &SuggestTagsRequest::new("apol"))
//!     .await?;
//! ```

pub mod combine;
pub mod engine;
pub mod fuzzy;

// Re-export core types
pub use stratum_core::*;

pub use combine::{combine_groups, GroupMatch};
pub use engine::{SuggestTagsRequest, TagQueryEngine, TagSuggestion, TaggedEntityView};
