pub mod breaker;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod graph;
pub mod logging;
pub mod query;
pub mod store;
pub mod summarize;

pub use config::Config;
pub use discovery::{
    DiscoveredResource, DiscoveryEngine, DiscoveryMethod, DiscoveryRequest, DiscoveryResult,
    EngineStats,
};
pub use error::{PlatctxError, Result, StoreError, StoreResult};
pub use graph::{Direction, RelationshipEdge, RelationshipGraph, ResourceRef};
pub use query::{QueryProcessor, ResolveOptions};
pub use store::{ListFilter, Resource, ResourcePage, ResourceStore};
pub use summarize::{FieldSummarizer, Summarizer};
