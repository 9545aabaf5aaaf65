pub mod pattern;
pub mod location;
pub mod timeframe;
pub mod record;
pub mod rules;
pub mod matcher;
pub mod filter;
pub mod store;
pub mod mapreduce;
pub mod batch;
pub mod aggregate;
pub mod prose;
pub mod config;
pub mod engine;

pub use engine::{QueryEngine, QueryError, QueryResponse};
pub use matcher::PatternMatcher;
pub use pattern::Pattern;
