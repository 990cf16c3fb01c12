pub mod api;
pub mod indexer;
