pub mod cache;
pub mod document_locks;
pub mod hierarchy_builder;
pub mod indexing_engine;
pub mod relationships;
pub mod search;
pub mod structure;
