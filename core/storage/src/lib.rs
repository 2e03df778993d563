//! Record store abstraction for NutriVault.
//!
//! This module provides a trait-based interface over named collections of
//! JSON documents, three conforming backends, and a registry that selects
//! one at startup from configuration.
//!
//! # Design Principles
//! - Backend isolation: no backend-specific logic outside this crate
//! - Async operations: all I/O operations are async
//! - Identical ordering: every backend preserves insertion order
//! - Corruption tolerance: unreadable persisted data is logged and skipped

mod collection;
pub mod document;
pub mod file;
pub mod memory;
pub mod registry;
pub mod store;

pub use document::DocumentStore;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use registry::{create_default_registry, StoreFactory, StoreRegistry};
pub use store::{validate_name, Document, Filter, IndexSpec, Mutation, RecordStore};
