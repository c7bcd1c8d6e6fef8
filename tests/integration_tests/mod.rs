//! Integration tests module
//!
//! Cross-component tests for fleetscope:
//! - Frontier store with memory, SQLite and failing backends
//! - Coordinator lifecycle, liveness and persistence failures
//! - Checkpoint files, corruption fallback and resume
//! - Whole crawls with local and remote (HTTP) workers
//! - REST API envelope and error codes

pub mod api_test;
pub mod checkpoint_test;
pub mod coordinator_test;
pub mod e2e_test;
pub mod fixtures;
pub mod frontier_test;
