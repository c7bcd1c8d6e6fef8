pub mod checkpoints;
pub mod crawl;
pub mod master;
pub mod runtime;
pub mod scope;
pub mod worker;

pub use checkpoints::checkpoints;
pub use crawl::{crawl, resume, CrawlParams};
pub use master::{master, MasterParams};
pub use scope::scope_test;
pub use worker::{worker, WorkerParams};
