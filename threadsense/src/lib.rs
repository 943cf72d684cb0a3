// Library interface for threadsense modules
// This allows tests and other binaries to import modules

pub mod error;
pub mod fetcher;
pub mod llm;
pub mod memory;
pub mod moderation;
pub mod server;
pub mod service;
pub mod storage;

pub use error::ThreadSenseError;
