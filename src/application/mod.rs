// Application layer: the ledger use cases on top of domain rules and storage.

pub mod config;
pub mod error;
pub mod service;

pub use config::*;
pub use error::*;
pub use service::*;
