//! Runs untrusted, model-proposed media commands against one user's files in a
//! disposable container and registers the files they produce.

pub mod adapters;
pub mod agent;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod mapper;
pub mod observability;
pub mod ports;
pub mod preset;
pub mod registrar;
pub mod sandbox;
pub mod schema;
pub mod sequencer;
pub mod store;
pub mod validator;

pub use engine::Engine;
pub use error::{EngineError, ErrorKind, ErrorReport, RunFailure};
pub use schema::{CommandProposal, ExecutionResult, FileEvent, StoredFile};
