pub mod backend;
pub mod cli;
pub mod config;
pub mod context;
pub mod coordination;
pub mod document;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod imports;
pub mod indexer;
pub mod path;
pub mod storage;
pub mod syntax;

pub use engine::Engine;
pub use error::EngineError;
