//! # finreport core
//!
//! Runtime-free logic for finreport: the data model, the error taxonomy,
//! chunking, collaborator traits (stores, vector index, blob store,
//! embedding and completion models), the retrieval/selection algorithm,
//! the structured financial analysis extractor, and report rendering.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Persistence and
//! model providers are injected through the traits in [`store`],
//! [`embedding`] and [`completion`].

pub mod analysis;
pub mod chunk;
pub mod completion;
pub mod embedding;
pub mod error;
pub mod models;
pub mod render;
pub mod search;
pub mod store;

pub use error::{Error, Result};
