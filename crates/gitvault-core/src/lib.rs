//! # gitvault core
//!
//! Shared, I/O-free logic for gitvault: data models, the shard allocator,
//! vault path normalization, title hashing, the title-index file codec, and
//! the [`store::IndexStore`] abstraction.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! The application crate (`gitvault`) supplies the SQLite store, the remote
//! content-store client, and the per-tenant push coordinator.

pub mod allocator;
pub mod error;
pub mod hash;
pub mod index_file;
pub mod models;
pub mod paths;
pub mod store;

pub use error::{VaultError, VaultResult};
