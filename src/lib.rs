//! # gitvault
//!
//! A per-tenant write coordinator for git-backed content stores.
//!
//! Each write task (an article plus its repository, credentials and vault)
//! is recorded in a durable ledger, placed into the next free
//! `Folder_N/Article_M.md` slot, and pushed through a contents API. Titles
//! are mapped to their article paths in batched
//! `TitleIndex/TitleIndex_K.jsonl` files.
//! A bounded SQLite cache per tenant keeps recent titles and articles
//! locally readable.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │ CLI/HTTP │──▶│ Coordinator  │──▶│ ContentStore │
//! │ (gv)     │   │ (per tenant) │   │ GitHub API   │
//! └──────────┘   └──────┬───────┘   └──────────────┘
//!                       ▼
//!                ┌──────────────┐
//!                │    SQLite    │
//!                │ ledger+index │
//!                └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! gv --tenant acme init
//! gv --tenant acme submit --owner acme --repo notes --vault-name team \
//!     --title "Hello" --content "First note" --process
//! gv --tenant acme status
//! gv serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`coordinator`] | Per-tenant single-writer worker |
//! | [`remote`] | Content store abstraction, retries, GitHub client |
//! | [`sqlite_store`] | SQLite-backed local index and task ledger |
//! | [`tenants`] | Tenant registry |
//! | [`token_cache`] | Installation token cache |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod articles;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod migrate;
pub mod remote;
pub mod server;
pub mod sqlite_store;
pub mod status;
pub mod tasks;
pub mod tenants;
pub mod token_cache;

pub use gitvault_core::{VaultError, VaultResult};
