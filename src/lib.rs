//! # statusphere-store
//!
//! PostgreSQL persistence client for a status-page scraper.
//!
//! The scraper hands scraped [`StatusPage`]s and [`Incident`]s to a
//! [`StoreClient`], which keeps them in two tables inside a dedicated
//! namespace. Incidents are written with a single set-based upsert keyed
//! by their deep link, so concurrent scrape runs never race on a
//! read-then-write.
//!
//! ## Architecture
//!
//! ```text
//! Scraper (out of scope)
//!     │
//!     ├── StoreConfig (config/)       STATUSPHERE_POSTGRES_* environment
//!     │
//!     ├── StoreClient (persistence/)  connect, auto_migrate, reads, upserts
//!     ├── TableDef (persistence/)     explicit column descriptions
//!     │
//!     └── PostgreSQL
//!         └── <namespace>.status_page, <namespace>.incidents
//! ```

pub mod config;
pub mod error;
pub mod persistence;

pub use config::StoreConfig;
pub use error::StoreError;
pub use persistence::{Impact, Incident, IncidentEvent, StatusPage, StoreClient};
