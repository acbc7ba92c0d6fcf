//! Persistence layer: PostgreSQL storage for status pages and incidents.
//!
//! [`StoreClient`] owns the connection and exposes the read and write
//! operations. Table layouts live in [`schema`] next to the entity
//! definitions in [`models`].

pub mod models;
pub mod postgres;
pub mod schema;

pub use models::{Impact, Incident, IncidentEvent, StatusPage};
pub use postgres::StoreClient;
