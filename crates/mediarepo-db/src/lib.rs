//! Media record store
//!
//! `MediaStore` is the contract the upload and download services need from
//! persistence. `PgMediaStore` implements it over PostgreSQL; `InMemoryMediaStore`
//! keeps records in process memory for tests and single-process tooling.

pub mod media;
pub mod memory;
pub mod setup;

pub use media::{MediaStore, PgMediaStore};
pub use memory::InMemoryMediaStore;
pub use setup::setup_database;
