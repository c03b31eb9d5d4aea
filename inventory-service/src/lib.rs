//! Inventory side of the reservation flow: the product and reservation
//! ledgers, the reservation engine, the transactional outbox and the HTTP and
//! Kafka entry points feeding tasks into the engine.

pub mod api;
pub mod chaos;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingress;
pub mod models;
pub mod outbox;
pub mod schema;
pub mod store;
pub mod task_consumer;

use diesel_migrations::{embed_migrations, EmbeddedMigrations};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
