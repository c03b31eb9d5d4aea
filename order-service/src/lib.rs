//! Order side of the reservation flow: order persistence, dispatch of
//! reservation tasks to the inventory side, and settlement through the
//! direct answer, polling, status callbacks and reconciliation.

pub mod api;
pub mod config;
pub mod error;
pub mod inventory;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod schema;
pub mod store;

use diesel_migrations::{embed_migrations, EmbeddedMigrations};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
