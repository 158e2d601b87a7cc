//! Durable state store for the foreman engine.
//!
//! A single SQLite database holds the project singleton, agent rows,
//! append-only checkpoints, and the append-only message log. This crate
//! owns the schema (see `migrations/`) and exposes typed query functions;
//! everything above it depends only on those functions, never on SQL.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
