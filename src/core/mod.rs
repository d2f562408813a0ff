//! Core modules: stage model, field registry, fragment builders, and the
//! SQLite reference collaborators.

pub mod actor;
pub mod actor_store;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod field;
pub mod join;
pub mod predicate;
pub mod schemas;
pub mod sql;
pub mod stage;
pub mod time;
pub mod trace;
pub mod user;
pub mod write;
