//! # FlowerCost
//!
//! Data synchronization and pricing layer for a retail florist: product
//! costs, markup-based retail pricing, arrangement recipes, order history and
//! point-of-sale handoff.
//!
//! Data lives either in a PostgreSQL store scoped to an authenticated account
//! or in a local JSON cache for unauthenticated use. The
//! [`coordinator::PersistenceCoordinator`] owns the in-memory snapshot and
//! routes every change through the session's [`repository::Repositories`].

pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod insights;
pub mod inventory;
pub mod local_cache;
pub mod matcher;
pub mod model;
pub mod pos;
pub mod pricing;
pub mod recipe_analysis;
pub mod remote_store;
pub mod repository;
pub mod sample_data;
pub mod validation;
