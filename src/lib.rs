//! # Job Store Library
//!
//! A relational store for dependency-aware job scheduling: jobs declare the
//! products they produce and require, the store derives the flow graph,
//! hands out ready tickets and arbitrates state changes with an optimistic
//! lock on each job's `update_id`.

pub mod command;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod seeds;
pub mod server;
pub mod telemetry;
pub mod worker;
pub use migration;
