//! Database seeding functionality
//!
//! Rows that must exist before the job store can be used.

pub mod initiator;

pub use initiator::seed_initiator;
