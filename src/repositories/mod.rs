//! # Repository Layer
//!
//! Data access for the job store tables. [`JobStore`] is the single entry
//! point; its operations are split by concern inside `job_store`.

pub mod job_store;

pub use job_store::{
    Assignment, Completion, ErrorKind, FindOptions, GraphNode, GraphOptions, HistoryOptions,
    HistoryOrder, JobGraph, JobStore, JobSummary, JobTicket, Offer, Projection, SizeOptions,
    StoreError, TicketOptions,
};
