//! Document Conversion Preflight Pipeline
//!
//! This library implements the preflight job pipeline for batch document
//! conversion: pre-submission verification of office documents, a persisted
//! job state machine, concurrent submission to a remote conversion service,
//! and a polling mailbox monitor that correlates inbound result
//! notifications back to submitted jobs.

pub mod config;
pub mod models;
pub mod services;
