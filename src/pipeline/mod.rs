//! Multi-hop conversion for pairs no single converter handles.
//!
//! ## Data Flow
//!
//! ```text
//! cache snapshot ──▶ FormatGraph ──▶ resolver (BFS) ──▶ [PipelineStep] ──▶ executor
//!                                                                        (staging, fallback per hop)
//! ```
//!
//! 1. [`resolver`]: build the adjacency once per request and search it for
//!    the shortest chain, preferring structure-preserving intermediates
//! 2. [`executor`]: run each hop through the weighted fallback executor,
//!    staging intermediates in a request-owned temporary directory
//!
//! A direct conversion is executed as a one-step chain so both paths share
//! the same cleanup and reporting.

pub mod executor;
pub mod resolver;

pub use executor::{CompletedStep, PipelineExecutor};
pub use resolver::{FormatGraph, PipelineResolver, PipelineStep};
