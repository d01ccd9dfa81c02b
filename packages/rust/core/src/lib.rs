//! Pipeline orchestration and domain logic for portcall.
//!
//! This crate ties the fetch stages, key extraction, record normalization
//! and CSV output into one end-to-end run ([`pipeline::run_pipeline`]).

pub mod normalize;
pub mod pipeline;
pub mod resolver;
pub mod sink;
pub mod wire;
