//! HTTP fetch stage for portcall.
//!
//! This crate provides:
//! - [`engine`]: the bounded-concurrency, deduplicating [`Crawler`]
//! - [`FetchedResponse`]: a settled response with typed JSON access

pub mod engine;

pub use engine::{
    CrawlOutcome, Crawler, FetchTask, FetchedResponse, TaskOutcome, build_client,
};
