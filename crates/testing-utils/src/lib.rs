//! # Harvest Testing Utils
//!
//! Shared testing utilities for the harvest engine crates.
//!
//! - **Mock ports**: in-memory scraper source, persistence, extractor, loader and
//!   resource sampler with switchable failures
//! - **Test data builders**: scrapers and workflow specs with sensible defaults
//! - **Helpers**: polling utilities for asynchronous job state
//!
//! ```toml
//! [dev-dependencies]
//! harvest-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
