//! Storage layer for Strata portions.
//!
//! - [`pager`]: the minimal [`Pager`](pager::Pager) trait plus in-memory,
//!   `simd-r-drive`-backed, and instrumented implementations.
//! - [`serialization`]: Arrow IPC encoding of portion batches.
//! - [`constants`] / [`types`]: well-known keys and reserved column names.

pub mod constants;
pub mod pager;
pub mod serialization;
pub mod types;

pub use pager::{BatchGet, BatchPut, GetResult, Pager};
pub use types::PhysicalKey;
