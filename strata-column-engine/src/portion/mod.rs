//! Portions: immutable column batches plus their metadata.

mod meta;
mod store;

pub use meta::PortionMeta;
pub use store::{FetchPolicy, Portion, PortionDraft, PortionStore};
