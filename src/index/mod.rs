//! Approximate vector search over the evidence corpus.

pub mod error;
pub mod handle;
pub mod ivf;
pub mod params;

#[cfg(test)]
mod tests;

pub use error::IndexError;
pub use handle::VectorIndexHandle;
pub use ivf::{IndexEntry, IvfIndex, SearchHit};
pub use params::IndexParams;
