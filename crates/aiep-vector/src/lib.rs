//! Embedding vectors for the academic assistant backend.
//!
//! - [`codec`]: the fixed-dimension embedding type and its SQLite blob encoding.
//! - [`similarity`]: translation of a minimum cosine similarity into a distance bound.
//! - [`distance`]: cosine distance between two vectors.

pub mod codec;
pub mod distance;
pub mod error;
pub mod similarity;

pub use codec::{Embedding, EMBEDDING_DIM};
pub use distance::cosine_distance;
pub use error::{Result, VectorError};
pub use similarity::{to_distance_bound, DistanceBound, DISTANCE_TOLERANCE};
