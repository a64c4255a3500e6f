//! Fixed-dimension embedding vectors and their on-disk encoding.
//!
//! An embedding is either absent or exactly [`EMBEDDING_DIM`] components
//! long. Absence is modelled as `Option<Embedding>`; an [`Embedding`] value
//! is always full length. On disk a vector is a blob of little-endian `f32`s.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VectorError};

/// Number of components in every stored embedding.
pub const EMBEDDING_DIM: usize = 1536;

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Check that a raw vector is either empty (unset) or exactly
/// [`EMBEDDING_DIM`] long. Values are not inspected.
pub fn validate(vector: &[f32]) -> Result<()> {
    if vector.is_empty() || vector.len() == EMBEDDING_DIM {
        Ok(())
    } else {
        Err(dimension_error(vector.len()))
    }
}

/// Like [`validate`], but an empty vector is rejected too.
pub fn require_full(vector: &[f32]) -> Result<()> {
    if vector.len() == EMBEDDING_DIM {
        Ok(())
    } else {
        Err(dimension_error(vector.len()))
    }
}

fn dimension_error(actual: usize) -> VectorError {
    VectorError::Dimension {
        expected: EMBEDDING_DIM,
        actual,
    }
}

/// A validated, full-length embedding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Wrap a vector that must be exactly [`EMBEDDING_DIM`] long.
    pub fn new(values: Vec<f32>) -> Result<Self> {
        require_full(&values)?;
        Ok(Self(values))
    }

    /// Wrap a vector that may be empty; empty means "not vectorised".
    pub fn from_optional(values: Vec<f32>) -> Result<Option<Self>> {
        validate(&values)?;
        if values.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Self(values)))
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }

    pub fn to_blob(&self) -> Vec<u8> {
        encode_blob(&self.0)
    }

    /// Decode a stored blob. A zero-length blob is an absent embedding.
    ///
    /// A blob that decodes to anything other than [`EMBEDDING_DIM`]
    /// components is reported as a dimension error.
    pub fn from_blob(blob: &[u8]) -> Result<Option<Self>> {
        if blob.is_empty() {
            return Ok(None);
        }
        let values = decode_blob(blob)?;
        require_full(&values)?;
        Ok(Some(Self(values)))
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = VectorError;

    fn try_from(values: Vec<f32>) -> Result<Self> {
        Self::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.0
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Encode floats as little-endian bytes.
pub fn encode_blob(values: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(values.len() * F32_BYTES);
    for v in values {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Decode little-endian bytes into floats.
pub fn decode_blob(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % F32_BYTES != 0 {
        return Err(VectorError::CorruptBlob { bytes: blob.len() });
    }
    Ok(blob
        .chunks_exact(F32_BYTES)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
