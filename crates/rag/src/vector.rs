use std::fs;
use std::path::Path;

use bytemuck::{cast_slice, try_cast_slice};

use crate::error::{RagError, Result};

const MAGIC: &[u8; 4] = b"FFVI";
const VERSION: u32 = 1;
const FINGERPRINT_LEN: usize = 64;
const HEADER_LEN: usize = 4 + 4 + 4 + 8 + FINGERPRINT_LEN;

/// Flat exact inner-product index over row-major `f32` vectors.
///
/// Row `i` belongs to the chunk at position `i` of the knowledge store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    dims: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn from_vectors(vectors: &[Vec<f32>]) -> Result<Self> {
        let dims = vectors.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(dims * vectors.len());
        for (position, vector) in vectors.iter().enumerate() {
            if vector.len() != dims {
                return Err(RagError::Embedding(format!(
                    "vector {position} has {} dimensions, expected {dims}",
                    vector.len()
                )));
            }
            data.extend_from_slice(vector);
        }
        Ok(Self { dims, data })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        if position >= self.len() {
            return None;
        }
        Some(&self.data[position * self.dims..(position + 1) * self.dims])
    }

    /// Returns `(position, score)` pairs, best first. Equal scores keep
    /// insertion order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(usize, f32)>> {
        if self.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            return Err(RagError::Embedding(format!(
                "query has {} dimensions, index has {}",
                query.len(),
                self.dims
            )));
        }
        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(position, row)| (position, dot(row, query)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Writes the index with the fingerprint of the chunk list it was built from.
    pub fn save(&self, path: &Path, fingerprint: &str) -> Result<()> {
        if fingerprint.len() != FINGERPRINT_LEN || !fingerprint.is_ascii() {
            return Err(RagError::Persistence(format!(
                "fingerprint must be {FINGERPRINT_LEN} hex characters"
            )));
        }
        let mut buf = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.dims as u32).to_le_bytes());
        buf.extend_from_slice(&(self.len() as u64).to_le_bytes());
        buf.extend_from_slice(fingerprint.as_bytes());
        if cfg!(target_endian = "little") {
            buf.extend_from_slice(cast_slice::<f32, u8>(&self.data));
        } else {
            for value in &self.data {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
        fs::write(path, buf)
            .map_err(|err| RagError::Persistence(format!("{}: {err}", path.display())))
    }

    /// Reads an index written by [`VectorIndex::save`], returning it with
    /// the stored fingerprint.
    pub fn load(path: &Path) -> Result<(Self, String)> {
        let raw = fs::read(path)
            .map_err(|err| RagError::Persistence(format!("{}: {err}", path.display())))?;
        Self::decode(&raw)
    }

    fn decode(raw: &[u8]) -> Result<(Self, String)> {
        let corrupt = |reason: &str| RagError::Persistence(format!("corrupt index: {reason}"));
        if raw.len() < HEADER_LEN || &raw[0..4] != MAGIC {
            return Err(corrupt("bad header"));
        }
        let version = u32::from_le_bytes(raw[4..8].try_into().map_err(|_| corrupt("version"))?);
        if version != VERSION {
            return Err(corrupt("unknown version"));
        }
        let dims = u32::from_le_bytes(raw[8..12].try_into().map_err(|_| corrupt("dims"))?) as usize;
        let count = u64::from_le_bytes(raw[12..20].try_into().map_err(|_| corrupt("count"))?) as usize;
        let fingerprint = std::str::from_utf8(&raw[20..HEADER_LEN])
            .map_err(|_| corrupt("fingerprint"))?
            .to_string();
        let body = &raw[HEADER_LEN..];
        let expected = dims
            .checked_mul(count)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| corrupt("size overflow"))?;
        if body.len() != expected || (dims == 0 && count != 0) {
            return Err(corrupt("body length mismatch"));
        }
        let data: Vec<f32> = match try_cast_slice::<u8, f32>(body) {
            Ok(values) if cfg!(target_endian = "little") => values.to_vec(),
            _ => body
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        };
        Ok((Self { dims, data }, fingerprint))
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PRINT: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn ties_keep_insertion_order() {
        let index =
            VectorIndex::from_vectors(&[vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0]]).unwrap();
        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.0).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert_eq!(hits[0].1, 1.0);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        assert!(VectorIndex::from_vectors(&[vec![1.0], vec![1.0, 0.0]]).is_err());
        let index = VectorIndex::from_vectors(&[vec![1.0, 0.0]]).unwrap();
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn persists_with_fingerprint() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rag_index.bin");
        let index = VectorIndex::from_vectors(&[vec![0.6, 0.8], vec![-1.0, 0.0]]).unwrap();
        index.save(&path, PRINT).unwrap();
        let (loaded, fingerprint) = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(fingerprint, PRINT);
        assert_eq!(loaded.vector(1), Some(&[-1.0f32, 0.0][..]));
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rag_index.bin");
        let index = VectorIndex::from_vectors(&[vec![0.6, 0.8]]).unwrap();
        index.save(&path, PRINT).unwrap();
        let mut raw = fs::read(&path).unwrap();
        raw.pop();
        fs::write(&path, raw).unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RagError::Persistence(_))
        ));
    }
}
