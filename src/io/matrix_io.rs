//! Binary vector and sparse-matrix codecs.
//!
//! Dense vectors are a bare sequence of big-endian `f64`. Sparse matrices
//! start with a `rows:i32, cols:i32, nnz:i32` header followed by `nnz`
//! triplets `row:i32, col:i32, value:f64`, all big-endian.

use crate::data::csc_from_triplets;
use crate::error::{AnnealError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use sprs::CsMat;
use std::path::Path;

const TRIPLET_LEN: usize = 4 + 4 + 8;
const HEADER_LEN: usize = 4 * 3;

pub fn encode_vector(values: &[f64]) -> Bytes {
    let mut buf = BytesMut::with_capacity(values.len() * 8);
    for &v in values {
        buf.put_f64(v);
    }
    buf.freeze()
}

/// Decodes a dense vector. The length must be a multiple of eight bytes and
/// no value may be NaN.
pub fn decode_vector(mut data: &[u8]) -> Result<Vec<f64>> {
    if data.len() % 8 != 0 {
        return Err(AnnealError::config(format!(
            "vector data length {} is not a multiple of 8",
            data.len()
        )));
    }
    let mut out = Vec::with_capacity(data.len() / 8);
    while data.has_remaining() {
        let v = data.get_f64();
        if v.is_nan() {
            return Err(AnnealError::config(format!("NaN at vector index {}", out.len())));
        }
        out.push(v);
    }
    Ok(out)
}

/// Encodes stored entries column by column.
pub fn encode_matrix(matrix: &CsMat<f64>) -> Result<Bytes> {
    let rows = to_i32(matrix.rows(), "row count")?;
    let cols = to_i32(matrix.cols(), "column count")?;
    let nnz = to_i32(matrix.nnz(), "non-zero count")?;

    let converted;
    let matrix = if matrix.is_csc() {
        matrix
    } else {
        converted = matrix.to_csc();
        &converted
    };

    let mut buf = BytesMut::with_capacity(HEADER_LEN + matrix.nnz() * TRIPLET_LEN);
    buf.put_i32(rows);
    buf.put_i32(cols);
    buf.put_i32(nnz);
    for (col, column) in matrix.outer_iterator().enumerate() {
        for (row, &value) in column.iter() {
            // bounded by the header checks above
            buf.put_i32(row as i32);
            buf.put_i32(col as i32);
            buf.put_f64(value);
        }
    }
    Ok(buf.freeze())
}

pub fn decode_matrix(mut data: &[u8]) -> Result<CsMat<f64>> {
    if data.len() < HEADER_LEN {
        return Err(AnnealError::config("matrix data shorter than its header"));
    }
    let rows = from_i32(data.get_i32(), "row count")?;
    let cols = from_i32(data.get_i32(), "column count")?;
    let nnz = from_i32(data.get_i32(), "non-zero count")?;
    if data.remaining() != nnz * TRIPLET_LEN {
        return Err(AnnealError::config(format!(
            "matrix declares {nnz} entries but carries {} bytes of triplets",
            data.remaining()
        )));
    }

    let mut triplets = Vec::with_capacity(nnz);
    for _ in 0..nnz {
        let row = from_i32(data.get_i32(), "row index")?;
        let col = from_i32(data.get_i32(), "column index")?;
        let value = data.get_f64();
        if value.is_nan() {
            return Err(AnnealError::config(format!("NaN matrix value at ({row}, {col})")));
        }
        triplets.push((row, col, value));
    }
    csc_from_triplets(rows, cols, &triplets)
}

pub fn write_vector(path: &Path, values: &[f64]) -> Result<()> {
    std::fs::write(path, encode_vector(values))?;
    Ok(())
}

pub fn read_vector(path: &Path) -> Result<Vec<f64>> {
    decode_vector(&std::fs::read(path)?)
}

pub fn write_matrix(path: &Path, matrix: &CsMat<f64>) -> Result<()> {
    std::fs::write(path, encode_matrix(matrix)?)?;
    Ok(())
}

pub fn read_matrix(path: &Path) -> Result<CsMat<f64>> {
    decode_matrix(&std::fs::read(path)?)
}

fn to_i32(n: usize, what: &str) -> Result<i32> {
    i32::try_from(n).map_err(|_| AnnealError::config(format!("{what} {n} exceeds i32")))
}

fn from_i32(n: i32, what: &str) -> Result<usize> {
    usize::try_from(n).map_err(|_| AnnealError::config(format!("negative {what} {n}")))
}
