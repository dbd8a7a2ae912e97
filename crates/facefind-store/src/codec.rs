//! Vector blob format: fixed-width little-endian f64, `dim * 8` bytes, no header.

const F64_BYTES: usize = std::mem::size_of::<f64>();

pub fn encode_vector(values: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * F64_BYTES);
    for &value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a blob that must hold exactly `dim` values.
pub fn decode_vector(blob: &[u8], dim: usize) -> Result<Vec<f64>, String> {
    let expected_len = dim
        .checked_mul(F64_BYTES)
        .ok_or_else(|| format!("dimension {dim} overflows blob length"))?;
    if blob.len() != expected_len {
        return Err(format!(
            "expected {expected_len} bytes for {dim} values, got {}",
            blob.len()
        ));
    }

    let mut out = Vec::with_capacity(dim);
    for chunk in blob.chunks_exact(F64_BYTES) {
        let mut raw = [0u8; F64_BYTES];
        raw.copy_from_slice(chunk);
        let value = f64::from_le_bytes(raw);
        if !value.is_finite() {
            return Err("vector contains non-finite values".to_string());
        }
        out.push(value);
    }
    Ok(out)
}
