use std::io;

use byteorder::{ByteOrder, LittleEndian};

/// Compression level used for chromatogram blobs.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Encodes a float64 array as little endian bytes and compresses it with ZSTD
///
/// # Arguments
///
/// * `values` - values to encode
/// * `compression_level` - ZSTD compression level
///
/// # Returns
///
/// * `Vec<u8>` - compressed blob
///
pub fn encode_f64_blob(values: &[f64], compression_level: i32) -> io::Result<Vec<u8>> {
    let mut bytes = vec![0u8; values.len() * 8];
    LittleEndian::write_f64_into(values, &mut bytes);
    zstd::encode_all(bytes.as_slice(), compression_level)
}

/// Inverse of [`encode_f64_blob`]
///
/// # Returns
///
/// * `Vec<f64>` - decoded values, or an `InvalidData` error if the payload is not a whole
///   number of float64 values
///
pub fn decode_f64_blob(blob: &[u8]) -> io::Result<Vec<f64>> {
    let bytes = zstd::decode_all(blob)?;
    if bytes.len() % 8 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("blob of {} bytes is not a float64 array", bytes.len()),
        ));
    }
    let mut values = vec![0.0; bytes.len() / 8];
    LittleEndian::read_f64_into(&bytes, &mut values);
    Ok(values)
}
