// crates
use thiserror::Error;
// internal
use crate::common::{BlobParams, EncodingParams};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("blob length must be greater than zero")]
    ZeroLength,
    #[error("blob length {0} is not a power of two")]
    NotPowerOfTwo(u32),
    #[error("blob parameters must have a non zero chunk count and coding rate: {0:?}")]
    InvalidBlobParams(BlobParams),
}

/// Length, in symbols, of each chunk of a blob `blob_length` symbols long.
pub fn chunk_length(blob_length: u32, params: &BlobParams) -> Result<u64, EncodingError> {
    if params.num_chunks == 0 || params.coding_rate == 0 {
        return Err(EncodingError::InvalidBlobParams(*params));
    }
    if blob_length == 0 {
        return Err(EncodingError::ZeroLength);
    }
    if !blob_length.is_power_of_two() {
        return Err(EncodingError::NotPowerOfTwo(blob_length));
    }
    let extended = u64::from(blob_length) * u64::from(params.coding_rate);
    if extended < u64::from(params.num_chunks) {
        return Ok(1);
    }
    Ok(extended / u64::from(params.num_chunks))
}

pub fn encoding_params(
    blob_length: u32,
    params: &BlobParams,
) -> Result<EncodingParams, EncodingError> {
    Ok(EncodingParams {
        num_chunks: u64::from(params.num_chunks),
        chunk_length: chunk_length(blob_length, params)?,
    })
}
