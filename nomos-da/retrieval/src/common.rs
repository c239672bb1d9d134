// std
use std::fmt::{self, Debug, Display, Formatter};
// crates
use bytes::Bytes;
use serde::{Deserialize, Serialize};
// internal

/// Number of bytes in a single encoded symbol (one field element).
pub const BYTES_PER_SYMBOL: u64 = 32;

pub type QuorumId = u8;
pub type BlobVersion = u16;

macro_rules! fixed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(
            #[serde(
                serialize_with = "nomos_utils::serde::serialize_bytes_array",
                deserialize_with = "nomos_utils::serde::deserialize_bytes_array"
            )]
            [u8; 32],
        );

        impl $name {
            #[must_use]
            pub const fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            #[must_use]
            pub fn to_hex(&self) -> String {
                const_hex::encode(self.0)
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }
    };
}

fixed_id!(
    /// Content identifier of a dispersed blob.
    BlobKey
);

fixed_id!(
    /// Identifier of a storage node within the operator set.
    OperatorId
);

/// Cryptographic commitments published for a blob at dispersal time.
///
/// Opaque to the retrieval machinery, which only forwards them to the
/// verifier. `length` is expressed in symbols of [`BYTES_PER_SYMBOL`] bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlobCommitments {
    pub commitment: Bytes,
    pub length_commitment: Bytes,
    pub length_proof: Bytes,
    pub length: u32,
}

impl BlobCommitments {
    #[must_use]
    pub const fn byte_length(&self) -> u64 {
        self.length as u64 * BYTES_PER_SYMBOL
    }
}

/// Per blob-version parameters, as registered on chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobParams {
    pub num_chunks: u32,
    pub coding_rate: u32,
}

impl BlobParams {
    /// Number of chunks needed to reconstruct a blob of this version.
    #[must_use]
    pub const fn minimum_chunk_count(&self) -> u32 {
        if self.coding_rate == 0 {
            0
        } else {
            self.num_chunks / self.coding_rate
        }
    }
}

/// Encoding parameters of one blob.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingParams {
    pub num_chunks: u64,
    pub chunk_length: u64,
}

/// Global chunk positions held by one operator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub indices: Vec<u32>,
}

impl Assignment {
    #[must_use]
    pub const fn new(indices: Vec<u32>) -> Self {
        Self { indices }
    }

    #[must_use]
    pub fn num_chunks(&self) -> u32 {
        u32::try_from(self.indices.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }
}

/// Raw, still unverified, reply of an operator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunksReply {
    pub chunks: Vec<Bytes>,
}

impl ChunksReply {
    #[must_use]
    pub const fn new(chunks: Vec<Bytes>) -> Self {
        Self { chunks }
    }
}

#[cfg(test)]
mod test {
    use super::{Assignment, BlobCommitments, BlobKey, BlobParams, OperatorId};

    #[test]
    fn blob_key_displays_as_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        bytes[31] = 0x01;
        let key = BlobKey::new(bytes);
        let hex = key.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("ab00"));
        assert!(hex.ends_with("01"));
        assert_eq!(format!("{key:?}"), format!("BlobKey({hex})"));
    }

    #[test]
    fn operator_id_serializes_as_hex_string() {
        let id = OperatorId::new([0x11; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "11".repeat(32)));
        let back: OperatorId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<OperatorId>("\"zz\"").is_err());
    }

    #[test]
    fn minimum_chunk_count_follows_coding_rate() {
        let params = BlobParams {
            num_chunks: 8192,
            coding_rate: 8,
        };
        assert_eq!(params.minimum_chunk_count(), 1024);
        let degenerate = BlobParams {
            num_chunks: 8192,
            coding_rate: 0,
        };
        assert_eq!(degenerate.minimum_chunk_count(), 0);
    }

    #[test]
    fn assignment_weight_is_index_count() {
        assert_eq!(Assignment::new(vec![1, 5, 5, 9]).num_chunks(), 4);
        assert_eq!(Assignment::default().num_chunks(), 0);
    }

    #[test]
    fn commitment_byte_length() {
        let commitments = BlobCommitments {
            length: 16,
            ..Default::default()
        };
        assert_eq!(commitments.byte_length(), 512);
    }
}
