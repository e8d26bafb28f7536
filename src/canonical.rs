//! Canonical Tendermint protobuf fragments.
//!
//! Block-header hashing and vote signing depend on these encodings being
//! byte-for-byte identical to the upstream chain. The message structs below
//! are hand-declared with prost (no build-time codegen) and follow the
//! upstream field numbering exactly.

use chrono::{DateTime, Utc};
use prost::Message;

use crate::crypto::decode_hex;
use crate::errors::ChainResult;
use crate::types::BlockId;

/// Precommit vote type tag.
pub const SIGNED_MSG_TYPE_PRECOMMIT: i32 = 2;

#[derive(Clone, PartialEq, Message)]
pub struct ConsensusVersion {
    #[prost(uint64, tag = "1")]
    pub block: u64,
    #[prost(uint64, tag = "2")]
    pub app: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl Timestamp {
    pub fn from_datetime(value: &DateTime<Utc>) -> Self {
        Self {
            seconds: value.timestamp(),
            nanos: value.timestamp_subsec_nanos() as i32,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct PartSetHeaderProto {
    #[prost(uint32, tag = "1")]
    pub total: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
}

/// Wire `BlockID`. The part-set header is embedded non-nullable upstream, so
/// it is always emitted even when zero.
#[derive(Clone, PartialEq, Message)]
pub struct BlockIdProto {
    #[prost(bytes = "vec", tag = "1")]
    pub hash: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub part_set_header: Option<PartSetHeaderProto>,
}

impl BlockIdProto {
    pub fn from_block_id(value: &BlockId) -> ChainResult<Self> {
        Ok(Self {
            hash: decode_hex(&value.hash)?,
            part_set_header: Some(PartSetHeaderProto {
                total: value.part_set_header_total as u32,
                hash: decode_hex(&value.part_set_header_hash)?,
            }),
        })
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct CanonicalBlockId {
    #[prost(bytes = "vec", tag = "1")]
    pub hash: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub part_set_header: Option<PartSetHeaderProto>,
}

/// The byte layout every precommit signature covers.
#[derive(Clone, PartialEq, Message)]
pub struct CanonicalVote {
    #[prost(int32, tag = "1")]
    pub vote_type: i32,
    #[prost(sfixed64, tag = "2")]
    pub height: i64,
    #[prost(sfixed64, tag = "3")]
    pub round: i64,
    #[prost(message, optional, tag = "4")]
    pub block_id: Option<CanonicalBlockId>,
    #[prost(message, optional, tag = "5")]
    pub timestamp: Option<Timestamp>,
    #[prost(string, tag = "6")]
    pub chain_id: String,
}

// Primitive wrappers used by the header leaf encoding: each leaf is the
// marshalled single-field message, which collapses to empty bytes for
// default values.

#[derive(Clone, PartialEq, Message)]
pub struct StringValue {
    #[prost(string, tag = "1")]
    pub value: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Int64Value {
    #[prost(int64, tag = "1")]
    pub value: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct BytesValue {
    #[prost(bytes = "vec", tag = "1")]
    pub value: Vec<u8>,
}

pub fn encode_string(value: &str) -> Vec<u8> {
    StringValue {
        value: value.to_string(),
    }
    .encode_to_vec()
}

pub fn encode_i64(value: i64) -> Vec<u8> {
    Int64Value { value }.encode_to_vec()
}

pub fn encode_bytes(value: &[u8]) -> Vec<u8> {
    BytesValue {
        value: value.to_vec(),
    }
    .encode_to_vec()
}

/// Sign-bytes for a precommit: the canonical vote, length-delimited.
pub fn precommit_sign_bytes(
    height: i64,
    round: i64,
    block_id: Option<CanonicalBlockId>,
    timestamp: &DateTime<Utc>,
    chain_id: &str,
) -> Vec<u8> {
    CanonicalVote {
        vote_type: SIGNED_MSG_TYPE_PRECOMMIT,
        height,
        round,
        block_id,
        timestamp: Some(Timestamp::from_datetime(timestamp)),
        chain_id: chain_id.to_string(),
    }
    .encode_length_delimited_to_vec()
}

pub fn canonical_block_id(block_id: &BlockId) -> ChainResult<Option<CanonicalBlockId>> {
    let hash = decode_hex(&block_id.hash)?;
    if hash.is_empty() {
        return Ok(None);
    }
    Ok(Some(CanonicalBlockId {
        hash,
        part_set_header: Some(PartSetHeaderProto {
            total: block_id.part_set_header_total as u32,
            hash: decode_hex(&block_id.part_set_header_hash)?,
        }),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn default_wrappers_encode_to_empty_bytes() {
        assert!(encode_string("").is_empty());
        assert!(encode_i64(0).is_empty());
        assert!(encode_bytes(&[]).is_empty());
    }

    #[test]
    fn wrapped_primitives_match_golden_bytes() {
        assert_eq!(encode_i64(101), vec![0x08, 0x65]);
        assert_eq!(encode_bytes(&[0xAB, 0xAB]), vec![0x0A, 0x02, 0xAB, 0xAB]);

        let mut expected = vec![0x0A, 0x0E];
        expected.extend_from_slice(b"inference-test");
        assert_eq!(encode_string("inference-test"), expected);

        let version = ConsensusVersion { block: 11, app: 0 }.encode_to_vec();
        assert_eq!(version, vec![0x08, 0x0B]);
    }

    #[test]
    fn timestamp_encoding_matches_golden_bytes() {
        // 2024-05-01T12:00:00Z = 1714564800 seconds.
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let encoded = Timestamp::from_datetime(&ts).encode_to_vec();
        assert_eq!(encoded, vec![0x08, 0xC0, 0xDD, 0xC8, 0xB1, 0x06]);
    }

    #[test]
    fn empty_block_id_still_emits_part_set_header() {
        let proto = BlockIdProto::from_block_id(&BlockId::default()).expect("encode");
        // Field 2 with zero length: the non-nullable embedded header.
        assert_eq!(proto.encode_to_vec(), vec![0x12, 0x00]);
    }

    #[test]
    fn precommit_sign_bytes_are_length_delimited_and_stable() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let block_id = CanonicalBlockId {
            hash: vec![0xAB; 32],
            part_set_header: Some(PartSetHeaderProto {
                total: 1,
                hash: vec![0xCD; 32],
            }),
        };
        let bytes = precommit_sign_bytes(100, 0, Some(block_id), &ts, "test-chain");
        // Leading varint is the length of the remainder.
        let (len, consumed) = {
            let mut len = 0u64;
            let mut shift = 0;
            let mut consumed = 0;
            for byte in &bytes {
                len |= u64::from(byte & 0x7f) << shift;
                shift += 7;
                consumed += 1;
                if byte & 0x80 == 0 {
                    break;
                }
            }
            (len, consumed)
        };
        assert_eq!(len as usize, bytes.len() - consumed);
        // sfixed64 height: tag 0x11 then little-endian 100.
        let tag_pos = consumed + 2; // skip the vote-type field (2 bytes)
        assert_eq!(bytes[tag_pos], 0x11);
        assert_eq!(bytes[tag_pos + 1], 100);
        // Round zero is omitted entirely under proto3 rules.
        assert!(!bytes[consumed..].contains(&0x19));
    }

    #[test]
    fn nil_vote_has_no_block_id_field() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let with = precommit_sign_bytes(
            5,
            0,
            Some(CanonicalBlockId {
                hash: vec![1; 32],
                part_set_header: Some(PartSetHeaderProto::default()),
            }),
            &ts,
            "test-chain",
        );
        let without = precommit_sign_bytes(5, 0, None, &ts, "test-chain");
        assert!(with.len() > without.len());
    }
}
