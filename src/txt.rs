//! Chunked TXT encoding of service metadata.
//!
//! mDNS text records are sequences of segments capped at 255 bytes each.
//! A service's version string and metadata map are packed into as few
//! segments as fit: entries are rendered `key=value` and joined by the
//! ASCII unit separator, and the first segment leads with a `v=` version
//! tag. Keys must not contain `=`; values may.

use std::collections::HashMap;

use tracing::trace;

use crate::error::{Error, Result};

/// Maximum size of a single TXT chunk, per the mDNS record format.
pub const MAX_CHUNK: usize = 255;

/// Separator between entries within a chunk. The ASCII unit separator
/// cannot appear in textual keys or values, so no escaping is needed.
const SEP: char = '\u{1f}';

/// Key carrying the version tag in chunk 0. Reserved: a metadata key named
/// `v` would be indistinguishable from the version on the wire.
const VERSION_TAG: &str = "v";

/// The version/metadata pair carried by a service's TXT record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxtPayload {
    /// Service version string.
    pub version: String,
    /// Arbitrary key-value metadata.
    pub metadata: HashMap<String, String>,
}

/// Encode a payload into TXT chunks, each at most [`MAX_CHUNK`] bytes.
///
/// Entries are packed greedily and a new chunk is started whenever the next
/// entry would not fit; an entry is never split across chunks. Fails if a
/// single entry cannot fit a chunk on its own.
pub fn encode(payload: &TxtPayload) -> Result<Vec<String>> {
    let mut current = format!("{VERSION_TAG}={}", payload.version);
    if current.len() > MAX_CHUNK {
        return Err(Error::encoding(format!(
            "version of {} bytes exceeds the {MAX_CHUNK}-byte chunk limit",
            payload.version.len()
        )));
    }

    // sorted for stable output; the map carries no order of its own
    let mut entries: Vec<(&String, &String)> = payload.metadata.iter().collect();
    entries.sort();

    let mut chunks = Vec::new();
    for (key, value) in entries {
        let entry = format!("{key}={value}");
        if entry.len() > MAX_CHUNK {
            return Err(Error::encoding(format!(
                "metadata entry `{key}` of {} bytes exceeds the {MAX_CHUNK}-byte chunk limit",
                entry.len()
            )));
        }
        if current.len() + 1 + entry.len() > MAX_CHUNK {
            chunks.push(current);
            current = entry;
        } else {
            current.push(SEP);
            current.push_str(&entry);
        }
    }
    chunks.push(current);
    Ok(chunks)
}

/// Decode TXT chunks back into a payload.
///
/// Chunks are processed independently, so the result does not depend on
/// which physical chunk carried a given entry. Pieces that are not
/// `key=value` shaped are skipped rather than failing the decode: unrelated
/// mDNS traffic on the same name may inject foreign segments.
pub fn decode(chunks: &[String]) -> TxtPayload {
    let mut payload = TxtPayload::default();
    let mut version_seen = false;
    for chunk in chunks {
        for piece in chunk.split(SEP) {
            let Some((key, value)) = piece.split_once('=') else {
                if !piece.is_empty() {
                    trace!(piece, "skipping foreign txt segment");
                }
                continue;
            };
            if key.is_empty() {
                continue;
            }
            if key == VERSION_TAG {
                if !version_seen {
                    payload.version = value.to_string();
                    version_seen = true;
                }
                continue;
            }
            payload.metadata.insert(key.to_string(), value.to_string());
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(version: &str, entries: &[(&str, &str)]) -> TxtPayload {
        TxtPayload {
            version: version.to_string(),
            metadata: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn round_trips_simple_payload() {
        let original = payload("1.0.0", &[("foo", "bar")]);
        let encoded = encode(&original).unwrap();
        assert_eq!(decode(&encoded), original);
    }

    #[test]
    fn round_trips_empty_metadata() {
        let original = payload("2.1.0", &[]);
        let encoded = encode(&original).unwrap();
        assert_eq!(encoded.len(), 1);
        assert_eq!(decode(&encoded), original);
    }

    #[test]
    fn every_chunk_stays_under_limit() {
        let entries: Vec<(String, String)> = (0..40)
            .map(|i| (format!("key-{i}"), "x".repeat(60)))
            .collect();
        let original = TxtPayload {
            version: "1.0.0".to_string(),
            metadata: entries.into_iter().collect(),
        };

        let encoded = encode(&original).unwrap();
        assert!(encoded.len() > 1, "payload should need several chunks");
        for chunk in &encoded {
            assert!(chunk.len() <= MAX_CHUNK, "chunk of {} bytes", chunk.len());
        }
        assert_eq!(decode(&encoded), original);
    }

    #[test]
    fn oversized_entry_is_an_encoding_error() {
        let value = "y".repeat(300);
        let original = payload("1.0.0", &[("big", value.as_str())]);
        assert!(matches!(encode(&original), Err(Error::Encoding(_))));
    }

    #[test]
    fn oversized_version_is_an_encoding_error() {
        let original = payload(&"v".repeat(300), &[]);
        assert!(matches!(encode(&original), Err(Error::Encoding(_))));
    }

    #[test]
    fn entry_exactly_at_limit_is_accepted() {
        // "k=" plus 253 bytes of value is a 255-byte entry
        let value = "z".repeat(253);
        let original = payload("1", &[("k", value.as_str())]);
        let encoded = encode(&original).unwrap();
        for chunk in &encoded {
            assert!(chunk.len() <= MAX_CHUNK);
        }
        assert_eq!(decode(&encoded), original);
    }

    #[test]
    fn foreign_segments_are_skipped() {
        let original = payload("1.0.0", &[("foo", "bar")]);
        let mut encoded = encode(&original).unwrap();
        encoded.push("printer-state".to_string());
        encoded.push("note=front desk".to_string());

        let decoded = decode(&encoded);
        assert_eq!(decoded.version, "1.0.0");
        assert_eq!(decoded.metadata.get("foo").unwrap(), "bar");
        // foreign but well-formed key=value segments merge in harmlessly
        assert_eq!(decoded.metadata.get("note").unwrap(), "front desk");
        assert!(!decoded.metadata.contains_key("printer-state"));
    }

    #[test]
    fn decode_is_chunk_order_independent() {
        let entries: Vec<(String, String)> = (0..40)
            .map(|i| (format!("key-{i}"), "x".repeat(60)))
            .collect();
        let original = TxtPayload {
            version: "3.0.0".to_string(),
            metadata: entries.into_iter().collect(),
        };

        let mut encoded = encode(&original).unwrap();
        encoded.rotate_left(2);
        assert_eq!(decode(&encoded), original);
    }

    #[test]
    fn equals_sign_in_value_survives() {
        let original = payload("1.0.0", &[("query", "a=b&c=d")]);
        let encoded = encode(&original).unwrap();
        assert_eq!(decode(&encoded), original);
    }

    #[test]
    fn first_version_tag_wins() {
        let chunks = vec![format!("v=1.0.0{}v=9.9.9", '\u{1f}')];
        assert_eq!(decode(&chunks).version, "1.0.0");
    }
}
