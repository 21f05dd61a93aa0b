//! Key layout of the three databases
//!
//! ```text
//! stream def key  := i64(stream_id) | u16 len | pipeline uuid | u16 len | pipeline version
//! map prefix      := stream def key | u16 len | map name
//! key_value       := map prefix | key bytes
//! range_value     := map prefix | i64(to) | i64(from)
//! processing_info := stream def key
//! ```
//!
//! `i64` values are big-endian with the sign bit flipped so byte order
//! matches numeric order. Every variable-length part is length-prefixed,
//! which makes each of the above an unambiguous prefix of the next.

use refdata_core::error::{RefDataError, Result};
use refdata_core::types::{MapDefinition, RefStreamDefinition, StreamId};
use std::ops::Range;

/// LMDB's compiled-in maximum key size
pub const MAX_KEY_SIZE: usize = 511;

const I64_LEN: usize = 8;

/// Encode an i64 so that lexicographic order equals numeric order
pub fn encode_i64(value: i64) -> [u8; I64_LEN] {
    ((value as u64) ^ (1 << 63)).to_be_bytes()
}

pub fn decode_i64(bytes: &[u8]) -> Result<i64> {
    let raw: [u8; I64_LEN] = bytes
        .get(..I64_LEN)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| RefDataError::Serialization("Truncated i64 in key".into()))?;
    Ok((u64::from_be_bytes(raw) ^ (1 << 63)) as i64)
}

/// Prefix shared by every key of every definition of `stream_id`
pub fn stream_id_prefix(stream_id: StreamId) -> [u8; I64_LEN] {
    encode_i64(stream_id)
}

fn push_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| RefDataError::KeyTooLong {
        len: s.len(),
        max: MAX_KEY_SIZE,
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn read_str<'b>(bytes: &'b [u8], what: &str) -> Result<(&'b str, &'b [u8])> {
    if bytes.len() < 2 {
        return Err(RefDataError::Serialization(format!("Truncated {} length", what)));
    }
    let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let rest = &bytes[2..];
    if rest.len() < len {
        return Err(RefDataError::Serialization(format!("Truncated {}", what)));
    }
    let s = std::str::from_utf8(&rest[..len])
        .map_err(|e| RefDataError::Serialization(format!("Invalid {}: {}", what, e)))?;
    Ok((s, &rest[len..]))
}

fn check_len(key: Vec<u8>) -> Result<Vec<u8>> {
    if key.len() > MAX_KEY_SIZE {
        return Err(RefDataError::KeyTooLong {
            len: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    Ok(key)
}

pub fn stream_def_key(def: &RefStreamDefinition) -> Result<Vec<u8>> {
    let mut key = Vec::with_capacity(
        I64_LEN + 4 + def.pipeline_uuid.len() + def.pipeline_version.len(),
    );
    key.extend_from_slice(&encode_i64(def.stream_id));
    push_str(&mut key, &def.pipeline_uuid)?;
    push_str(&mut key, &def.pipeline_version)?;
    check_len(key)
}

pub fn map_prefix(map_def: &MapDefinition) -> Result<Vec<u8>> {
    let mut key = stream_def_key(&map_def.ref_stream_definition)?;
    push_str(&mut key, &map_def.map_name)?;
    check_len(key)
}

pub fn key_value_key(map_def: &MapDefinition, key: &str) -> Result<Vec<u8>> {
    let mut encoded = map_prefix(map_def)?;
    encoded.extend_from_slice(key.as_bytes());
    check_len(encoded)
}

pub fn range_value_key(map_def: &MapDefinition, range: &Range<i64>) -> Result<Vec<u8>> {
    let mut encoded = map_prefix(map_def)?;
    encoded.extend_from_slice(&encode_i64(range.end));
    encoded.extend_from_slice(&encode_i64(range.start));
    check_len(encoded)
}

/// Seek key for the first range entry whose `to` is greater than `key`
pub fn range_seek_key(map_def: &MapDefinition, key: i64) -> Result<Option<Vec<u8>>> {
    let Some(after) = key.checked_add(1) else {
        return Ok(None);
    };
    let mut encoded = map_prefix(map_def)?;
    encoded.extend_from_slice(&encode_i64(after));
    Ok(Some(encoded))
}

/// Decode a stream def key, returning the remainder of the bytes
pub fn decode_stream_def(bytes: &[u8]) -> Result<(RefStreamDefinition, &[u8])> {
    let stream_id = decode_i64(bytes)?;
    let (pipeline_uuid, rest) = read_str(&bytes[I64_LEN..], "pipeline uuid")?;
    let (pipeline_version, rest) = read_str(rest, "pipeline version")?;
    Ok((
        RefStreamDefinition::new(pipeline_uuid, pipeline_version, stream_id),
        rest,
    ))
}

fn decode_map_def(bytes: &[u8]) -> Result<(MapDefinition, &[u8])> {
    let (def, rest) = decode_stream_def(bytes)?;
    let (map_name, rest) = read_str(rest, "map name")?;
    Ok((MapDefinition::new(def, map_name), rest))
}

pub fn decode_key_value_key(bytes: &[u8]) -> Result<(MapDefinition, String)> {
    let (map_def, rest) = decode_map_def(bytes)?;
    let key = std::str::from_utf8(rest)
        .map_err(|e| RefDataError::Serialization(format!("Invalid key: {}", e)))?;
    Ok((map_def, key.to_string()))
}

pub fn decode_range_value_key(bytes: &[u8]) -> Result<(MapDefinition, Range<i64>)> {
    let (map_def, rest) = decode_map_def(bytes)?;
    if rest.len() != I64_LEN * 2 {
        return Err(RefDataError::Serialization(format!(
            "Range key suffix must be {} bytes, found {}",
            I64_LEN * 2,
            rest.len()
        )));
    }
    let to = decode_i64(rest)?;
    let from = decode_i64(&rest[I64_LEN..])?;
    Ok((map_def, from..to))
}

/// Decode only the range of a range key whose map prefix is already known
pub fn decode_range_suffix(bytes: &[u8], prefix_len: usize) -> Result<Range<i64>> {
    let rest = bytes
        .get(prefix_len..)
        .filter(|rest| rest.len() == I64_LEN * 2)
        .ok_or_else(|| RefDataError::Serialization("Malformed range key".into()))?;
    let to = decode_i64(rest)?;
    let from = decode_i64(&rest[I64_LEN..])?;
    Ok(from..to)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_def(map: &str) -> MapDefinition {
        MapDefinition::new(RefStreamDefinition::new("pipe-uuid", "v1", 42), map)
    }

    #[test]
    fn test_i64_sort_order() {
        let values = [i64::MIN, -100, -1, 0, 1, 100, i64::MAX];
        for pair in values.windows(2) {
            assert!(encode_i64(pair[0]) < encode_i64(pair[1]));
            assert_eq!(decode_i64(&encode_i64(pair[0])).unwrap(), pair[0]);
        }
    }

    #[test]
    fn test_key_value_key_decodes() {
        let key = key_value_key(&map_def("USER_TO_LOCATION"), "user1").unwrap();
        let (decoded_map, decoded_key) = decode_key_value_key(&key).unwrap();
        assert_eq!(decoded_map, map_def("USER_TO_LOCATION"));
        assert_eq!(decoded_key, "user1");
    }

    #[test]
    fn test_map_prefix_does_not_match_longer_map_name() {
        let short = map_prefix(&map_def("A")).unwrap();
        let long_key = key_value_key(&map_def("AB"), "k").unwrap();
        assert!(!long_key.starts_with(&short));
    }

    #[test]
    fn test_range_keys_ordered_by_upper_bound() {
        let m = map_def("IP_RANGES");
        let low = range_value_key(&m, &(0..10)).unwrap();
        let high = range_value_key(&m, &(10..20)).unwrap();
        assert!(low < high);

        let seek = range_seek_key(&m, 9).unwrap().unwrap();
        assert!(seek <= low);
        let seek = range_seek_key(&m, 10).unwrap().unwrap();
        assert!(seek > low && seek <= high);
        assert!(range_seek_key(&m, i64::MAX).unwrap().is_none());

        let (_, range) = decode_range_value_key(&high).unwrap();
        assert_eq!(range, 10..20);
    }

    #[test]
    fn test_oversized_key_rejected() {
        let long = "k".repeat(MAX_KEY_SIZE);
        assert!(matches!(
            key_value_key(&map_def("M"), &long),
            Err(RefDataError::KeyTooLong { .. })
        ));
    }
}
