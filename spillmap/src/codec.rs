use std::hash::BuildHasher;
use std::io::{Read, Write};

use rustc_hash::FxBuildHasher;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Size of the record length prefix in bucket log files.
pub const LEN_PREFIX: usize = 4;

/// Serializes a key or value to its canonical byte form.
pub fn encode<T: Serialize>(item: &T) -> Result<Vec<u8>> {
    bincode::serialize(item).map_err(|e| Error::Encoding(e.to_string()))
}

/// Deserializes a key or value from its canonical byte form.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Decoding(e.to_string()))
}

/// Serialized size of an item without materializing its bytes.
pub fn encoded_size<T: Serialize>(item: &T) -> Result<usize> {
    let n = bincode::serialized_size(item).map_err(|e| Error::Encoding(e.to_string()))?;
    usize::try_from(n).map_err(|e| Error::Encoding(e.to_string()))
}

/// Writes one `length:u32be || payload` record.
pub fn write_record<W: Write>(w: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Encoding(format!("record payload of {} bytes exceeds u32", payload.len())))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(payload)?;
    Ok(())
}

/// Reads one record starting at the reader's current position.
pub fn read_record<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let mut prefix = [0u8; LEN_PREFIX];
    r.read_exact(&mut prefix)?;
    let len = u32::from_be_bytes(prefix) as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(payload)
}

/// Routing hash over a key's canonical encoding. Fx is seedless, so the
/// bucket assignment of a key is reproducible across process runs.
pub fn stable_hash(bytes: &[u8]) -> u64 {
    FxBuildHasher.hash_one(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_record_layout_is_big_endian() {
        let mut buf = Vec::new();
        write_record(&mut buf, b"abc").unwrap();
        assert_eq!(buf, vec![0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_record_round_trip() {
        let mut buf = Vec::new();
        write_record(&mut buf, b"").unwrap();
        write_record(&mut buf, &[7u8; 300]).unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_record(&mut cursor).unwrap(), b"");
        assert_eq!(read_record(&mut cursor).unwrap(), vec![7u8; 300]);
    }

    #[test]
    fn test_read_record_rejects_truncation() {
        let mut buf = Vec::new();
        write_record(&mut buf, b"abcdef").unwrap();
        buf.truncate(buf.len() - 2);

        let mut cursor = Cursor::new(buf);
        assert!(read_record(&mut cursor).is_err());
    }

    #[test]
    fn test_encode_round_trip() {
        let item = (42u64, "forty-two".to_string());
        let bytes = encode(&item).unwrap();
        assert_eq!(bytes.len(), encoded_size(&item).unwrap());
        let back: (u64, String) = decode(&bytes).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_stable_hash_is_deterministic() {
        let a = stable_hash(b"spill");
        let b = stable_hash(b"spill");
        let c = stable_hash(b"spell");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
