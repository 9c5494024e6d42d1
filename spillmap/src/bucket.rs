//! One hash partition: an append-only log file plus the in-memory chain of
//! live entries routed to it.
//!
//! Records are only ever appended; deleting an entry just detaches it from
//! the chain and leaves its bytes behind as dead space until the map runs a
//! compaction pass, which rewrites the file through [`Bucket::rewrite`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec;
use crate::error::{Error, Result};
use crate::handle::HandleId;
use crate::list::LinkedList;

/// Offset of a record's length prefix within its bucket's log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiskAddress {
    pub offset: u64,
}

/// One chain entry: the ids of a pair's key handle and value handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub key: HandleId,
    pub value: HandleId,
}

pub struct Bucket {
    path: PathBuf,
    offset: u64,
    pub(crate) chain: LinkedList<Pair>,
}

impl Bucket {
    /// Creates the log file empty, truncating anything already at `path`.
    pub(crate) fn create(path: PathBuf) -> Result<Self> {
        File::create(&path)?;
        Ok(Self {
            path,
            offset: 0,
            chain: LinkedList::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current write offset, which equals the log file's length.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Appends one record and returns the address it starts at.
    pub(crate) fn persist(&mut self, payload: &[u8]) -> Result<DiskAddress> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        codec::write_record(&mut file, payload)?;
        let addr = DiskAddress {
            offset: self.offset,
        };
        self.offset += (codec::LEN_PREFIX + payload.len()) as u64;
        Ok(addr)
    }

    /// Reads back the payload of the record starting at `addr`.
    pub(crate) fn read_at(&self, addr: DiskAddress) -> Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(addr.offset))?;
        codec::read_record(&mut file)
    }

    /// Truncates the log file and drops the chain.
    pub(crate) fn clear(&mut self) -> Result<()> {
        File::create(&self.path)?;
        self.offset = 0;
        self.chain.clear();
        Ok(())
    }

    /// Stream-copies the records at `live` (ascending addresses) into a fresh
    /// file, atomically replaces the log with it, and returns the records'
    /// new addresses in the same order. With no live records the log ends up
    /// zero-length.
    pub(crate) fn rewrite(&mut self, live: &[DiskAddress]) -> Result<Vec<DiskAddress>> {
        let tmp_path = tmp_sibling(&self.path);
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut writer = BufWriter::new(File::create(&tmp_path)?);

        let mut new_addrs = Vec::with_capacity(live.len());
        let mut new_offset = 0u64;
        for addr in live {
            reader.seek(SeekFrom::Start(addr.offset))?;
            let mut prefix = [0u8; codec::LEN_PREFIX];
            reader.read_exact(&mut prefix)?;
            let len = u32::from_be_bytes(prefix) as u64;

            writer.write_all(&prefix)?;
            let copied = io::copy(&mut (&mut reader).take(len), &mut writer)?;
            if copied != len {
                return Err(Error::Decoding(format!(
                    "record at offset {} truncated: expected {len} bytes, found {copied}",
                    addr.offset
                )));
            }

            new_addrs.push(DiskAddress { offset: new_offset });
            new_offset += codec::LEN_PREFIX as u64 + len;
        }
        writer.flush()?;
        drop(writer);
        drop(reader);

        fs::rename(&tmp_path, &self.path)?;
        self.offset = new_offset;
        Ok(new_addrs)
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_bucket(dir: &Path) -> Bucket {
        Bucket::create(dir.join("bucket_0.log")).unwrap()
    }

    #[test]
    fn test_persist_advances_offset() {
        let dir = tempdir().unwrap();
        let mut bucket = new_bucket(dir.path());

        let a = bucket.persist(b"first").unwrap();
        let b = bucket.persist(b"second!").unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 4 + 5);
        assert_eq!(bucket.offset(), 4 + 5 + 4 + 7);

        let on_disk = fs::metadata(bucket.path()).unwrap().len();
        assert_eq!(on_disk, bucket.offset());
    }

    #[test]
    fn test_read_at_returns_payloads() {
        let dir = tempdir().unwrap();
        let mut bucket = new_bucket(dir.path());

        let a = bucket.persist(b"alpha").unwrap();
        let b = bucket.persist(b"bravo-bravo").unwrap();

        assert_eq!(bucket.read_at(b).unwrap(), b"bravo-bravo");
        assert_eq!(bucket.read_at(a).unwrap(), b"alpha");
    }

    #[test]
    fn test_clear_truncates() {
        let dir = tempdir().unwrap();
        let mut bucket = new_bucket(dir.path());

        bucket.persist(b"payload").unwrap();
        bucket.clear().unwrap();

        assert_eq!(bucket.offset(), 0);
        assert_eq!(fs::metadata(bucket.path()).unwrap().len(), 0);
        assert!(bucket.chain.is_empty());
    }

    #[test]
    fn test_rewrite_keeps_only_live_records() {
        let dir = tempdir().unwrap();
        let mut bucket = new_bucket(dir.path());

        let _dead = bucket.persist(b"dead").unwrap();
        let live_a = bucket.persist(b"keep-me").unwrap();
        let _also_dead = bucket.persist(b"gone").unwrap();
        let live_b = bucket.persist(b"me-too").unwrap();
        let before = fs::metadata(bucket.path()).unwrap().len();

        let new_addrs = bucket.rewrite(&[live_a, live_b]).unwrap();
        assert_eq!(new_addrs.len(), 2);
        assert_eq!(new_addrs[0].offset, 0);
        assert_eq!(new_addrs[1].offset, 4 + 7);

        assert_eq!(bucket.read_at(new_addrs[0]).unwrap(), b"keep-me");
        assert_eq!(bucket.read_at(new_addrs[1]).unwrap(), b"me-too");

        let after = fs::metadata(bucket.path()).unwrap().len();
        assert!(after < before);
        assert_eq!(after, bucket.offset());
    }

    #[test]
    fn test_rewrite_with_nothing_live_empties_the_file() {
        let dir = tempdir().unwrap();
        let mut bucket = new_bucket(dir.path());

        bucket.persist(b"soon dead").unwrap();
        bucket.persist(b"also dead").unwrap();

        let new_addrs = bucket.rewrite(&[]).unwrap();
        assert!(new_addrs.is_empty());
        assert_eq!(bucket.offset(), 0);
        assert_eq!(fs::metadata(bucket.path()).unwrap().len(), 0);
    }
}
