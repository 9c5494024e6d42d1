//! Lazy handles and their bookkeeping words.
//!
//! Every key and every value of the map lives behind a [`Handle`]: either the
//! object itself is resident in memory, or the handle holds the address of
//! its serialized record in the owning bucket's log. Residency changes by
//! replacing the whole [`Residency`] state, never by partial mutation.

use std::mem;

use modular_bitfield::prelude::B63;
use modular_bitfield::{Specifier, bitfield};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::bucket::{Bucket, DiskAddress};
use crate::codec;
use crate::error::{Error, Result};
use crate::list::{Footprint, NodeId};

/// Stable identity of a handle, issued once at creation and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub(crate) u64);

/// Which global LRU list a handle currently occupies.
#[derive(Specifier, Debug, PartialEq, Eq, Clone, Copy)]
pub enum ListKind {
    InMemory,
    OnDisk,
}

/// Packed location of a handle's list node: the list it is in plus the arena
/// slot and generation of its node there.
#[bitfield(bits = 128)]
#[derive(Clone, Copy)]
pub struct NodeRef {
    #[bits = 1]
    kind: ListKind,
    slot: B63,
    generation: u64,
}

impl NodeRef {
    pub fn pack(kind: ListKind, node: NodeId) -> Self {
        NodeRef::new()
            .with_kind(kind)
            .with_slot(node.slot())
            .with_generation(node.generation())
    }

    pub fn list(&self) -> ListKind {
        self.kind()
    }

    pub fn node(&self) -> NodeId {
        NodeId::new(self.slot(), self.generation())
    }
}

/// What a handle stores: one side of a key/value pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<K, V> {
    Key(K),
    Value(V),
}

/// Payload side remembered while the bytes live on disk, so a record decodes
/// back to the right type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Key,
    Value,
}

/// Residency state of a handle.
pub enum Residency<K, V> {
    Resident(Payload<K, V>),
    Spilled { kind: PayloadKind, addr: DiskAddress },
}

pub struct Handle<K, V> {
    id: HandleId,
    bucket: usize,
    charge: usize,
    residency: Residency<K, V>,
}

impl<K, V> Handle<K, V> {
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Index of the bucket whose log file backs this handle when spilled.
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.residency, Residency::Resident(_))
    }

    pub fn disk_addr(&self) -> Option<DiskAddress> {
        match self.residency {
            Residency::Spilled { addr, .. } => Some(addr),
            Residency::Resident(_) => None,
        }
    }

    /// Rewrites the record address after compaction has moved the record.
    pub(crate) fn set_disk_addr(&mut self, new_addr: DiskAddress) -> Result<()> {
        match &mut self.residency {
            Residency::Spilled { addr, .. } => {
                *addr = new_addr;
                Ok(())
            }
            Residency::Resident(_) => Err(Error::corrupt(
                "compaction tried to readdress a resident handle",
            )),
        }
    }
}

impl<K, V> Handle<K, V>
where
    K: Serialize + DeserializeOwned + Clone,
    V: Serialize + DeserializeOwned + Clone,
{
    pub(crate) fn resident_key(id: HandleId, bucket: usize, key: K) -> Result<Self> {
        let charge = Self::charge_for(&key)?;
        Ok(Self {
            id,
            bucket,
            charge,
            residency: Residency::Resident(Payload::Key(key)),
        })
    }

    pub(crate) fn resident_value(id: HandleId, bucket: usize, value: V) -> Result<Self> {
        let charge = Self::charge_for(&value)?;
        Ok(Self {
            id,
            bucket,
            charge,
            residency: Residency::Resident(Payload::Value(value)),
        })
    }

    /// Estimated footprint of a resident payload: its serialized size plus
    /// the fixed overhead of the handle itself.
    fn charge_for<T: Serialize>(payload: &T) -> Result<usize> {
        Ok(codec::encoded_size(payload)? + mem::size_of::<Self>())
    }

    /// Appends the resident payload to the bucket's log and swaps this handle
    /// to its on-disk state.
    pub(crate) fn spill(&mut self, bucket: &mut Bucket) -> Result<()> {
        let (kind, bytes) = match &self.residency {
            Residency::Resident(Payload::Key(k)) => (PayloadKind::Key, codec::encode(k)?),
            Residency::Resident(Payload::Value(v)) => (PayloadKind::Value, codec::encode(v)?),
            Residency::Spilled { .. } => {
                return Err(Error::corrupt("spill of a handle already on disk"));
            }
        };
        let addr = bucket.persist(&bytes)?;
        self.residency = Residency::Spilled { kind, addr };
        Ok(())
    }

    /// Reads the record back and swaps this handle to its resident state.
    pub(crate) fn load(&mut self, bucket: &Bucket) -> Result<()> {
        let (kind, addr) = match self.residency {
            Residency::Spilled { kind, addr } => (kind, addr),
            Residency::Resident(_) => {
                return Err(Error::corrupt("load of a handle already resident"));
            }
        };
        let bytes = bucket.read_at(addr)?;
        let payload = match kind {
            PayloadKind::Key => Payload::Key(codec::decode(&bytes)?),
            PayloadKind::Value => Payload::Value(codec::decode(&bytes)?),
        };
        self.charge = bytes.len() + mem::size_of::<Self>();
        self.residency = Residency::Resident(payload);
        Ok(())
    }

    /// Resolves the key without changing residency; spilled keys are read
    /// through from disk.
    pub(crate) fn resolve_key(&self, bucket: &Bucket) -> Result<K> {
        match &self.residency {
            Residency::Resident(Payload::Key(k)) => Ok(k.clone()),
            Residency::Spilled {
                kind: PayloadKind::Key,
                addr,
            } => codec::decode(&bucket.read_at(*addr)?),
            _ => Err(Error::corrupt("key handle does not hold a key")),
        }
    }

    /// Resolves the value without changing residency.
    pub(crate) fn resolve_value(&self, bucket: &Bucket) -> Result<V> {
        match &self.residency {
            Residency::Resident(Payload::Value(v)) => Ok(v.clone()),
            Residency::Spilled {
                kind: PayloadKind::Value,
                addr,
            } => codec::decode(&bucket.read_at(*addr)?),
            _ => Err(Error::corrupt("value handle does not hold a value")),
        }
    }
}

impl<K, V> Footprint for Handle<K, V> {
    fn footprint(&self) -> usize {
        match self.residency {
            Residency::Resident(_) => self.charge,
            Residency::Spilled { .. } => 0,
        }
    }
}
