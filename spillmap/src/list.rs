//! Arena-backed doubly linked lists.
//!
//! Nodes live in a slot vector and link to each other by index, so a node is
//! addressed by a stable [`NodeId`] instead of a pointer. Freed slots are
//! recycled through a free stack; each slot carries a generation counter that
//! is bumped on release, so a stale id for a recycled slot is rejected rather
//! than silently touching the new occupant.

const NIL: u64 = u64::MAX;

/// Stable identity of one list node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    slot: u64,
    generation: u64,
}

impl NodeId {
    pub(crate) fn new(slot: u64, generation: u64) -> Self {
        Self { slot, generation }
    }

    pub fn slot(&self) -> u64 {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct Node<T> {
    prev: u64,
    next: u64,
    item: T,
}

struct Slot<T> {
    generation: u64,
    node: Option<Node<T>>,
}

/// Doubly linked list over an arena of slots.
///
/// Head is the least-recently-used end, tail the most-recently-used end.
/// All operations addressed by [`NodeId`] are O(1) and refuse stale ids.
pub struct LinkedList<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u64>,
    head: u64,
    tail: u64,
    len: usize,
}

impl<T> Default for LinkedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LinkedList<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends at the tail (MRU end).
    pub fn push_back(&mut self, item: T) -> NodeId {
        let slot = self.alloc(item);
        self.link_back(slot);
        self.len += 1;
        NodeId::new(slot, self.slots[slot as usize].generation)
    }

    /// Prepends at the head (LRU end).
    pub fn push_front(&mut self, item: T) -> NodeId {
        let slot = self.alloc(item);
        self.link_front(slot);
        self.len += 1;
        NodeId::new(slot, self.slots[slot as usize].generation)
    }

    /// Removes and returns the head item.
    pub fn pop_front(&mut self) -> Option<T> {
        let slot = self.head;
        if slot == NIL {
            return None;
        }
        self.unlink(slot);
        self.release(slot)
    }

    /// Removes and returns the tail item.
    pub fn pop_back(&mut self) -> Option<T> {
        let slot = self.tail;
        if slot == NIL {
            return None;
        }
        self.unlink(slot);
        self.release(slot)
    }

    /// Splices the node out and returns its item; `None` for stale ids.
    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        if !self.contains(id) {
            return None;
        }
        self.unlink(id.slot);
        self.release(id.slot)
    }

    /// Moves the node to the tail, keeping its id valid. `false` for stale ids.
    pub fn move_to_back(&mut self, id: NodeId) -> bool {
        if !self.contains(id) {
            return false;
        }
        if self.tail != id.slot {
            self.unlink(id.slot);
            self.link_back(id.slot);
        }
        true
    }

    /// Moves the node to the head, keeping its id valid. `false` for stale ids.
    pub fn move_to_front(&mut self, id: NodeId) -> bool {
        if !self.contains(id) {
            return false;
        }
        if self.head != id.slot {
            self.unlink(id.slot);
            self.link_front(id.slot);
        }
        true
    }

    pub fn front(&self) -> Option<&T> {
        self.item_at(self.head)
    }

    pub fn back(&self) -> Option<&T> {
        self.item_at(self.tail)
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        let slot = self.slots.get(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref().map(|n| &n.item)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut().map(|n| &mut n.item)
    }

    /// Whether the id refers to a live node of this list.
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Drops every node. Ids handed out before the call must be discarded.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
        self.len = 0;
    }

    /// Walks head to tail.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            slot: self.head,
        }
    }

    fn alloc(&mut self, item: T) -> u64 {
        let node = Node {
            prev: NIL,
            next: NIL,
            item,
        };
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize].node = Some(node);
                slot
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                (self.slots.len() - 1) as u64
            }
        }
    }

    fn release(&mut self, slot: u64) -> Option<T> {
        let s = self.slots.get_mut(slot as usize)?;
        let node = s.node.take()?;
        s.generation += 1;
        self.free.push(slot);
        self.len -= 1;
        Some(node.item)
    }

    fn item_at(&self, slot: u64) -> Option<&T> {
        if slot == NIL {
            return None;
        }
        self.slots
            .get(slot as usize)
            .and_then(|s| s.node.as_ref())
            .map(|n| &n.item)
    }

    fn links_of(&self, slot: u64) -> Option<(u64, u64)> {
        self.slots
            .get(slot as usize)
            .and_then(|s| s.node.as_ref())
            .map(|n| (n.prev, n.next))
    }

    fn set_links(&mut self, slot: u64, prev: u64, next: u64) {
        if let Some(n) = self
            .slots
            .get_mut(slot as usize)
            .and_then(|s| s.node.as_mut())
        {
            n.prev = prev;
            n.next = next;
        }
    }

    fn set_next(&mut self, slot: u64, next: u64) {
        if let Some(n) = self
            .slots
            .get_mut(slot as usize)
            .and_then(|s| s.node.as_mut())
        {
            n.next = next;
        }
    }

    fn set_prev(&mut self, slot: u64, prev: u64) {
        if let Some(n) = self
            .slots
            .get_mut(slot as usize)
            .and_then(|s| s.node.as_mut())
        {
            n.prev = prev;
        }
    }

    /// Detaches a node from the chain without releasing its slot.
    fn unlink(&mut self, slot: u64) {
        let Some((prev, next)) = self.links_of(slot) else {
            return;
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.set_next(prev, next);
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.set_prev(next, prev);
        }
        self.set_links(slot, NIL, NIL);
    }

    fn link_back(&mut self, slot: u64) {
        let tail = self.tail;
        self.set_links(slot, tail, NIL);
        if tail == NIL {
            self.head = slot;
        } else {
            self.set_next(tail, slot);
        }
        self.tail = slot;
    }

    fn link_front(&mut self, slot: u64) {
        let head = self.head;
        self.set_links(slot, NIL, head);
        if head == NIL {
            self.tail = slot;
        } else {
            self.set_prev(head, slot);
        }
        self.head = slot;
    }
}

pub struct Iter<'a, T> {
    list: &'a LinkedList<T>,
    slot: u64,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (NodeId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.slot == NIL {
            return None;
        }
        let slot = self.slot;
        let s = self.list.slots.get(slot as usize)?;
        let node = s.node.as_ref()?;
        self.slot = node.next;
        Some((NodeId::new(slot, s.generation), &node.item))
    }
}

/// Approximate in-memory byte footprint of a list element.
pub trait Footprint {
    fn footprint(&self) -> usize;
}

/// Linked list that maintains a running byte estimate of its elements.
///
/// The estimate is adjusted on insert and remove only; elements must not
/// change their footprint while listed.
pub struct TrackedList<T> {
    inner: LinkedList<T>,
    usage: usize,
}

impl<T: Footprint> Default for TrackedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Footprint> TrackedList<T> {
    pub fn new() -> Self {
        Self {
            inner: LinkedList::new(),
            usage: 0,
        }
    }

    /// Current byte estimate of everything held by the list.
    pub fn usage(&self) -> usize {
        self.usage
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn push_back(&mut self, item: T) -> NodeId {
        self.usage += item.footprint();
        self.inner.push_back(item)
    }

    pub fn pop_front(&mut self) -> Option<T> {
        let item = self.inner.pop_front()?;
        self.usage -= item.footprint();
        Some(item)
    }

    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        let item = self.inner.remove(id)?;
        self.usage -= item.footprint();
        Some(item)
    }

    pub fn move_to_back(&mut self, id: NodeId) -> bool {
        self.inner.move_to_back(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.inner.get(id)
    }

    pub fn front(&self) -> Option<&T> {
        self.inner.front()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.contains(id)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
        self.usage = 0;
    }

    pub fn iter(&self) -> Iter<'_, T> {
        self.inner.iter()
    }
}
