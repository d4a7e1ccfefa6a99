//! Slot membership lists for the page cache.
//!
//! Every cache slot belongs to exactly one of three lists: free, clean or
//! dirty. The lists are doubly linked through an arena of per-slot links
//! addressed by slot index, so moving a slot between lists is O(1) and never
//! allocates.
//!
//! # Invariants
//!
//! - Every slot index in `0..capacity` is linked into exactly one list
//! - The sum of the three list lengths equals `capacity`
//! - Within a list, `front` is the most recently inserted slot

/// The list a cache slot currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotList {
    /// Unused slot, ready to be claimed.
    Free = 0,
    /// Holds an unmodified copy of an on-disk page, in LRU order.
    Clean = 1,
    /// Holds a page modified since the last write-back.
    Dirty = 2,
}

const LIST_COUNT: usize = 3;

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: Option<usize>,
    next: Option<usize>,
    list: SlotList,
}

#[derive(Debug, Clone, Copy, Default)]
struct Ends {
    front: Option<usize>,
    back: Option<usize>,
    len: usize,
}

/// The free, clean and dirty lists of a fixed number of slots.
#[derive(Debug)]
pub struct CacheLists {
    links: Vec<Link>,
    ends: [Ends; LIST_COUNT],
}

impl CacheLists {
    /// Create lists for `capacity` slots, all on the free list.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let links = (0..capacity)
            .map(|slot| Link {
                prev: slot.checked_sub(1),
                next: (slot + 1 < capacity).then_some(slot + 1),
                list: SlotList::Free,
            })
            .collect();

        let mut ends = [Ends::default(); LIST_COUNT];
        if capacity > 0 {
            ends[SlotList::Free as usize] = Ends {
                front: Some(0),
                back: Some(capacity - 1),
                len: capacity,
            };
        }

        Self { links, ends }
    }

    /// Number of slots tracked.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.links.len()
    }

    /// The list `slot` belongs to.
    #[must_use]
    pub fn list_of(&self, slot: usize) -> SlotList {
        self.links[slot].list
    }

    /// Number of slots on `list`.
    #[must_use]
    pub const fn len(&self, list: SlotList) -> usize {
        self.ends[list as usize].len
    }

    /// Whether `list` has no slots.
    #[cfg(test)]
    #[must_use]
    pub const fn is_empty(&self, list: SlotList) -> bool {
        self.len(list) == 0
    }

    /// Most recently inserted slot of `list`.
    #[must_use]
    pub const fn front(&self, list: SlotList) -> Option<usize> {
        self.ends[list as usize].front
    }

    /// Least recently inserted slot of `list`.
    #[must_use]
    pub const fn back(&self, list: SlotList) -> Option<usize> {
        self.ends[list as usize].back
    }

    /// Unlink `slot` from its current list and push it on the front of
    /// `list`. Moving a slot to the front of its own list promotes it.
    pub fn move_to_front(&mut self, slot: usize, list: SlotList) {
        self.unlink(slot);

        let ends = &mut self.ends[list as usize];
        let old_front = ends.front;
        ends.front = Some(slot);
        if ends.back.is_none() {
            ends.back = Some(slot);
        }
        ends.len += 1;

        if let Some(old) = old_front {
            self.links[old].prev = Some(slot);
        }
        self.links[slot] = Link {
            prev: None,
            next: old_front,
            list,
        };
    }

    /// Iterate over the slots of `list`, front to back.
    #[cfg(test)]
    pub fn iter(&self, list: SlotList) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.front(list), move |&slot| self.links[slot].next)
    }

    fn unlink(&mut self, slot: usize) {
        let Link { prev, next, list } = self.links[slot];
        let ends = &mut self.ends[list as usize];

        match prev {
            Some(p) => self.links[p].next = next,
            None => ends.front = next,
        }
        match next {
            Some(n) => self.links[n].prev = prev,
            None => ends.back = prev,
        }
        ends.len -= 1;

        self.links[slot].prev = None;
        self.links[slot].next = None;
    }
}
