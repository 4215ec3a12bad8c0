const NONE: usize = usize::MAX;

enum Entry<T> {
    Vacant { next_free: usize },
    Occupied { value: T, prev: usize, next: usize },
}

/// Growable slab whose occupied entries form a FIFO list.
///
/// Keys are stable for as long as the entry stays occupied, which lets the
/// wheel index remember where an event lives and remove it in O(1). Vacated
/// keys are recycled through a free list, so a key must not be used after
/// its entry was removed.
pub struct Slot<T> {
    entries: Vec<Entry<T>>,
    free_head: usize,
    head: usize,
    tail: usize,
    len: usize,
}

impl<T> Slot<T> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_head: NONE,
            head: NONE,
            tail: NONE,
            len: 0,
        }
    }

    /// Append a value at the back. Returns its key.
    pub fn push_back(&mut self, value: T) -> usize {
        let occupied = Entry::Occupied {
            value,
            prev: self.tail,
            next: NONE,
        };

        let key = if self.free_head != NONE {
            let key = self.free_head;
            let Entry::Vacant { next_free } = &self.entries[key] else {
                unreachable!("free list points at an occupied entry");
            };
            self.free_head = *next_free;
            self.entries[key] = occupied;
            key
        } else {
            self.entries.push(occupied);
            self.entries.len() - 1
        };

        if self.tail != NONE {
            self.set_next(self.tail, key);
        } else {
            self.head = key;
        }
        self.tail = key;
        self.len += 1;
        key
    }

    /// Remove by key. Returns `None` if the key is vacant or out of range.
    pub fn remove(&mut self, key: usize) -> Option<T> {
        if !self.is_occupied(key) {
            return None;
        }

        let old = std::mem::replace(
            &mut self.entries[key],
            Entry::Vacant {
                next_free: self.free_head,
            },
        );
        self.free_head = key;
        self.len -= 1;

        let Entry::Occupied { value, prev, next } = old else {
            unreachable!("checked occupied above");
        };

        if prev != NONE {
            self.set_next(prev, next);
        } else {
            self.head = next;
        }
        if next != NONE {
            self.set_prev(next, prev);
        } else {
            self.tail = prev;
        }

        Some(value)
    }

    /// Remove the oldest value.
    #[inline]
    pub fn pop_front(&mut self) -> Option<T> {
        if self.head == NONE {
            return None;
        }
        self.remove(self.head)
    }

    #[inline]
    fn is_occupied(&self, key: usize) -> bool {
        matches!(self.entries.get(key), Some(Entry::Occupied { .. }))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    fn set_next(&mut self, key: usize, to: usize) {
        if let Entry::Occupied { next, .. } = &mut self.entries[key] {
            *next = to;
        }
    }

    fn set_prev(&mut self, key: usize, to: usize) {
        if let Entry::Occupied { prev, .. } = &mut self.entries[key] {
            *prev = to;
        }
    }
}
