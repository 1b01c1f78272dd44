use crate::Rid;

/// Unordered set of positive artifact IDs: open-addressed linear-probe
/// hashing over a flat slot array. Zero marks an empty slot and -1 a
/// tombstone, so only positive IDs are representable. Iteration order is
/// unspecified but stable across lookups.
#[derive(Debug, Default, Clone)]
pub struct IdBag {
    list: Vec<Rid>,
    /// Live entries.
    entry_count: usize,
    /// Live entries plus tombstones.
    used: usize,
}

fn slot_hash(id: Rid) -> usize {
    (id as usize).wrapping_mul(101)
}

impl IdBag {
    pub fn new() -> IdBag {
        IdBag::default()
    }

    pub fn count(&self) -> usize {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Drop all entries but keep the allocation.
    pub fn reset(&mut self) {
        self.list.fill(0);
        self.entry_count = 0;
        self.used = 0;
    }

    pub fn clear(&mut self) {
        *self = IdBag::default();
    }

    /// Rebuild the table with `new_size` slots, squeezing out tombstones.
    fn resize(&mut self, new_size: usize) {
        debug_assert!(new_size > self.entry_count);
        let old = std::mem::replace(&mut self.list, vec![0; new_size]);
        self.used = 0;
        for e in old {
            if e > 0 {
                let mut h = slot_hash(e) % new_size;
                while self.list[h] != 0 {
                    h += 1;
                    if h == new_size {
                        h = 0;
                    }
                }
                self.list[h] = e;
                self.used += 1;
            }
        }
        debug_assert_eq!(self.used, self.entry_count);
    }

    pub fn insert(&mut self, e: Rid) -> bool {
        debug_assert!(e > 0);
        if self.used + 1 >= self.list.len() / 2 {
            let n = if self.list.is_empty() { 30 } else { self.list.len() * 2 };
            self.resize(n);
        }
        let cap = self.list.len();
        let mut h = slot_hash(e) % cap;
        while self.list[h] > 0 && self.list[h] != e {
            h += 1;
            if h >= cap {
                h = 0;
            }
        }
        if self.list[h] <= 0 {
            if self.list[h] == 0 {
                self.used += 1;
            }
            self.list[h] = e;
            self.entry_count += 1;
            true
        } else {
            false
        }
    }

    pub fn contains(&self, e: Rid) -> bool {
        debug_assert!(e > 0);
        if self.list.is_empty() || self.used == 0 {
            return false;
        }
        let cap = self.list.len();
        let mut h = slot_hash(e) % cap;
        while self.list[h] != 0 && self.list[h] != e {
            h += 1;
            if h >= cap {
                h = 0;
            }
        }
        self.list[h] == e
    }

    /// Remove `e`, reporting whether it was present. A slot followed by an
    /// occupied slot becomes a tombstone to keep probe chains intact.
    pub fn remove(&mut self, e: Rid) -> bool {
        debug_assert!(e > 0);
        if self.list.is_empty() || self.used == 0 {
            return false;
        }
        let cap = self.list.len();
        let mut h = slot_hash(e) % cap;
        while self.list[h] != 0 && self.list[h] != e {
            h += 1;
            if h >= cap {
                h = 0;
            }
        }
        if self.list[h] != e {
            return false;
        }
        let nx = if h + 1 >= cap { 0 } else { h + 1 };
        if self.list[nx] == 0 {
            self.list[h] = 0;
            self.used -= 1;
        } else {
            self.list[h] = -1;
        }
        self.entry_count -= 1;
        if self.entry_count == 0 {
            self.list.fill(0);
            self.used = 0;
        } else if cap > 40 && self.entry_count < cap / 8 {
            self.resize(cap / 2);
        }
        true
    }

    /// First entry in iteration order, or None when empty.
    pub fn first(&self) -> Option<Rid> {
        self.list.iter().find(|&&e| e > 0).copied()
    }

    /// Entry following `e` in iteration order. `e` must be present.
    pub fn next(&self, e: Rid) -> Option<Rid> {
        debug_assert!(e > 0);
        if self.list.is_empty() {
            return None;
        }
        let cap = self.list.len();
        let mut h = slot_hash(e) % cap;
        while self.list[h] != 0 && self.list[h] != e {
            h += 1;
            if h >= cap {
                h = 0;
            }
        }
        debug_assert_eq!(self.list[h], e);
        self.list[h + 1..].iter().find(|&&v| v > 0).copied()
    }

    /// Iterate all entries in stable (slot) order.
    pub fn iter(&self) -> impl Iterator<Item = Rid> + '_ {
        self.list.iter().copied().filter(|&e| e > 0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_contains_remove() {
        let mut bag = IdBag::new();
        assert!(bag.insert(7));
        assert!(!bag.insert(7));
        assert!(bag.insert(101));
        assert!(bag.contains(7));
        assert!(!bag.contains(8));
        assert_eq!(bag.count(), 2);
        assert!(bag.remove(7));
        assert!(!bag.remove(7));
        assert!(!bag.contains(7));
        assert_eq!(bag.count(), 1);
    }

    #[test]
    fn grows_and_shrinks() {
        let mut bag = IdBag::new();
        for e in 1..=500 {
            bag.insert(e);
        }
        assert_eq!(bag.count(), 500);
        for e in 1..=500 {
            assert!(bag.contains(e), "missing {e}");
        }
        for e in 1..=495 {
            assert!(bag.remove(e));
        }
        assert_eq!(bag.count(), 5);
        for e in 496..=500 {
            assert!(bag.contains(e));
        }
    }

    #[test]
    fn first_next_walk_visits_everything() {
        let mut bag = IdBag::new();
        for e in [11, 3, 47, 900, 23] {
            bag.insert(e);
        }
        let mut seen = Vec::new();
        let mut cur = bag.first();
        while let Some(e) = cur {
            seen.push(e);
            cur = bag.next(e);
        }
        seen.sort();
        assert_eq!(seen, vec![3, 11, 23, 47, 900]);
    }

    #[test]
    fn probe_collisions_survive_tombstones() {
        let mut bag = IdBag::new();
        // 101*k mod 30 collides for ids 30 apart once the table is small.
        for e in [1, 31, 61, 91] {
            bag.insert(e);
        }
        assert!(bag.remove(31));
        assert!(bag.contains(61));
        assert!(bag.contains(91));
        assert!(bag.insert(31));
        assert!(bag.contains(31));
    }
}
