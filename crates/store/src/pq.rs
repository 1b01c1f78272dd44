use crate::Rid;

/// Priority queue of RIDs, lowest priority first.
///
/// Kept as a flat array sorted ascending: insert is a linear scan plus
/// shift, extract pops the front. Queues in DAG walks stay small (a few
/// hundred nodes at most), so this beats a heap in practice.
#[derive(Debug, Default)]
pub struct Pq {
    list: Vec<(f64, Rid)>,
}

impl Pq {
    pub fn new() -> Pq {
        Pq::default()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn insert(&mut self, id: Rid, priority: f64) {
        let at = self
            .list
            .iter()
            .position(|&(p, _)| p > priority)
            .unwrap_or(self.list.len());
        self.list.insert(at, (priority, id));
    }

    /// Remove and return the entry with the smallest priority.
    pub fn extract(&mut self) -> Option<Rid> {
        if self.list.is_empty() {
            None
        } else {
            Some(self.list.remove(0).1)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extracts_in_priority_order() {
        let mut pq = Pq::new();
        pq.insert(10, 3.5);
        pq.insert(20, 1.25);
        pq.insert(30, 2.0);
        pq.insert(40, 1.25); // Equal priorities keep insertion order.
        assert_eq!(pq.extract(), Some(20));
        assert_eq!(pq.extract(), Some(40));
        assert_eq!(pq.extract(), Some(30));
        assert_eq!(pq.extract(), Some(10));
        assert_eq!(pq.extract(), None);
    }
}
