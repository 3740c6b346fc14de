//! Binary min-heap for scheduler queues.
//!
//! Entries are ordered by `sort_index` (expiration time for ready tasks, start
//! time for delayed ones) and then by task id, so tasks with equal sort keys
//! run in insertion order. Only the root can be removed; cancelled tasks stay
//! in the heap until they surface.

use super::Timestamp;

/// One queued task.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct HeapEntry {
    pub(crate) sort_index: Timestamp,
    pub(crate) id: u64,
    /// Slot of the task in the scheduler's task slab.
    pub(crate) slot: usize,
}

impl HeapEntry {
    #[inline]
    fn precedes(&self, other: &HeapEntry) -> bool {
        (self.sort_index, self.id) < (other.sort_index, other.id)
    }
}

#[derive(Debug, Default)]
pub(crate) struct MinHeap {
    entries: Vec<HeapEntry>,
}

impl MinHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub(crate) fn peek(&self) -> Option<&HeapEntry> {
        self.entries.first()
    }

    pub(crate) fn push(&mut self, entry: HeapEntry) {
        self.entries.push(entry);
        self.sift_up(self.entries.len() - 1);
    }

    pub(crate) fn pop(&mut self) -> Option<HeapEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let first = self.entries.swap_remove(0);
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        Some(first)
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.entries[index].precedes(&self.entries[parent]) {
                self.entries.swap(index, parent);
                index = parent;
            } else {
                return;
            }
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;
            if left < len && self.entries[left].precedes(&self.entries[smallest]) {
                smallest = left;
            }
            if right < len && self.entries[right].precedes(&self.entries[smallest]) {
                smallest = right;
            }
            if smallest == index {
                return;
            }
            self.entries.swap(index, smallest);
            index = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sort_index: Timestamp, id: u64) -> HeapEntry {
        HeapEntry {
            sort_index,
            id,
            slot: id as usize,
        }
    }

    fn drain(heap: &mut MinHeap) -> Vec<u64> {
        std::iter::from_fn(|| heap.pop()).map(|e| e.id).collect()
    }

    #[test]
    fn pops_in_sort_index_order() {
        let mut heap = MinHeap::new();
        heap.push(entry(50, 1));
        heap.push(entry(10, 2));
        heap.push(entry(30, 3));
        assert_eq!(heap.peek().map(|e| e.sort_index), Some(10));
        let order: Vec<_> = std::iter::from_fn(|| heap.pop()).map(|e| e.sort_index).collect();
        assert_eq!(order, vec![10, 30, 50]);
        assert!(heap.is_empty());
    }

    #[test]
    fn ties_break_by_id() {
        let mut heap = MinHeap::new();
        for id in [4, 2, 3, 1] {
            heap.push(entry(5, id));
        }
        assert_eq!(drain(&mut heap), vec![1, 2, 3, 4]);
    }

    #[test]
    fn interleaved_push_pop_stays_ordered() {
        let mut heap = MinHeap::new();
        let keys = [17, 3, 99, 42, 8, 8, 61, 0, 25, 12];
        for (id, key) in keys.iter().enumerate() {
            heap.push(entry(*key, id as u64));
        }
        assert_eq!(heap.pop().map(|e| e.sort_index), Some(0));
        heap.push(entry(1, 100));
        heap.push(entry(70, 101));
        assert_eq!(heap.len(), 11);

        let mut last = Timestamp::MIN;
        while let Some(e) = heap.pop() {
            assert!(e.sort_index >= last);
            last = e.sort_index;
        }
    }

    #[test]
    fn pop_on_empty_heap() {
        let mut heap = MinHeap::new();
        assert_eq!(heap.pop(), None);
        assert_eq!(heap.peek(), None);
    }
}
