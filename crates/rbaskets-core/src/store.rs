//! Capacity-bounded sliding window of captured requests.
//!
//! Every record is stamped with the lifetime counter at insertion, so the
//! retained records always carry the contiguous sequence numbers
//! `lifetime - len + 1 ..= lifetime`. Eviction pops the lowest sequence.

use std::collections::VecDeque;
use std::ops::RangeInclusive;

use crate::finder::SearchScope;
use crate::models::{RequestRecord, RequestsPage, RequestsQueryPage};
use crate::pagination::PageRequest;

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    record: RequestRecord,
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    capacity: usize,
    lifetime: u64,
    entries: VecDeque<Entry>,
}

impl RecordStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lifetime: 0,
            entries: VecDeque::with_capacity(capacity.min(256)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lifetime_count(&self) -> u64 {
        self.lifetime
    }

    /// Sequence numbers of the retained window, oldest to newest.
    pub fn sequence_range(&self) -> Option<RangeInclusive<u64>> {
        let first = self.entries.front()?.seq;
        let last = self.entries.back()?.seq;
        Some(first..=last)
    }

    /// Append a record, evicting the oldest one when the window is full.
    ///
    /// Returns the number of evicted records.
    pub fn push(&mut self, record: RequestRecord) -> usize {
        self.lifetime += 1;
        if self.capacity == 0 {
            return 0;
        }

        let mut evicted = 0;
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
            evicted += 1;
        }
        self.entries.push_back(Entry {
            seq: self.lifetime,
            record,
        });
        evicted
    }

    /// Change capacity, trimming the oldest records that no longer fit.
    ///
    /// Returns the number of evicted records.
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        self.capacity = capacity;
        let excess = self.entries.len().saturating_sub(capacity);
        self.entries.drain(..excess);
        excess
    }

    /// Drop every record and reset the lifetime counter.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.lifetime = 0;
    }

    /// Retained records, most recently added first.
    pub fn newest_first(&self) -> impl Iterator<Item = &RequestRecord> {
        self.entries.iter().rev().map(|e| &e.record)
    }

    pub fn page(&self, page: PageRequest) -> RequestsPage {
        let count = self.entries.len();
        // index 0 is the newest record
        let requests: Vec<RequestRecord> = page
            .range(count)
            .map(|i| self.entries[count - 1 - i].record.clone())
            .collect();
        let has_more = page.has_more(requests.len(), count);

        RequestsPage {
            requests,
            count,
            total_count: self.lifetime_count() as usize,
            has_more,
        }
    }

    pub fn find(&self, phrase: &str, scope: SearchScope, page: PageRequest) -> RequestsQueryPage {
        let matches = page.paginate(
            self.newest_first()
                .filter(|record| scope.matches(record, phrase)),
        );

        RequestsQueryPage {
            requests: matches.items.into_iter().cloned().collect(),
            has_more: matches.has_more,
        }
    }
}
