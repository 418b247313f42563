//! Offset/limit windowing shared by every listing operation.
//!
//! All listings take `(max, skip)`: at most `max` items after skipping the
//! first `skip` of the queried scope. `has_more` is true when items remain
//! past the returned window, so `max = 0` still reports counters.

/// A `(max, skip)` window request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub max: usize,
    pub skip: usize,
}

/// Items of one window together with the size of the scope they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub count: usize,
    pub has_more: bool,
}

impl PageRequest {
    pub fn new(max: usize, skip: usize) -> Self {
        Self { max, skip }
    }

    /// Index range of the window within a scope of `len` items.
    pub fn range(&self, len: usize) -> std::ops::Range<usize> {
        let start = self.skip.min(len);
        let end = start.saturating_add(self.max).min(len);
        start..end
    }

    /// Whether a window that returned `returned` items leaves any of `count` behind it.
    pub fn has_more(&self, returned: usize, count: usize) -> bool {
        self.skip.saturating_add(returned) < count
    }

    /// Window over an ordered sequence, counting every item it yields.
    pub fn paginate<I>(&self, items: I) -> Page<I::Item>
    where
        I: IntoIterator,
    {
        let mut count = 0;
        let mut window = Vec::with_capacity(self.max.min(64));
        for item in items {
            if count >= self.skip && window.len() < self.max {
                window.push(item);
            }
            count += 1;
        }

        let has_more = self.has_more(window.len(), count);
        Page {
            items: window,
            count,
            has_more,
        }
    }
}
