/// One bucket of a metric's grid. `num` counts grid slots since the first
/// bucket, including slots skipped while the metric was inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BucketSpan {
    pub start: i64,
    pub end: i64,
    pub num: u64,
}

/// Bucket grid of one metric. A grid is anchored when a bucket opens with
/// nothing open before it; subsequent buckets are contiguous.
#[derive(Debug)]
pub(crate) struct BucketClock {
    size: i64,
    current: Option<BucketSpan>,
    last: Option<BucketSpan>,
}

impl BucketClock {
    pub(crate) fn new(size: i64) -> Self {
        Self {
            size,
            current: None,
            last: None,
        }
    }

    pub(crate) fn current(&self) -> Option<BucketSpan> {
        self.current
    }

    /// Anchor a new grid at `anchor`.
    pub(crate) fn open_at(&mut self, anchor: i64) -> BucketSpan {
        let num = match self.last {
            Some(last) if anchor >= last.end => {
                last.num + 1 + ((anchor - last.end) / self.size) as u64
            }
            Some(last) => last.num + 1,
            None => 0,
        };
        let span = BucketSpan {
            start: anchor,
            end: anchor.saturating_add(self.size),
            num,
        };
        self.current = Some(span);
        span
    }

    pub(crate) fn close(&mut self) -> Option<BucketSpan> {
        let span = self.current.take()?;
        self.last = Some(span);
        Some(span)
    }

    /// Close the current bucket and open the contiguous next one.
    pub(crate) fn roll(&mut self) -> Option<BucketSpan> {
        let closed = self.close()?;
        let next = BucketSpan {
            start: closed.end,
            end: closed.end.saturating_add(self.size),
            num: closed.num + 1,
        };
        self.current = Some(next);
        Some(next)
    }
}
