use core::ops::Range;

pub(crate) trait RangeChunks {
    /// Splits the range into consecutive sub-ranges of `size` elements, the
    /// last one possibly shorter.
    fn split_into_chunks(self, size: usize) -> impl Iterator<Item = Range<usize>>;
}

impl RangeChunks for Range<usize> {
    #[inline]
    fn split_into_chunks(self, size: usize) -> impl Iterator<Item = Range<usize>> {
        assert_ne!(size, 0, "RangeChunks::split_into_chunks: zero chunk size");
        let Range { start, end } = self;
        (start..end)
            .step_by(size)
            .map(move |chunk_start| chunk_start..chunk_start.saturating_add(size).min(end))
    }
}
