//! Record aggregation.
//!
//! Merges the segment batches of one part into a single timeline: batches are
//! concatenated in arrival order, stably sorted by playback offset, then
//! deduplicated by id keeping the first occurrence. Multi-part documents
//! concatenate the per-part timelines in resolver order.

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::record::{CommentRecord, SegmentBatch};

/// Accumulates segment batches for one part.
#[derive(Debug, Default)]
pub struct RecordAggregator {
    records: Vec<CommentRecord>,
    batch_count: usize,
}

impl RecordAggregator {
    /// Create a new, empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch in arrival order.
    pub fn push_batch(&mut self, batch: SegmentBatch) {
        self.batch_count += 1;
        self.records.extend(batch.records);
    }

    /// Number of records received so far, duplicates included.
    pub fn received(&self) -> usize {
        self.records.len()
    }

    /// Sort, deduplicate and return the timeline.
    pub fn finalize(self) -> Vec<CommentRecord> {
        let received = self.records.len();
        let mut records = self.records;

        // `sort_by_key` is stable: equal offsets keep arrival order.
        records.sort_by_key(|r| r.timestamp_ms);

        let mut seen = FxHashSet::default();
        seen.reserve(records.len());
        records.retain(|r| seen.insert(r.id));

        debug!(
            batches = self.batch_count,
            received,
            kept = records.len(),
            "Aggregated segment batches"
        );
        records
    }
}

/// Aggregate the batches of a single part.
pub fn aggregate<I>(batches: I) -> Vec<CommentRecord>
where
    I: IntoIterator<Item = SegmentBatch>,
{
    let mut aggregator = RecordAggregator::new();
    for batch in batches {
        aggregator.push_batch(batch);
    }
    aggregator.finalize()
}

/// Concatenate already-aggregated part timelines in the given order.
pub fn concat_parts<I>(parts: I) -> Vec<CommentRecord>
where
    I: IntoIterator<Item = Vec<CommentRecord>>,
{
    parts.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::record;
    use proptest::prelude::*;

    #[test]
    fn test_sorts_by_timestamp() {
        let out = aggregate([
            SegmentBatch::new(2, vec![record(3, 400_000, "c")]),
            SegmentBatch::new(1, vec![record(2, 2_000, "b"), record(1, 1_000, "a")]),
        ]);
        let ids: Vec<i64> = out.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_ties_keep_arrival_order() {
        let out = aggregate([
            SegmentBatch::new(1, vec![record(10, 500, "x"), record(5, 500, "y")]),
            SegmentBatch::new(2, vec![record(7, 500, "z")]),
        ]);
        let ids: Vec<i64> = out.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 5, 7]);
    }

    #[test]
    fn test_duplicates_first_occurrence_wins() {
        let mut dup = record(1, 1_000, "second copy");
        dup.weight = 3;
        let out = aggregate([
            SegmentBatch::new(1, vec![record(1, 1_000, "first copy")]),
            SegmentBatch::new(2, vec![dup, record(2, 2_000, "b")]),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "first copy");
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate(Vec::<SegmentBatch>::new()).is_empty());
    }

    #[test]
    fn test_concat_parts_keeps_part_order() {
        let part1 = aggregate([SegmentBatch::new(1, vec![record(1, 9_000, "p1")])]);
        let part2 = aggregate([SegmentBatch::new(1, vec![record(1, 100, "p2")])]);
        let out = concat_parts([part1, part2]);
        let texts: Vec<&str> = out.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["p1", "p2"]);
    }

    fn batches_strategy() -> impl Strategy<Value = Vec<Vec<(i64, i32)>>> {
        proptest::collection::vec(
            proptest::collection::vec((0i64..40, 0i32..5_000), 0..30),
            0..6,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_output_ids_are_unique(batches in batches_strategy()) {
            let input: Vec<SegmentBatch> = batches
                .iter()
                .enumerate()
                .map(|(i, b)| SegmentBatch::new(i as u32 + 1, b.iter().map(|&(id, ts)| record(id, ts, "")).collect()))
                .collect();
            let distinct: FxHashSet<i64> = batches.iter().flatten().map(|&(id, _)| id).collect();

            let out = aggregate(input);
            let ids: FxHashSet<i64> = out.iter().map(|r| r.id).collect();
            prop_assert_eq!(ids.len(), out.len());
            prop_assert_eq!(ids, distinct);
        }

        #[test]
        fn prop_output_is_chronological(batches in batches_strategy()) {
            let input: Vec<SegmentBatch> = batches
                .iter()
                .enumerate()
                .map(|(i, b)| SegmentBatch::new(i as u32 + 1, b.iter().map(|&(id, ts)| record(id, ts, "")).collect()))
                .collect();
            let out = aggregate(input);
            for pair in out.windows(2) {
                prop_assert!(pair[0].timestamp_ms <= pair[1].timestamp_ms);
            }
        }
    }
}
