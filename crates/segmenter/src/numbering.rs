// Cross-chunk renumbering.
//
// Workers number their segments locally from 1. The aggregator shifts each
// stream by the cumulative count of segments already emitted for it in
// earlier chunks, plus the player-requested skip base, so the output
// directory carries one contiguous numbering per stream.

use std::collections::HashMap;

/// Per-stream cumulative offsets for one session.
#[derive(Debug, Clone, Default)]
pub struct StreamOffsets {
    skip_base: u64,
    cumulative: HashMap<u32, u64>,
}

impl StreamOffsets {
    pub fn new(skip_base: u64) -> Self {
        Self {
            skip_base,
            cumulative: HashMap::new(),
        }
    }

    pub fn skip_base(&self) -> u64 {
        self.skip_base
    }

    /// The number a locally-numbered segment is emitted under.
    pub fn emitted_number(&self, stream: u32, raw_number: u64) -> u64 {
        raw_number + self.cumulative.get(&stream).copied().unwrap_or(0) + self.skip_base
    }

    /// The filename a locally-numbered segment is emitted under.
    pub fn emitted_name(&self, stream: u32, raw_number: u64) -> String {
        format!(
            "chunk-stream{stream}-{:05}.m4s",
            self.emitted_number(stream, raw_number)
        )
    }

    /// Advance a stream's offset after a chunk completes with
    /// `segment_count` segments for that stream.
    pub fn advance(&mut self, stream: u32, segment_count: u64) {
        *self.cumulative.entry(stream).or_insert(0) += segment_count;
    }

    pub fn offset_of(&self, stream: u32) -> u64 {
        self.cumulative.get(&stream).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_chunk_is_shifted_only_by_skip_base() {
        let offsets = StreamOffsets::new(4); // skip_to_segment = 5
        assert_eq!(offsets.emitted_number(0, 1), 5);
        assert_eq!(offsets.emitted_name(0, 1), "chunk-stream0-00005.m4s");
        assert_eq!(offsets.emitted_name(1, 3), "chunk-stream1-00007.m4s");
    }

    #[test]
    fn offsets_accumulate_across_chunks() {
        let mut offsets = StreamOffsets::new(0);
        // chunk 0 produced 75 video and 76 audio segments
        offsets.advance(0, 75);
        offsets.advance(1, 76);
        // chunk 1 numbering continues where chunk 0 stopped
        assert_eq!(offsets.emitted_number(0, 1), 76);
        assert_eq!(offsets.emitted_number(1, 1), 77);
        assert_eq!(offsets.emitted_name(0, 1), "chunk-stream0-00076.m4s");

        offsets.advance(0, 75);
        assert_eq!(offsets.emitted_number(0, 1), 151);
    }

    #[test]
    fn skip_base_composes_with_cumulative_offset() {
        let mut offsets = StreamOffsets::new(9); // skip_to_segment = 10
        offsets.advance(0, 20);
        assert_eq!(offsets.emitted_number(0, 1), 30);
    }

    #[test]
    fn numbering_is_contiguous_per_stream() {
        let mut offsets = StreamOffsets::new(0);
        let mut emitted = Vec::new();
        for counts in [(3u64, 2u64), (2, 3), (4, 4)] {
            for raw in 1..=counts.0 {
                emitted.push(offsets.emitted_number(0, raw));
            }
            offsets.advance(0, counts.0);
            offsets.advance(1, counts.1);
        }
        let expected: Vec<u64> = (1..=9).collect();
        assert_eq!(emitted, expected);
    }
}
