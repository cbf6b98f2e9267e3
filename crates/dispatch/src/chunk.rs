// Chunk records and the chunk table.
//
// State transitions are strictly monotonic — pending, encoding,
// downloading, completed — with the single exception of encoding back to
// pending on failure. Job ids live in per-chunk slots with single-writer
// discipline: only the tick that assigns a chunk writes them.

use std::time::Instant;

use beam_proto::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    Encoding,
    Downloading,
    Completed,
}

/// One timeline interval handed to workers.
#[derive(Debug)]
pub struct Chunk {
    pub index: usize,
    /// Absolute seek into the source, seconds.
    pub ss_sec: f64,
    /// Interval length, seconds.
    pub t_sec: f64,
    pub state: ChunkState,
    pub worker_idx: Option<usize>,
    pub job_id: Option<JobId>,
    pub start_epoch: Option<Instant>,
    pub vid_seg_count: u64,
    pub aud_seg_count: u64,
    /// Endgame duplication happens at most once per chunk.
    pub endgame_duped: bool,
    /// In-flight endgame duplicate, if any: `(worker_idx, job_id)`.
    pub dup: Option<(usize, JobId)>,
}

impl Chunk {
    fn new(index: usize, ss_sec: f64, t_sec: f64) -> Self {
        Self {
            index,
            ss_sec,
            t_sec,
            state: ChunkState::Pending,
            worker_idx: None,
            job_id: None,
            start_epoch: None,
            vid_seg_count: 0,
            aud_seg_count: 0,
            endgame_duped: false,
            dup: None,
        }
    }

    /// Wall seconds since this chunk started encoding.
    pub fn elapsed_sec(&self) -> Option<f64> {
        self.start_epoch.map(|t| t.elapsed().as_secs_f64())
    }
}

/// All chunks of one dispatch, plus the ordered-emission cursor and the
/// cumulative failure counter.
#[derive(Debug)]
pub struct ChunkTable {
    chunks: Vec<Chunk>,
    next_processable: usize,
    failures: u32,
}

impl ChunkTable {
    /// Split `remaining` seconds (everything after the invocation seek)
    /// into chunks of `chunk_duration`, the last chunk absorbing the
    /// remainder. Intervals with `t <= 0` are never created.
    pub fn split(seek_sec: f64, remaining_sec: f64, chunk_duration: f64) -> Self {
        let mut chunks = Vec::new();
        if remaining_sec > 0.0 && chunk_duration > 0.0 {
            let full = (remaining_sec / chunk_duration).floor() as usize;
            for i in 0..full {
                chunks.push(Chunk::new(i, seek_sec + i as f64 * chunk_duration, chunk_duration));
            }
            let tail = remaining_sec - full as f64 * chunk_duration;
            if tail > 0.0 {
                match chunks.last_mut() {
                    // last chunk absorbs the remainder
                    Some(last) => last.t_sec += tail,
                    None => chunks.push(Chunk::new(0, seek_sec, tail)),
                }
            }
        }
        Self {
            chunks,
            next_processable: 0,
            failures: 0,
        }
    }

    /// Build a table from explicit `(ss, t)` slices (the weighted
    /// big-split). Non-positive intervals are never created.
    pub fn from_slices(slices: &[(f64, f64)]) -> Self {
        let chunks = slices
            .iter()
            .filter(|(_, t)| *t > 0.0)
            .enumerate()
            .map(|(i, (ss, t))| Chunk::new(i, *ss, *t))
            .collect();
        Self {
            chunks,
            next_processable: 0,
            failures: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, index: usize) -> &Chunk {
        &self.chunks[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Chunk {
        &mut self.chunks[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn next_processable(&self) -> usize {
        self.next_processable
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Lowest-indexed pending chunk, if any.
    pub fn first_pending(&self) -> Option<usize> {
        self.chunks
            .iter()
            .find(|c| c.state == ChunkState::Pending)
            .map(|c| c.index)
    }

    pub fn pending_indices(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .filter(|c| c.state == ChunkState::Pending)
            .map(|c| c.index)
            .collect()
    }

    pub fn all_completed(&self) -> bool {
        self.chunks.iter().all(|c| c.state == ChunkState::Completed)
    }

    pub fn completed_count(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|c| c.state == ChunkState::Completed)
            .count() as u64
    }

    /// Wall-elapsed of the earliest chunk still encoding; feeds the
    /// progress approximation.
    pub fn earliest_running_elapsed(&self) -> Option<f64> {
        self.chunks
            .iter()
            .filter(|c| c.state == ChunkState::Encoding)
            .find_map(|c| c.elapsed_sec())
    }

    /// Mark `index` as encoding on `worker_idx` under `job_id`.
    pub fn assign(&mut self, index: usize, worker_idx: usize, job_id: JobId) {
        let chunk = &mut self.chunks[index];
        debug_assert_eq!(chunk.state, ChunkState::Pending, "assign of non-pending chunk");
        chunk.state = ChunkState::Encoding;
        chunk.worker_idx = Some(worker_idx);
        chunk.job_id = Some(job_id);
        chunk.start_epoch = Some(Instant::now());
    }

    /// Return an encoding chunk to the pending set and count a failure.
    pub fn fail(&mut self, index: usize) {
        let chunk = &mut self.chunks[index];
        chunk.state = ChunkState::Pending;
        chunk.worker_idx = None;
        chunk.job_id = None;
        chunk.start_epoch = None;
        chunk.dup = None;
        self.failures += 1;
    }

    pub fn mark_downloading(&mut self, index: usize) {
        let chunk = &mut self.chunks[index];
        debug_assert_eq!(chunk.state, ChunkState::Encoding);
        chunk.state = ChunkState::Downloading;
    }

    pub fn mark_completed(&mut self, index: usize, vid: u64, aud: u64) {
        let chunk = &mut self.chunks[index];
        chunk.state = ChunkState::Completed;
        chunk.vid_seg_count = vid;
        chunk.aud_seg_count = aud;
    }

    /// Advance the emission cursor past `index`. Callers emit strictly in
    /// index order; this is the only writer of the cursor.
    pub fn advance_cursor(&mut self, index: usize) {
        debug_assert_eq!(index, self.next_processable);
        self.next_processable = index + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beam_proto::SessionId;

    fn job(i: usize) -> JobId {
        JobId::chunk(&SessionId::from_parts("20260802T000000", 1), i)
    }

    #[test]
    fn split_divides_evenly() {
        let table = ChunkTable::split(0.0, 600.0, 300.0);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0).ss_sec, 0.0);
        assert_eq!(table.get(0).t_sec, 300.0);
        assert_eq!(table.get(1).ss_sec, 300.0);
        assert_eq!(table.get(1).t_sec, 300.0);
    }

    #[test]
    fn last_chunk_absorbs_remainder() {
        let table = ChunkTable::split(0.0, 740.0, 300.0);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1).t_sec, 440.0);
    }

    #[test]
    fn seek_shifts_chunk_origins() {
        let table = ChunkTable::split(120.0, 600.0, 300.0);
        assert_eq!(table.get(0).ss_sec, 120.0);
        assert_eq!(table.get(1).ss_sec, 420.0);
    }

    #[test]
    fn short_timeline_yields_single_chunk() {
        let table = ChunkTable::split(0.0, 200.0, 300.0);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0).t_sec, 200.0);
    }

    #[test]
    fn zero_or_negative_remaining_yields_no_chunks() {
        assert!(ChunkTable::split(0.0, 0.0, 300.0).is_empty());
        assert!(ChunkTable::split(0.0, -5.0, 300.0).is_empty());
    }

    #[test]
    fn explicit_slices_skip_empty_intervals() {
        let table = ChunkTable::from_slices(&[(0.0, 375.0), (375.0, 225.0), (600.0, 0.0)]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0).t_sec, 375.0);
        assert_eq!(table.get(1).index, 1);
        assert_eq!(table.get(1).ss_sec, 375.0);
    }

    #[test]
    fn state_round_trip_and_failure_counting() {
        let mut table = ChunkTable::split(0.0, 900.0, 300.0);
        assert_eq!(table.len(), 3);
        assert_eq!(table.first_pending(), Some(0));

        table.assign(0, 0, job(0));
        assert_eq!(table.get(0).state, ChunkState::Encoding);
        assert_eq!(table.first_pending(), Some(1));

        table.fail(0);
        assert_eq!(table.get(0).state, ChunkState::Pending);
        assert_eq!(table.failures(), 1);
        assert_eq!(table.first_pending(), Some(0));

        table.assign(0, 1, job(0));
        table.mark_downloading(0);
        table.mark_completed(0, 75, 76);
        assert_eq!(table.get(0).vid_seg_count, 75);
        assert!(!table.all_completed());
        assert_eq!(table.completed_count(), 1);

        table.advance_cursor(0);
        assert_eq!(table.next_processable(), 1);
    }
}
