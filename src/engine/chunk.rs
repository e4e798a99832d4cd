//! # Chunk planning and commit ordering
//!
//! Splits a job's record set into bounded chunks and keeps the in-order
//! commit ledger: chunks are dispatched in index order and may complete out
//! of order, but the checkpoint only advances across a contiguous prefix of
//! completed indices. A chunk that never reports (cancelled mid-flight)
//! leaves a gap that pins the checkpoint below it.

use std::collections::BTreeSet;

/// One bounded slice of a job's record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Sequence index within the job, 0-based
    pub index: u32,
    /// Offset of the first record in the job's record set
    pub offset: usize,
    /// Number of records in this chunk
    pub len: usize,
}

/// Total number of chunks for a record set.
pub fn chunk_count(total_records: usize, chunk_size: usize) -> u32 {
    if total_records == 0 {
        return 0;
    }
    (total_records.div_ceil(chunk_size)) as u32
}

/// Plan the chunks remaining after `checkpoint` (the last committed index,
/// -1 before any commit). Restarting from a checkpoint yields exactly the
/// chunks an uninterrupted run would still have processed.
pub fn plan_chunks(total_records: usize, chunk_size: usize, checkpoint: i32) -> Vec<ChunkPlan> {
    let total = chunk_count(total_records, chunk_size);
    let first = (checkpoint + 1).max(0) as u32;

    (first..total)
        .map(|index| {
            let offset = index as usize * chunk_size;
            ChunkPlan {
                index,
                offset,
                len: chunk_size.min(total_records - offset),
            }
        })
        .collect()
}

/// Ordered ledger of completed-but-uncommitted chunk indices.
///
/// `record` returns the indices that became committable, in order; the
/// caller persists the checkpoint once per returned index.
#[derive(Debug)]
pub struct CommitLedger {
    next: u32,
    completed: BTreeSet<u32>,
}

impl CommitLedger {
    /// Start a ledger whose next committable index follows `checkpoint`.
    pub fn new(checkpoint: i32) -> Self {
        Self {
            next: (checkpoint + 1).max(0) as u32,
            completed: BTreeSet::new(),
        }
    }

    /// Record a completed chunk, returning the contiguous run of indices
    /// (possibly empty) that the checkpoint may now advance across.
    pub fn record(&mut self, index: u32) -> Vec<u32> {
        self.completed.insert(index);

        let mut committable = Vec::new();
        while self.completed.remove(&self.next) {
            committable.push(self.next);
            self.next += 1;
        }
        committable
    }

    /// Checkpoint implied by the committed prefix (-1 before any commit).
    pub fn checkpoint(&self) -> i32 {
        self.next as i32 - 1
    }

    /// Completed chunks still waiting on a lower-indexed gap.
    pub fn uncommitted(&self) -> usize {
        self.completed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_plan_covers_all_records() {
        let chunks = plan_chunks(105, 25, -1);

        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0], ChunkPlan { index: 0, offset: 0, len: 25 });
        assert_eq!(chunks[4], ChunkPlan { index: 4, offset: 100, len: 5 });

        let covered: usize = chunks.iter().map(|c| c.len).sum();
        assert_eq!(covered, 105);
    }

    #[test]
    fn test_plan_resumes_from_checkpoint() {
        let chunks = plan_chunks(100, 25, 1);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].index, 2);
        assert_eq!(chunks[0].offset, 50);
    }

    #[test]
    fn test_empty_record_set_has_no_chunks() {
        assert_eq!(chunk_count(0, 25), 0);
        assert!(plan_chunks(0, 25, -1).is_empty());
    }

    #[test]
    fn test_ledger_commits_in_order_despite_out_of_order_completion() {
        let mut ledger = CommitLedger::new(-1);

        // Chunk 2 completes first: nothing committable yet.
        assert!(ledger.record(2).is_empty());
        assert_eq!(ledger.checkpoint(), -1);
        assert_eq!(ledger.uncommitted(), 1);

        // Chunk 0 completes: only 0 commits, 2 still waits on 1.
        assert_eq!(ledger.record(0), vec![0]);
        assert_eq!(ledger.checkpoint(), 0);

        // Chunk 1 completes: 1 and the waiting 2 commit together.
        assert_eq!(ledger.record(1), vec![1, 2]);
        assert_eq!(ledger.checkpoint(), 2);
        assert_eq!(ledger.uncommitted(), 0);
    }

    #[test]
    fn test_ledger_resumes_mid_job() {
        let mut ledger = CommitLedger::new(3);

        assert_eq!(ledger.checkpoint(), 3);
        assert_eq!(ledger.record(4), vec![4]);
        assert_eq!(ledger.checkpoint(), 4);
    }

    #[test]
    fn test_gap_pins_checkpoint() {
        let mut ledger = CommitLedger::new(-1);

        ledger.record(0);
        ledger.record(2);
        ledger.record(3);

        // Chunk 1 never completed; checkpoint must not pass it.
        assert_eq!(ledger.checkpoint(), 0);
        assert_eq!(ledger.uncommitted(), 2);
    }
}
