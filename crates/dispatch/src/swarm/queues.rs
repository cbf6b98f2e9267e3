// Queue policies for the swarm: proportional distribution and stealing.
//
// Pure functions over queue state so the policies are testable without a
// worker in sight.

use std::collections::VecDeque;

/// Floor-proportional shares of `total_items` by `weights`; the rounding
/// leftover goes to the heaviest weight (the fastest worker).
pub(crate) fn proportional_counts(total_items: usize, weights: &[u32]) -> Vec<usize> {
    if weights.is_empty() {
        return Vec::new();
    }
    let total_weight: u64 = weights.iter().map(|w| (*w).max(1) as u64).sum();
    let mut counts: Vec<usize> = weights
        .iter()
        .map(|w| (total_items as u64 * (*w).max(1) as u64 / total_weight) as usize)
        .collect();
    let assigned: usize = counts.iter().sum();
    let leftover = total_items - assigned;
    if leftover > 0 {
        let fastest = weights
            .iter()
            .enumerate()
            .max_by_key(|(_, w)| **w)
            .map(|(i, _)| i)
            .unwrap_or(0);
        counts[fastest] += leftover;
    }
    counts
}

/// Hand out `pending` (ascending chunk indices) as contiguous runs sized by
/// `counts`, one run per queue.
pub(crate) fn distribute(pending: &[usize], counts: &[usize], queues: &mut [VecDeque<usize>]) {
    let mut cursor = 0;
    for (queue, count) in queues.iter_mut().zip(counts) {
        for &chunk in pending.iter().skip(cursor).take(*count) {
            queue.push_back(chunk);
        }
        cursor += count;
    }
}

/// Pick the victim for a steal: the longest queue other than the thief's.
pub(crate) fn steal_victim(queues: &[VecDeque<usize>], thief: usize) -> Option<usize> {
    queues
        .iter()
        .enumerate()
        .filter(|(idx, q)| *idx != thief && !q.is_empty())
        .max_by_key(|(_, q)| q.len())
        .map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_proportional_with_leftover_to_fastest() {
        // 10 chunks at 200 vs 120 fps: floor gives 6 and 3, leftover to W0
        let counts = proportional_counts(10, &[200, 120]);
        assert_eq!(counts, vec![7, 3]);
        assert_eq!(counts.iter().sum::<usize>(), 10);
    }

    #[test]
    fn counts_with_zero_weight_never_panic() {
        let counts = proportional_counts(4, &[0, 100]);
        assert_eq!(counts.iter().sum::<usize>(), 4);
        // the zero-weight worker still degrades to weight 1, not zero share
        // of the arithmetic (though it may round to no chunks)
        assert!(counts[1] >= counts[0]);
    }

    #[test]
    fn distribution_hands_out_contiguous_runs() {
        let pending = vec![3, 4, 5, 6, 7];
        let mut queues = vec![VecDeque::new(), VecDeque::new()];
        distribute(&pending, &[3, 2], &mut queues);
        assert_eq!(queues[0], VecDeque::from(vec![3, 4, 5]));
        assert_eq!(queues[1], VecDeque::from(vec![6, 7]));
    }

    #[test]
    fn steal_targets_longest_other_queue() {
        let queues = vec![
            VecDeque::new(),
            VecDeque::from(vec![4, 5]),
            VecDeque::from(vec![6, 7, 8]),
        ];
        assert_eq!(steal_victim(&queues, 0), Some(2));
        // the thief never steals from itself even when longest
        assert_eq!(steal_victim(&queues, 2), Some(1));
    }

    #[test]
    fn steal_with_all_queues_empty_yields_nothing() {
        let queues = vec![VecDeque::new(), VecDeque::new()];
        assert_eq!(steal_victim(&queues, 0), None);
    }
}
