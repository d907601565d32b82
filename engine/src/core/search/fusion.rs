//! Score Fusion
//!
//! Extends running chains with the hits of the next stage. A hit continues a
//! chain when it lies in the same video, strictly after the chain's last
//! frame and at most `window_size` frames later. Among all such chains the one
//! with the highest running total wins; ties go to the chain seen first. Hits
//! with no predecessor are dropped.

use std::collections::HashMap;

use serde::Serialize;

use crate::core::{FrameNumber, VideoId};

use super::SearchHit;

// =============================================================================
// Chain
// =============================================================================

/// Ordered hits, one per stage, within a single video
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    stages: Vec<SearchHit>,
    total_score: f64,
}

impl Chain {
    /// Starts a chain from a stage-1 hit
    pub fn seed(hit: SearchHit) -> Self {
        Self {
            total_score: hit.score,
            stages: vec![hit],
        }
    }

    /// Returns a copy of this chain with `hit` appended
    pub fn extended(&self, hit: SearchHit) -> Self {
        let mut stages = Vec::with_capacity(self.stages.len() + 1);
        stages.extend(self.stages.iter().cloned());
        let total_score = self.total_score + hit.score;
        stages.push(hit);
        Self {
            stages,
            total_score,
        }
    }

    pub fn stages(&self) -> &[SearchHit] {
        &self.stages
    }

    pub fn total_score(&self) -> f64 {
        self.total_score
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn video_id(&self) -> &str {
        &self.last().video_id
    }

    /// Most recent hit
    pub fn last(&self) -> &SearchHit {
        &self.stages[self.stages.len() - 1]
    }

    /// `(video, frame)` of the most recent hit
    pub fn terminal_key(&self) -> (&str, FrameNumber) {
        self.last().frame_key()
    }
}

// =============================================================================
// Score Fusion
// =============================================================================

/// Joins one stage's hits onto the previous chains
#[derive(Clone, Copy, Debug)]
pub struct ScoreFusion {
    window_size: FrameNumber,
}

impl ScoreFusion {
    pub fn new(window_size: FrameNumber) -> Self {
        Self { window_size }
    }

    pub fn window_size(&self) -> FrameNumber {
        self.window_size
    }

    /// True when `next` may follow `previous` in a chain
    pub fn accepts(&self, previous: &SearchHit, next: &SearchHit) -> bool {
        previous.video_id == next.video_id
            && next.frame_number > previous.frame_number
            && next.frame_number - previous.frame_number <= self.window_size
    }

    /// Extends `previous` chains with `hits`, deduplicated and sorted
    pub fn fuse(&self, previous: &[Chain], hits: Vec<SearchHit>) -> Vec<Chain> {
        let tails = TailIndex::new(previous);
        let total = hits.len();

        let extended: Vec<Chain> = hits
            .into_iter()
            .filter_map(|hit| {
                tails
                    .best_predecessor(&hit, self.window_size)
                    .map(|idx| previous[idx].extended(hit))
            })
            .collect();

        tracing::debug!(
            chains = previous.len(),
            hits = total,
            extended = extended.len(),
            "Fused stage hits"
        );

        finalize_chains(extended)
    }
}

/// Chain tails grouped by video and sorted by frame
struct TailIndex<'a> {
    previous: &'a [Chain],
    by_video: HashMap<&'a str, Vec<(FrameNumber, usize)>>,
}

impl<'a> TailIndex<'a> {
    fn new(previous: &'a [Chain]) -> Self {
        let mut by_video: HashMap<&'a str, Vec<(FrameNumber, usize)>> = HashMap::new();
        for (idx, chain) in previous.iter().enumerate() {
            let (video, frame) = chain.terminal_key();
            by_video.entry(video).or_default().push((frame, idx));
        }
        for tails in by_video.values_mut() {
            tails.sort_unstable();
        }
        Self { previous, by_video }
    }

    /// Index of the best chain `hit` may extend
    fn best_predecessor(&self, hit: &SearchHit, window_size: FrameNumber) -> Option<usize> {
        let tails = self.by_video.get(hit.video_id.as_str())?;
        let lowest = hit.frame_number.saturating_sub(window_size);
        let start = tails.partition_point(|(frame, _)| *frame < lowest);
        let end = tails.partition_point(|(frame, _)| *frame < hit.frame_number);

        let mut best: Option<(f64, usize)> = None;
        for &(_, idx) in tails.get(start..end)? {
            let score = self.previous[idx].total_score;
            best = match best {
                Some((best_score, best_idx))
                    if best_score > score || (best_score == score && best_idx < idx) =>
                {
                    Some((best_score, best_idx))
                }
                _ => Some((score, idx)),
            };
        }
        best.map(|(_, idx)| idx)
    }
}

// =============================================================================
// Deduplication and Ordering
// =============================================================================

/// Keeps the highest-scoring chain per terminal `(video, frame)`
///
/// The first chain wins a tie. Output keeps first-seen key order.
pub fn dedup_by_terminal(chains: Vec<Chain>) -> Vec<Chain> {
    let mut slots: HashMap<(VideoId, FrameNumber), usize> = HashMap::new();
    let mut kept: Vec<Chain> = Vec::with_capacity(chains.len());

    for chain in chains {
        let (video, frame) = chain.terminal_key();
        let key = (video.to_string(), frame);
        match slots.get(&key) {
            Some(&slot) => {
                if chain.total_score > kept[slot].total_score {
                    kept[slot] = chain;
                }
            }
            None => {
                slots.insert(key, kept.len());
                kept.push(chain);
            }
        }
    }
    kept
}

/// Sorts by total score, best first; equal totals keep their order
pub fn sort_chains(chains: &mut [Chain]) {
    chains.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
}

/// Deduplicates then sorts
pub fn finalize_chains(chains: Vec<Chain>) -> Vec<Chain> {
    let mut chains = dedup_by_terminal(chains);
    sort_chains(&mut chains);
    chains
}
