//! Per-peer, per-segment accumulation and packaging.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::pcm::FRAME_SAMPLES;

pub const DEFAULT_SEGMENT_LENGTH: Duration = Duration::from_secs(3);

/// One accumulator per peer: Opus frames plus the segment's start time.
/// Detaches into a [`TranslationJob`] once `segment_length` has elapsed.
pub struct SegmentAccumulator {
    frames: Vec<Vec<u8>>,
    segment_start: Instant,
    segment_length: Duration,
}

impl SegmentAccumulator {
    pub fn new(segment_length: Duration) -> Self {
        Self { frames: Vec::new(), segment_start: Instant::now(), segment_length }
    }

    /// Copies `frame` in; the caller's buffer remains reusable.
    pub fn push(&mut self, frame: &[u8]) {
        self.frames.push(frame.to_vec());
    }

    pub fn is_due(&self) -> bool {
        self.segment_start.elapsed() >= self.segment_length
    }

    /// Detaches the accumulated frames into a job and rearms with a fresh
    /// start time, atomically from the caller's perspective (one exclusive
    /// borrow covers both steps). `parent` is the translator's current
    /// cancellation scope; the job's own token is a child of it so disabling
    /// the translator cancels every outstanding job at once.
    pub fn detach(&mut self, peer_id: String, src_lang: String, tgt_lang: String, parent: &CancellationToken) -> TranslationJob {
        let frames = std::mem::take(&mut self.frames);
        self.segment_start = Instant::now();
        TranslationJob::new(peer_id, frames, src_lang, tgt_lang, parent)
    }
}

pub struct TranslationJob {
    pub peer_id: String,
    pub frames: Vec<Vec<u8>>,
    pub src_lang: String,
    pub tgt_lang: String,
    pub started_at: Instant,
    pub cancel: CancellationToken,
}

impl TranslationJob {
    pub fn new(peer_id: String, frames: Vec<Vec<u8>>, src_lang: String, tgt_lang: String, parent: &CancellationToken) -> Self {
        Self { peer_id, frames, src_lang, tgt_lang, started_at: Instant::now(), cancel: parent.child_token() }
    }

    /// Packs frames into a streamable container: a sequence of
    /// `(seq: u32 LE, rtp_ts: u32 LE, len: u32 LE, payload)` records with
    /// monotonic sequence numbers and timestamps stepped by `FRAME_SAMPLES`
    /// per frame, matching the wire's own timestamp cadence.
    pub fn pack_container(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.frames.iter().map(|f| f.len() + 12).sum());
        for (i, frame) in self.frames.iter().enumerate() {
            let seq = i as u32;
            let ts = seq * FRAME_SAMPLES as u32;
            out.extend_from_slice(&seq.to_le_bytes());
            out.extend_from_slice(&ts.to_le_bytes());
            out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            out.extend_from_slice(frame);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_becomes_due_after_segment_length_elapses() {
        let mut acc = SegmentAccumulator::new(Duration::from_millis(5));
        acc.push(&[1, 2, 3]);
        assert!(!acc.is_due());
        std::thread::sleep(Duration::from_millis(10));
        assert!(acc.is_due());
    }

    #[test]
    fn detach_rearms_with_an_empty_buffer() {
        let mut acc = SegmentAccumulator::new(Duration::from_secs(3));
        acc.push(&[9, 9]);
        let job = acc.detach("p1".into(), "en".into(), "pt".into(), &CancellationToken::new());
        assert_eq!(job.frames.len(), 1);
        assert!(!acc.is_due());
        acc.push(&[1]);
        assert_eq!(acc.frames.len(), 1);
    }

    #[test]
    fn container_packs_monotonic_seq_and_stepped_timestamps() {
        let job = TranslationJob::new("p1".into(), vec![vec![0xAA; 4], vec![0xBB; 2]], "en".into(), "pt".into(), &CancellationToken::new());
        let container = job.pack_container();
        let seq0 = u32::from_le_bytes(container[0..4].try_into().unwrap());
        let ts0 = u32::from_le_bytes(container[4..8].try_into().unwrap());
        let len0 = u32::from_le_bytes(container[8..12].try_into().unwrap());
        assert_eq!((seq0, ts0, len0), (0, 0, 4));

        let second_record_offset = 12 + len0 as usize;
        let seq1 = u32::from_le_bytes(container[second_record_offset..second_record_offset + 4].try_into().unwrap());
        let ts1 = u32::from_le_bytes(container[second_record_offset + 4..second_record_offset + 8].try_into().unwrap());
        assert_eq!(seq1, 1);
        assert_eq!(ts1, FRAME_SAMPLES as u32);
    }
}
