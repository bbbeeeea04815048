//! Fixed-capacity sample buffers and the per-(level, metric) chain.
//!
//! Each metric on each level owns one chain of buffers. A buffer is an
//! append-only slab of samples on a fixed frequency grid; once its
//! capacity is reached a new buffer is appended to the chain, so no data
//! is ever copied or reallocated on the hot write path. Old buffers are
//! released by the retention sweeper and their slabs returned to a
//! process-wide pool.

use crate::core::{Float, Result, StoreError, NAN};
use crossbeam::queue::ArrayQueue;
use once_cell::sync::Lazy;

/// Default buffer capacity in samples. A chain link never grows past it.
pub const BUFFER_CAP: usize = 512;

/// Slabs recycled through this pool keep the write path allocation-free
/// in steady state. Only standard-capacity slabs are accepted back.
static BUFFER_POOL: Lazy<ArrayQueue<Vec<Float>>> = Lazy::new(|| ArrayQueue::new(1024));

fn alloc_data() -> Vec<Float> {
    match BUFFER_POOL.pop() {
        Some(mut data) => {
            data.clear();
            data
        },
        None => Vec::with_capacity(BUFFER_CAP),
    }
}

fn recycle_data(data: Vec<Float>) {
    if data.capacity() == BUFFER_CAP {
        let _ = BUFFER_POOL.push(data);
    }
}

/// One link of a chain: samples for a contiguous time window.
///
/// `start` is snapped half a step below the first write so that writes
/// jittering around the grid land in the intended slot; the timestamp of
/// `data[i]` is `first_write() + i * frequency`.
#[derive(Debug)]
pub(crate) struct Buffer {
    pub(crate) frequency: i64,
    pub(crate) start: i64,
    pub(crate) data: Vec<Float>,
    pub(crate) cap: usize,
    pub(crate) archived: bool,
}

impl Buffer {
    fn new(ts: i64, frequency: i64) -> Self {
        Self {
            frequency,
            start: ts - frequency / 2,
            data: alloc_data(),
            cap: BUFFER_CAP,
            archived: false,
        }
    }

    /// A buffer restored from a checkpoint: immutable, exactly as large
    /// as its data.
    pub(crate) fn frozen(start: i64, frequency: i64, data: Vec<Float>) -> Self {
        let cap = data.len();
        Self {
            frequency,
            start,
            data,
            cap,
            archived: true,
        }
    }

    /// Timestamp of `data[0]`.
    pub(crate) fn first_write(&self) -> i64 {
        self.start + self.frequency / 2
    }

    /// One step past the newest sample.
    pub(crate) fn end(&self) -> i64 {
        self.first_write() + self.data.len() as i64 * self.frequency
    }
}

/// The ordered chain of buffers for one (level, metric), oldest first.
/// Chains are created on first write and never empty.
#[derive(Debug)]
pub(crate) struct BufferChain {
    segments: Vec<Buffer>,
}

impl BufferChain {
    pub(crate) fn new(ts: i64, frequency: i64) -> Self {
        Self {
            segments: vec![Buffer::new(ts, frequency)],
        }
    }

    pub(crate) fn from_frozen(buffer: Buffer) -> Self {
        Self {
            segments: vec![buffer],
        }
    }

    pub(crate) fn frequency(&self) -> i64 {
        self.segments[0].frequency
    }

    pub(crate) fn segments(&self) -> &[Buffer] {
        &self.segments
    }

    /// Total number of stored samples.
    pub(crate) fn sample_count(&self) -> usize {
        self.segments.iter().map(|b| b.data.len()).sum()
    }

    /// Write one sample. Normally only newer data arrives, but a value
    /// landing inside the head buffer's written range overwrites in
    /// place. Values from before the head buffer are rejected.
    pub(crate) fn write(&mut self, ts: i64, value: Float) -> Result<()> {
        let head = self.segments.last().expect("chain is never empty");
        if ts < head.start {
            return Err(StoreError::WriteFromPast);
        }

        let frequency = head.frequency;
        let mut idx = ((ts - head.start) / frequency) as usize;
        if idx >= head.cap || head.archived {
            // Head is full (or persisted and now immutable): a fresh
            // buffer becomes the new head.
            self.segments.push(Buffer::new(ts, frequency));
            let head = self.segments.last().unwrap();
            idx = ((ts - head.start) / frequency) as usize;
        }

        let head = self.segments.last_mut().unwrap();
        if idx < head.data.len() {
            head.data[idx] = value;
            return Ok(());
        }

        // Fill skipped slots with NaN
        while head.data.len() < idx {
            head.data.push(NAN);
        }
        head.data.push(value);
        Ok(())
    }

    /// Add all known values in `[from, to)` into `out`, starting at
    /// `out[0]`. Gaps are represented as NaN. Returns the number of
    /// values emitted and the actual from/to of the data, which differ
    /// from the requested range where no data was available.
    ///
    /// `out` must be large enough for `(to - from) / frequency + 1`
    /// values; this adds into the slice so that multiple chains can be
    /// accumulated for hierarchy aggregation.
    pub(crate) fn read(&self, mut from: i64, to: i64, out: &mut [Float]) -> (usize, i64, i64) {
        let frequency = self.frequency();

        // Start at the newest segment that begins at or before `from`;
        // if even the oldest starts later, clamp `from` forward.
        let mut si = self.segments.len() - 1;
        while si > 0 && from < self.segments[si].first_write() {
            si -= 1;
        }
        if from < self.segments[si].first_write() {
            from = self.segments[si].first_write();
        }

        let mut emitted = 0;
        let mut t = from;
        while t < to {
            let seg = &self.segments[si];
            let idx = (t - seg.start) / frequency;

            if idx >= seg.cap as i64 {
                if si + 1 == self.segments.len() {
                    break;
                }
                // Same t again, next link of the chain.
                si += 1;
                continue;
            }

            if idx >= seg.data.len() as i64 {
                match self.segments.get(si + 1) {
                    None => break,
                    Some(next) if t >= next.first_write() => {
                        si += 1;
                        continue;
                    },
                    Some(next) if to > next.start => out[emitted] += NAN,
                    _ => break,
                }
            } else if t < seg.start {
                out[emitted] += NAN;
            } else {
                out[emitted] += seg.data[idx as usize];
            }
            emitted += 1;
            t += frequency;
        }

        (emitted, from, t)
    }

    /// Release every buffer whose newest sample is older than `t`.
    /// Buffers are freed oldest-first; the count released is returned.
    pub(crate) fn free(&mut self, t: i64) -> usize {
        let keep_from = self
            .segments
            .iter()
            .position(|b| b.end() >= t)
            .unwrap_or(self.segments.len());
        for buffer in self.segments.drain(..keep_from) {
            recycle_data(buffer.data);
        }
        keep_from
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True if any buffer overlapping `[from, to]` has not been
    /// persisted yet.
    pub(crate) fn any_unarchived(&self, from: i64, to: i64) -> bool {
        self.segments
            .iter()
            .any(|b| from <= b.end() && b.start <= to && !b.archived)
    }

    /// Mark every buffer overlapping `[from, to]` as persisted. The
    /// write path treats an archived head as full, so marked buffers
    /// never change again.
    pub(crate) fn mark_archived(&mut self, from: i64, to: i64) {
        for buffer in &mut self.segments {
            if from <= buffer.end() && buffer.start <= to {
                buffer.archived = true;
            }
        }
    }

    /// Append a restored buffer. Checkpoint files are loaded oldest
    /// first; anything else corrupts the chain ordering.
    pub(crate) fn append_frozen(&mut self, buffer: Buffer) -> Result<()> {
        if let Some(last) = self.segments.last() {
            if last.start > buffer.start {
                return Err(StoreError::BackwardsTime);
            }
        }
        self.segments.push(buffer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(chain: &BufferChain, from: i64, to: i64) -> (Vec<Float>, i64, i64) {
        let freq = chain.frequency();
        let mut out = vec![Float::default(); ((to - from) / freq + 1) as usize];
        let (n, actual_from, actual_to) = chain.read(from, to, &mut out);
        out.truncate(n);
        (out, actual_from, actual_to)
    }

    #[test]
    fn test_write_then_read() {
        let mut chain = BufferChain::new(100, 10);
        for i in 0..50 {
            chain.write(100 + i * 10, Float(i as f32)).unwrap();
        }

        let (data, from, to) = read_all(&chain, 100, 600);
        assert_eq!(from, 100);
        assert_eq!(to, 600);
        assert_eq!(data.len(), 50);
        for (i, v) in data.iter().enumerate() {
            assert_eq!(*v, Float(i as f32));
        }
    }

    #[test]
    fn test_gap_padding() {
        let mut chain = BufferChain::new(0, 1);
        chain.write(0, Float(0.0)).unwrap();
        chain.write(3, Float(3.0)).unwrap();

        let (data, _, _) = read_all(&chain, 0, 4);
        assert_eq!(data.len(), 4);
        assert_eq!(data[0], Float(0.0));
        assert!(data[1].is_nan());
        assert!(data[2].is_nan());
        assert_eq!(data[3], Float(3.0));
    }

    #[test]
    fn test_overwrite_in_current_buffer() {
        let mut chain = BufferChain::new(0, 1);
        for i in 0..10 {
            chain.write(i, Float(i as f32)).unwrap();
        }
        chain.write(5, Float(55.0)).unwrap();

        let (data, _, _) = read_all(&chain, 0, 10);
        assert_eq!(data[5], Float(55.0));
    }

    #[test]
    fn test_write_from_past_rejected() {
        let mut chain = BufferChain::new(1000, 1);
        assert!(matches!(
            chain.write(10, Float(1.0)),
            Err(StoreError::WriteFromPast)
        ));
    }

    #[test]
    fn test_capacity_spill_creates_one_successor() {
        let count = BUFFER_CAP as i64 + 1;
        let mut chain = BufferChain::new(0, 1);
        for i in 0..count {
            chain.write(i, Float(i as f32)).unwrap();
        }

        assert_eq!(chain.segments().len(), 2);

        let (data, from, to) = read_all(&chain, 0, count);
        assert_eq!(from, 0);
        assert_eq!(to, count);
        assert_eq!(data.len(), count as usize);
        for (i, v) in data.iter().enumerate() {
            assert_eq!(*v, Float(i as f32));
        }
    }

    #[test]
    fn test_archived_head_spills() {
        let mut chain = BufferChain::new(0, 1);
        chain.write(0, Float(1.0)).unwrap();
        chain.mark_archived(0, 10);

        chain.write(1, Float(2.0)).unwrap();
        assert_eq!(chain.segments().len(), 2);
        assert!(chain.segments()[0].archived);
        assert!(!chain.segments()[1].archived);

        let (data, _, _) = read_all(&chain, 0, 2);
        assert_eq!(data, vec![Float(1.0), Float(2.0)]);
    }

    #[test]
    fn test_free_releases_old_buffers() {
        let count = BUFFER_CAP as i64 * 3;
        let mut chain = BufferChain::new(0, 1);
        for i in 0..count {
            chain.write(i, Float(i as f32)).unwrap();
        }
        assert_eq!(chain.segments().len(), 3);

        let freed = chain.free(BUFFER_CAP as i64 + 1);
        assert_eq!(freed, 1);
        assert_eq!(chain.segments().len(), 2);

        let (data, from, _) = read_all(&chain, 0, count);
        assert_eq!(from, BUFFER_CAP as i64);
        assert_eq!(data.len(), (count - BUFFER_CAP as i64) as usize);
    }

    #[test]
    fn test_read_before_and_after_data() {
        let mut chain = BufferChain::new(1000, 1);
        for i in 0..10 {
            chain.write(1000 + i, Float(i as f32)).unwrap();
        }

        // Entirely before the data
        let (data, from, to) = read_all(&chain, 0, 10);
        assert!(data.is_empty());
        assert_eq!(from, 1000);
        assert_eq!(to, 1000);

        // Entirely after the data
        let (data, from, to) = read_all(&chain, 5000, 5010);
        assert!(data.is_empty());
        assert_eq!(from, 5000);
        assert_eq!(to, 5000);
    }

    #[test]
    fn test_append_frozen_ordering() {
        let mut chain =
            BufferChain::from_frozen(Buffer::frozen(100, 1, vec![Float(1.0), Float(2.0)]));
        chain
            .append_frozen(Buffer::frozen(102, 1, vec![Float(3.0)]))
            .unwrap();

        assert!(matches!(
            chain.append_frozen(Buffer::frozen(50, 1, vec![Float(0.0)])),
            Err(StoreError::BackwardsTime)
        ));

        let (data, from, to) = read_all(&chain, 100, 103);
        assert_eq!(from, 100);
        assert_eq!(to, 103);
        assert_eq!(data, vec![Float(1.0), Float(2.0), Float(3.0)]);
    }
}
