//! NaN-skipping statistics over a time range.
//!
//! Works like a read of the same range, but folds the values into
//! sample count, average, minimum and maximum instead of copying them
//! out.

use crate::core::{AggregationStrategy, Float, Result, StoreError, NAN};
use crate::storage::buffer::BufferChain;
use crate::storage::selector::Selector;
use crate::storage::store::MemoryStore;

/// Statistics for one metric over one time range.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub samples: usize,
    pub avg: Float,
    pub min: Float,
    pub max: Float,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ChainStats {
    pub samples: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl BufferChain {
    /// Fold the values in `[from, to)` into count/sum/min/max, skipping
    /// NaN slots. Bounds clamp exactly like [`BufferChain::read`].
    pub(crate) fn stats(&self, mut from: i64, to: i64) -> (ChainStats, i64, i64) {
        let frequency = self.frequency();
        let segments = self.segments();

        let mut si = segments.len() - 1;
        while si > 0 && from < segments[si].first_write() {
            si -= 1;
        }
        if from < segments[si].first_write() {
            from = segments[si].first_write();
        }

        let mut stats = ChainStats {
            samples: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        };

        let mut t = from;
        while t < to {
            let seg = &segments[si];
            let idx = (t - seg.start) / frequency;

            if idx >= seg.cap as i64 {
                if si + 1 == segments.len() {
                    break;
                }
                si += 1;
                continue;
            }

            if idx >= seg.data.len() as i64 {
                match segments.get(si + 1) {
                    None => break,
                    Some(next) if t >= next.first_write() => {
                        si += 1;
                        continue;
                    },
                    // Gap slot: nothing to count.
                    Some(next) if to > next.start => {},
                    _ => break,
                }
            } else if t >= seg.start {
                let value = seg.data[idx as usize];
                if !value.is_nan() {
                    stats.samples += 1;
                    stats.sum += value.to_f64();
                    stats.min = stats.min.min(value.to_f64());
                    stats.max = stats.max.max(value.to_f64());
                }
            }
            t += frequency;
        }

        (stats, from, t)
    }
}

impl MemoryStore {
    /// Compute statistics for `metric` in `[from, to)` at the level(s)
    /// matched by `selector`, with the same traversal, alignment and
    /// aggregation rules as [`MemoryStore::read`].
    pub fn stats(
        &self,
        selector: &Selector,
        metric: &str,
        from: i64,
        to: i64,
    ) -> Result<(Stats, i64, i64)> {
        if from > to {
            return Err(StoreError::InvalidRange { from, to });
        }

        let config = self
            .metrics
            .get(metric)
            .ok_or_else(|| StoreError::UnknownMetric(metric.to_string()))?;

        let mut chains = 0usize;
        let mut samples = 0usize;
        let mut avg_sum = 0.0f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let (mut from, mut to) = (from, to);

        self.root.find_buffers(selector, config.offset, &mut |chain| {
            let (cs, cfrom, cto) = chain.stats(from, to);

            if chains == 0 {
                from = cfrom;
                to = cto;
            } else if cfrom != from || cto != to {
                return Err(StoreError::DataDoesNotAlign);
            }

            samples += cs.samples;
            avg_sum += if cs.samples > 0 {
                cs.sum / cs.samples as f64
            } else {
                f64::NAN
            };
            min = min.min(cs.min);
            max = max.max(cs.max);
            chains += 1;
            Ok(())
        })?;

        if chains == 0 {
            return Err(StoreError::NoData);
        }

        let mut avg = avg_sum;
        if chains > 1 {
            match config.aggregation {
                AggregationStrategy::Avg => avg /= chains as f64,
                AggregationStrategy::Sum => {},
                AggregationStrategy::None => return Err(StoreError::InvalidAggregation),
            }
        }

        let stats = if samples == 0 {
            Stats {
                samples: 0,
                avg: NAN,
                min: NAN,
                max: NAN,
            }
        } else {
            Stats {
                samples,
                avg: Float::from(avg),
                min: Float::from(min),
                max: Float::from(max),
            }
        };

        Ok((stats, from, to))
    }
}
