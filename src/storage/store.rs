//! The memory store: a level tree plus the fixed metric schema.

use crate::core::{Float, Metric, MetricConfig, Result, StoreError};
use crate::storage::buffer::BufferChain;
use crate::storage::level::Level;
use crate::storage::resample;
use crate::storage::selector::Selector;
use std::collections::HashMap;
use std::sync::Arc;

/// The in-memory store. One instance holds everything: the hierarchical
/// level tree anchored at an anonymous root and the schema that assigns
/// every metric its dense slot offset.
pub struct MemoryStore {
    pub(crate) metrics: HashMap<String, MetricConfig>,
    pub(crate) root: Arc<Level>,
}

impl MemoryStore {
    /// Create a store for the given metric schema. Offsets are assigned
    /// here and never change afterwards. Fails on non-positive
    /// frequencies.
    pub fn new(metrics: HashMap<String, MetricConfig>) -> Result<Self> {
        let mut names: Vec<&String> = metrics.keys().collect();
        names.sort();

        let mut schema = HashMap::with_capacity(metrics.len());
        for (offset, name) in names.into_iter().enumerate() {
            let config = metrics[name];
            if config.frequency <= 0 {
                return Err(StoreError::config(format!(
                    "metric {name:?} has invalid frequency {}",
                    config.frequency
                )));
            }
            schema.insert(
                name.clone(),
                MetricConfig {
                    offset,
                    ..config
                },
            );
        }

        let num_metrics = schema.len();
        Ok(Self {
            metrics: schema,
            root: Level::new(num_metrics),
        })
    }

    pub(crate) fn num_metrics(&self) -> usize {
        self.metrics.len()
    }

    /// Look up a metric's configuration.
    pub fn metric_config(&self, metric: &str) -> Option<&MetricConfig> {
        self.metrics.get(metric)
    }

    /// The level addressed by `selector`, created if missing. Handles
    /// stay valid forever; levels are never deleted.
    pub fn get_level(&self, selector: &[&str]) -> Arc<Level> {
        self.root.find_level_or_create(selector, self.num_metrics())
    }

    /// Write all samples in `metrics` to the level addressed by
    /// `selector` at time `ts`. Samples for metrics missing from the
    /// schema are dropped; ingestion must not fail because a source
    /// sends something unknown.
    pub fn write(&self, selector: &[&str], ts: i64, metrics: &[Metric]) -> Result<()> {
        self.write_to_level(&self.root, selector, ts, metrics)
    }

    /// Like [`MemoryStore::write`], but descends from a cached level
    /// handle. All samples of the call share one lock acquisition on the
    /// target level.
    pub fn write_to_level(
        &self,
        level: &Arc<Level>,
        selector: &[&str],
        ts: i64,
        metrics: &[Metric],
    ) -> Result<()> {
        let level = level.find_level_or_create(selector, self.num_metrics());
        let mut inner = level.inner.write();

        for metric in metrics {
            let Some(config) = self.metrics.get(&metric.name) else {
                continue;
            };

            let chain = inner.metrics[config.offset]
                .get_or_insert_with(|| BufferChain::new(ts, config.frequency));
            chain.write(ts, metric.value)?;
        }
        Ok(())
    }

    /// All values for `metric` in `[from, to)` at the level(s) matched
    /// by `selector`. A level that does not hold the metric itself
    /// aggregates it recursively from its children according to the
    /// metric's policy. The returned from/to are the actual bounds of
    /// the data, which shrink when less was available; the returned
    /// resolution is the achieved one after optional downsampling
    /// (`resolution <= 0` requests native resolution).
    pub fn read(
        &self,
        selector: &Selector,
        metric: &str,
        from: i64,
        to: i64,
        resolution: i64,
    ) -> Result<(Vec<Float>, i64, i64, i64)> {
        if from > to {
            return Err(StoreError::InvalidRange { from, to });
        }

        let config = self
            .metrics
            .get(metric)
            .ok_or_else(|| StoreError::UnknownMetric(metric.to_string()))?;
        let frequency = config.frequency;

        let mut out = vec![Float::default(); ((to - from) / frequency + 1) as usize];
        let mut chains = 0usize;
        let mut emitted = 0usize;
        let (mut from, mut to) = (from, to);

        self.root.find_buffers(selector, config.offset, &mut |chain| {
            let (clen, cfrom, cto) = chain.read(from, to, &mut out);

            if chains == 0 {
                from = cfrom;
                to = cto;
                emitted = clen;
            } else if cfrom != from || cto != to || clen != emitted {
                // Later chains may stop earlier than the first one; data
                // missing at the front can never be reconciled.
                if (from - cfrom) / frequency != 0 {
                    return Err(StoreError::DataDoesNotAlign);
                }
                let missing_back = (to - cto) / frequency;
                let new_len = clen as i64 - missing_back;
                if new_len < 1 || new_len as usize != emitted {
                    return Err(StoreError::DataDoesNotAlign);
                }
                to = cto;
            }

            chains += 1;
            Ok(())
        })?;

        if chains == 0 {
            return Err(StoreError::NoData);
        }
        if chains > 1 {
            match config.aggregation {
                crate::core::AggregationStrategy::Avg => {
                    let normalize = Float(1.0 / chains as f32);
                    for value in &mut out[..emitted] {
                        *value *= normalize;
                    }
                },
                crate::core::AggregationStrategy::Sum => {},
                crate::core::AggregationStrategy::None => {
                    return Err(StoreError::InvalidAggregation);
                },
            }
        }

        out.truncate(emitted);
        let (out, resolution) = resample::largest_triangle_three_bucket(out, frequency, resolution)?;
        Ok((out, from, to, resolution))
    }

    /// Release all buffers at the selected level and below that only
    /// hold values older than `t`. Returns the count released.
    pub fn free(&self, selector: &[&str], t: i64) -> Result<usize> {
        Ok(self.get_level(selector).free(t))
    }

    /// Current heap consumption of all stored samples.
    pub fn size_in_bytes(&self) -> usize {
        self.root.size_in_bytes()
    }

    /// The names of the children of the level addressed by `selector`,
    /// as a snapshot safe under concurrent writes. An unknown selector
    /// yields an empty list.
    pub fn list_children(&self, selector: &[&str]) -> Vec<String> {
        match self.root.find_level(selector) {
            Some(level) => level.child_names(),
            None => Vec::new(),
        }
    }
}
