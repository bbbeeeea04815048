//! The metric schema: per-metric frequency, aggregation policy and the
//! dense slot offset assigned at store construction.

use crate::core::Float;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// How values from sibling sub-levels are combined when a query addresses
/// an inner level that does not store the metric itself. This is
/// aggregation over the hierarchy (cpus, sockets, ...), not over time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AggregationStrategy {
    #[default]
    None,
    Sum,
    Avg,
}

impl<'de> Deserialize<'de> for AggregationStrategy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<String>::deserialize(deserializer)?.as_deref() {
            None | Some("") => Ok(AggregationStrategy::None),
            Some("sum") => Ok(AggregationStrategy::Sum),
            Some("avg") => Ok(AggregationStrategy::Avg),
            Some(other) => Err(de::Error::custom(format!(
                "invalid aggregation strategy: {other:?}"
            ))),
        }
    }
}

impl Serialize for AggregationStrategy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AggregationStrategy::None => serializer.serialize_none(),
            AggregationStrategy::Sum => serializer.serialize_str("sum"),
            AggregationStrategy::Avg => serializer.serialize_str("avg"),
        }
    }
}

/// Per-metric configuration. The schema is fixed once the store is
/// constructed; `offset` indexes the dense buffer array of every level.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricConfig {
    /// Interval in seconds at which measurements arrive.
    pub frequency: i64,

    #[serde(default)]
    pub aggregation: AggregationStrategy,

    #[serde(skip)]
    pub(crate) offset: usize,
}

impl MetricConfig {
    pub fn new(frequency: i64, aggregation: AggregationStrategy) -> Self {
        Self {
            frequency,
            aggregation,
            offset: 0,
        }
    }
}

/// A single named sample as it arrives from the ingest path.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub value: Float,
}

impl Metric {
    pub fn new<S: Into<String>>(name: S, value: impl Into<Float>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
