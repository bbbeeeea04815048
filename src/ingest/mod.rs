//! Line-protocol ingestion.
//!
//! Lines look like `measurement,tag=v,... field=v,... unix_seconds`.
//! The tags place the sample in the hierarchy (cluster, host, and
//! optionally a device component like `cpu0` or `core1`); the fields
//! carry the values. A bad line is logged and dropped, the rest of the
//! batch keeps going.

use crate::core::{Metric, Result, StoreError};
use crate::storage::{Level, MemoryStore};
use dashmap::DashMap;
use std::sync::Arc;

/// One decoded line, borrowing from the raw input.
#[derive(Debug, PartialEq)]
pub struct Line<'a> {
    pub measurement: &'a str,
    pub tags: Vec<(&'a str, &'a str)>,
    pub fields: Vec<(&'a str, f64)>,
    pub ts: i64,
}

/// Parse a single line. Integer field values (`123i`) widen to float;
/// any other field kind fails the line.
pub fn parse_line(raw: &str) -> Result<Line<'_>> {
    let mut parts = raw.split_whitespace();
    let (Some(head), Some(fields_raw), Some(ts_raw), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(StoreError::decode("line format error"));
    };

    let mut head_parts = head.split(',');
    let measurement = head_parts.next().unwrap_or("");
    if measurement.is_empty() {
        return Err(StoreError::decode("line format error"));
    }

    let mut tags = Vec::new();
    for pair in head_parts {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| StoreError::decode("line format error"))?;
        tags.push((key, value));
    }

    let mut fields = Vec::new();
    for pair in fields_raw.split(',') {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| StoreError::decode("line format error"))?;
        fields.push((key, parse_field_value(value)?));
    }

    let ts: i64 = ts_raw
        .parse()
        .map_err(|_| StoreError::decode("invalid timestamp"))?;

    Ok(Line {
        measurement,
        tags,
        fields,
        ts,
    })
}

fn parse_field_value(raw: &str) -> Result<f64> {
    if let Some(int_part) = raw.strip_suffix('i') {
        if let Ok(value) = int_part.parse::<i64>() {
            return Ok(value as f64);
        }
    }
    raw.parse::<f64>()
        .map_err(|_| StoreError::decode(format!("unsupported field value: {raw:?}")))
}

/// Decodes line-protocol batches into store writes.
///
/// Resolved (cluster, host) level handles are cached so that streams
/// hammering the same hosts skip walking the top of the tree for every
/// line. Levels are never deleted, so cached handles stay valid.
pub struct LineDecoder {
    store: Arc<MemoryStore>,
    levels: DashMap<(String, String), Arc<Level>>,
}

impl LineDecoder {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            levels: DashMap::new(),
        }
    }

    /// Decode and write a batch of lines. `cluster_default` is used for
    /// lines without a cluster tag. Returns the number of lines
    /// written; bad lines are dropped with a warning.
    pub fn decode(&self, input: &str, cluster_default: &str) -> Result<usize> {
        let mut written = 0;
        for raw in input.lines() {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }

            match self.decode_line(raw, cluster_default) {
                Ok(()) => written += 1,
                Err(err) => tracing::warn!("dropping line ({}): {}", err, raw),
            }
        }
        Ok(written)
    }

    fn decode_line(&self, raw: &str, cluster_default: &str) -> Result<()> {
        let line = parse_line(raw)?;

        let mut cluster = cluster_default;
        let mut host = "";
        let mut type_name = "";
        let mut type_id = "";
        let mut subtype = "";
        let mut subtype_id = "";
        for (key, value) in &line.tags {
            match *key {
                "cluster" => cluster = value,
                "hostname" | "host" => host = value,
                "type" => type_name = value,
                "type-id" => type_id = value,
                "subtype" => subtype = value,
                "stype-id" => subtype_id = value,
                // Unknown tags are ignored.
                _ => {},
            }
        }

        if cluster.is_empty() {
            return Err(StoreError::decode("missing cluster tag"));
        }
        if host.is_empty() {
            return Err(StoreError::decode("missing hostname tag"));
        }

        // "node" means the sample belongs to the host itself.
        let mut suffix = Vec::new();
        if !type_name.is_empty() && type_name != "node" {
            suffix.push(format!("{type_name}{type_id}"));
            if !subtype.is_empty() {
                suffix.push(format!("{subtype}{subtype_id}"));
            }
        }

        let metrics: Vec<Metric> = if line.measurement == "data" {
            line.fields
                .iter()
                .map(|(name, value)| Metric::new(*name, *value))
                .collect()
        } else {
            let value = line
                .fields
                .iter()
                .find(|(name, _)| *name == "value")
                .ok_or_else(|| StoreError::decode("missing value field"))?
                .1;
            vec![Metric::new(line.measurement, value)]
        };

        let level = self.host_level(cluster, host);
        let suffix: Vec<&str> = suffix.iter().map(String::as_str).collect();
        self.store.write_to_level(&level, &suffix, line.ts, &metrics)
    }

    fn host_level(&self, cluster: &str, host: &str) -> Arc<Level> {
        let key = (cluster.to_string(), host.to_string());
        if let Some(level) = self.levels.get(&key) {
            return Arc::clone(&level);
        }

        let level = self.store.get_level(&[cluster, host]);
        self.levels.insert(key, Arc::clone(&level));
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AggregationStrategy, MetricConfig};
    use crate::storage::path_selector;
    use std::collections::HashMap;

    const NODE_LINE: &str = "node,host=lousxps,cluster=test \
        mem_used=4692.252,proc_total=1083,load_five=0.91,cpu_user=1.424336e+06,\
        mem_free=4537.956,proc_run=2,swap_total=0,load_one=0.84 1629356936";

    #[test]
    fn test_parse_node_line() {
        let line = parse_line(NODE_LINE).unwrap();
        assert_eq!(line.measurement, "node");
        assert_eq!(line.ts, 1629356936);
        assert_eq!(line.tags, vec![("host", "lousxps"), ("cluster", "test")]);
        assert_eq!(line.fields.len(), 8);
        assert_eq!(line.fields[0], ("mem_used", 4692.252));
        assert_eq!(line.fields[3], ("cpu_user", 1.424336e+06));
        assert_eq!(line.fields[6], ("swap_total", 0.0));
    }

    #[test]
    fn test_parse_integer_fields_widen() {
        let line = parse_line("cpu_load,host=h value=42i 100").unwrap();
        assert_eq!(line.fields, vec![("value", 42.0)]);
    }

    #[test]
    fn test_parse_rejects_other_field_kinds() {
        assert!(parse_line("m,host=h value=\"hello\" 100").is_err());
        assert!(parse_line("m,host=h value=true 100").is_err());
        assert!(parse_line("m,host=h 100").is_err());
        assert!(parse_line("not a line protocol payload at all").is_err());
    }

    fn test_store() -> Arc<MemoryStore> {
        let mut metrics = HashMap::new();
        metrics.insert(
            "cpu_load".to_string(),
            MetricConfig::new(60, AggregationStrategy::Avg),
        );
        metrics.insert(
            "mem_used".to_string(),
            MetricConfig::new(60, AggregationStrategy::None),
        );
        Arc::new(MemoryStore::new(metrics).unwrap())
    }

    #[test]
    fn test_decode_data_measurement() {
        let store = test_store();
        let decoder = LineDecoder::new(Arc::clone(&store));

        let written = decoder
            .decode(
                "data,cluster=emmy,hostname=host1 cpu_load=1.5,mem_used=100,bogus=1 120\n",
                "",
            )
            .unwrap();
        assert_eq!(written, 1);

        let (data, from, _, _) = store
            .read(&path_selector(&["emmy", "host1"]), "cpu_load", 120, 180, 0)
            .unwrap();
        assert_eq!(from, 120);
        assert_eq!(data[0].0, 1.5);
    }

    #[test]
    fn test_decode_measurement_as_metric_with_type() {
        let store = test_store();
        let decoder = LineDecoder::new(Arc::clone(&store));

        decoder
            .decode(
                "cpu_load,cluster=emmy,hostname=host1,type=cpu,type-id=7 value=3.0 120",
                "",
            )
            .unwrap();

        let (data, _, _, _) = store
            .read(
                &path_selector(&["emmy", "host1", "cpu7"]),
                "cpu_load",
                120,
                180,
                0,
            )
            .unwrap();
        assert_eq!(data[0].0, 3.0);
    }

    #[test]
    fn test_decode_cluster_default_and_node_type() {
        let store = test_store();
        let decoder = LineDecoder::new(Arc::clone(&store));

        decoder
            .decode("cpu_load,hostname=host1,type=node value=2.0 60", "fallback")
            .unwrap();

        let (data, _, _, _) = store
            .read(&path_selector(&["fallback", "host1"]), "cpu_load", 60, 120, 0)
            .unwrap();
        assert_eq!(data[0].0, 2.0);
    }

    #[test]
    fn test_bad_lines_do_not_stop_the_batch() {
        let store = test_store();
        let decoder = LineDecoder::new(Arc::clone(&store));

        let written = decoder
            .decode(
                "garbage\ncpu_load,cluster=c,hostname=h value=1.0 60\nm,hostname=h value=x 60\n",
                "",
            )
            .unwrap();
        assert_eq!(written, 1);
    }
}
