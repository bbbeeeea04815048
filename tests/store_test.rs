//! End-to-end tests of the storage engine: write/read round trips, gap
//! padding, hierarchy aggregation, statistics, retention and
//! concurrency.

use gridstore_lib::core::{AggregationStrategy, Float, Metric, MetricConfig, StoreError};
use gridstore_lib::storage::{path_selector, MemoryStore, SelectorElement, BUFFER_CAP};
use std::collections::HashMap;
use std::sync::Arc;

fn new_store(metrics: &[(&str, i64, AggregationStrategy)]) -> MemoryStore {
    let mut schema = HashMap::new();
    for (name, frequency, aggregation) in metrics {
        schema.insert(
            (*name).to_string(),
            MetricConfig::new(*frequency, *aggregation),
        );
    }
    MemoryStore::new(schema).unwrap()
}

#[test]
fn test_basics() {
    let frequency = 3;
    let count = 5000i64;
    let store = new_store(&[
        ("a", frequency, AggregationStrategy::None),
        ("b", frequency * 2, AggregationStrategy::None),
    ]);

    for i in 0..count {
        store
            .write(
                &["testhost"],
                i * frequency,
                &[Metric::new("a", i as f32)],
            )
            .unwrap();
    }
    for i in 0..count / 2 {
        store
            .write(
                &["testhost"],
                i * frequency * 2,
                &[Metric::new("b", 0.5 + i as f32)],
            )
            .unwrap();
    }

    let sel = path_selector(&["testhost"]);
    let (adata, from, to, _) = store.read(&sel, "a", 0, count * frequency, 0).unwrap();
    assert_eq!(from, 0);
    assert_eq!(to, count * frequency);
    assert_eq!(adata.len(), count as usize);
    for (i, value) in adata.iter().enumerate() {
        assert_eq!(*value, Float(i as f32), "wrong value for a at {i}");
    }

    let (bdata, _, _, _) = store.read(&sel, "b", 0, count * frequency, 0).unwrap();
    assert_eq!(bdata.len(), (count / 2) as usize);
    for (i, value) in bdata.iter().enumerate() {
        assert_eq!(*value, Float(0.5 + i as f32), "wrong value for b at {i}");
    }
}

#[test]
fn test_capacity_spill() {
    let frequency = 10;
    let count = (BUFFER_CAP * 3 + 10) as i64;
    let start = 100;
    let store = new_store(&[
        ("a", frequency, AggregationStrategy::None),
        ("b", frequency * 2, AggregationStrategy::None),
    ]);

    for i in 0..count {
        store
            .write(
                &["test"],
                start + i * frequency,
                &[
                    Metric::new("a", i as f32),
                    Metric::new("b", (i / 2) as f32),
                ],
            )
            .unwrap();
    }

    let end = start + count * frequency;
    let sel = path_selector(&["test"]);

    let (data, from, to, _) = store.read(&sel, "a", start, end, 0).unwrap();
    assert_eq!((from, to), (start, end));
    assert_eq!(data.len(), count as usize);
    for (i, value) in data.iter().enumerate() {
        assert_eq!(*value, Float(i as f32));
    }

    let (data, from, to, _) = store.read(&sel, "b", start, end, 0).unwrap();
    assert_eq!((from, to), (start, end));
    assert_eq!(data.len(), (count / 2) as usize);
}

#[test]
fn test_missing_datapoints() {
    let count = 3000usize;
    let store = new_store(&[("a", 1, AggregationStrategy::None)]);

    for i in 0..count {
        if i % 3 != 0 {
            continue;
        }
        store
            .write(&["testhost"], i as i64, &[Metric::new("a", i as f32)])
            .unwrap();
    }

    let sel = path_selector(&["testhost"]);
    let (adata, _, _, _) = store.read(&sel, "a", 0, count as i64, 0).unwrap();

    // The data ends at the last written slot (2997).
    assert_eq!(adata.len(), count - 2);
    for (i, value) in adata.iter().enumerate() {
        if i % 3 == 0 {
            assert_eq!(*value, Float(i as f32));
        } else {
            assert!(value.is_nan(), "expected NaN at {i}, got {value}");
        }
    }
}

#[test]
fn test_aggregation_sum() {
    let count = 3000i64;
    let store = new_store(&[("a", 1, AggregationStrategy::Sum)]);

    for i in 0..count {
        store
            .write(&["host0", "cpu0"], i, &[Metric::new("a", i as f32 / 2.0)])
            .unwrap();
        store
            .write(&["host0", "cpu1"], i, &[Metric::new("a", i as f32 * 2.0)])
            .unwrap();
    }

    let (adata, from, to, _) = store
        .read(&path_selector(&["host0"]), "a", 0, count, 0)
        .unwrap();
    assert_eq!((from, to), (0, count));
    assert_eq!(adata.len(), count as usize);
    for (i, value) in adata.iter().enumerate() {
        let expected = i as f32 / 2.0 + i as f32 * 2.0;
        assert_eq!(*value, Float(expected), "wrong aggregate at {i}");
    }
}

#[test]
fn test_aggregation_avg() {
    let store = new_store(&[("a", 1, AggregationStrategy::Avg)]);
    for i in 0..100 {
        store
            .write(&["h", "gpu0"], i, &[Metric::new("a", 1.0f32)])
            .unwrap();
        store
            .write(&["h", "gpu1"], i, &[Metric::new("a", 3.0f32)])
            .unwrap();
    }

    let (data, _, _, _) = store.read(&path_selector(&["h"]), "a", 0, 100, 0).unwrap();
    for value in &data {
        assert_eq!(*value, Float(2.0));
    }
}

#[test]
fn test_aggregation_none_fails_for_multiple_chains() {
    let store = new_store(&[("a", 1, AggregationStrategy::None)]);
    for i in 0..10 {
        store
            .write(&["h", "cpu0"], i, &[Metric::new("a", 1.0f32)])
            .unwrap();
        store
            .write(&["h", "cpu1"], i, &[Metric::new("a", 2.0f32)])
            .unwrap();
    }

    assert!(matches!(
        store.read(&path_selector(&["h"]), "a", 0, 10, 0),
        Err(StoreError::InvalidAggregation)
    ));
}

#[test]
fn test_selector_group_and_wildcard_equivalence() {
    let store = new_store(&[("a", 1, AggregationStrategy::Sum)]);
    for i in 0..200 {
        for cpu in ["cpu0", "cpu1", "cpu2"] {
            store
                .write(&["c", "h", cpu], i, &[Metric::new("a", i as f32)])
                .unwrap();
        }
    }

    let group = vec![
        SelectorElement::String("c".to_string()),
        SelectorElement::String("h".to_string()),
        SelectorElement::Group(vec![
            "cpu0".to_string(),
            "cpu1".to_string(),
            "cpu2".to_string(),
        ]),
    ];
    let wildcard = vec![
        SelectorElement::String("c".to_string()),
        SelectorElement::String("h".to_string()),
        SelectorElement::Any,
    ];

    let (gdata, gfrom, gto, _) = store.read(&group, "a", 0, 200, 0).unwrap();
    let (wdata, wfrom, wto, _) = store.read(&wildcard, "a", 0, 200, 0).unwrap();
    assert_eq!((gfrom, gto), (wfrom, wto));
    assert_eq!(gdata, wdata);

    // The group aggregate equals the sum of the members read separately.
    for (i, value) in gdata.iter().enumerate() {
        let mut sum = 0.0f32;
        for cpu in ["cpu0", "cpu1", "cpu2"] {
            let (single, _, _, _) = store
                .read(&path_selector(&["c", "h", cpu]), "a", 0, 200, 0)
                .unwrap();
            sum += single[i].0;
        }
        assert_eq!(value.0, sum);
    }
}

#[test]
fn test_out_of_bounds_reads() {
    let count = 2000i64;
    let toffset = 1000i64;
    let store = new_store(&[("a", 60, AggregationStrategy::None)]);

    for i in 0..count {
        store
            .write(
                &["cluster", "host", "cpu"],
                toffset + i * 60,
                &[Metric::new("a", i as f32)],
            )
            .unwrap();
    }

    let sel = path_selector(&["cluster", "host", "cpu"]);

    let (data, from, to, _) = store
        .read(&sel, "a", 500, toffset + count * 60 + 500, 0)
        .unwrap();
    assert_eq!(from / 60, toffset / 60);
    assert_eq!(to / 60, (toffset + count * 60) / 60);
    assert_eq!(data.len(), count as usize);
    assert_eq!(data[0], Float(0.0));
    assert_eq!(data[data.len() - 1], Float((count - 1) as f32));

    // Entirely after the data
    let test_from = 100_000_000i64;
    let (data, from, to, _) = store.read(&sel, "a", test_from, test_from + 10_000, 0).unwrap();
    assert!(data.is_empty());
    assert_eq!((from, to), (test_from, test_from));

    // Entirely before the data
    let (data, from, to, _) = store.read(&sel, "a", 0, 10, 0).unwrap();
    assert!(data.is_empty());
    assert_eq!(from / 60, toffset / 60);
    assert_eq!(to / 60, toffset / 60);
}

#[test]
fn test_stats() {
    let count = 3000i64;
    let store = new_store(&[
        ("a", 1, AggregationStrategy::None),
        ("b", 1, AggregationStrategy::Avg),
    ]);

    let mut samples = 0usize;
    let (mut asum, mut amin, mut amax) = (0.0f64, f64::INFINITY, f64::NEG_INFINITY);
    let (mut bsum, mut bmin, mut bmax) = (0.0f64, f64::INFINITY, f64::NEG_INFINITY);

    for i in 0..count {
        if i % 5 == 0 {
            // Skip some writes so the sample count is meaningful.
            continue;
        }

        samples += 1;
        let a = (rand::random::<i64>().rem_euclid(100) - 50) as f64;
        asum += a;
        amin = amin.min(a);
        amax = amax.max(a);
        let b = (rand::random::<i64>().rem_euclid(100) - 50) as f64;
        bsum += b * 2.0;
        bmin = bmin.min(b);
        bmax = bmax.max(b);

        store
            .write(&["cluster", "host1"], i, &[Metric::new("a", a)])
            .unwrap();
        store
            .write(&["cluster", "host2", "left"], i, &[Metric::new("b", b)])
            .unwrap();
        store
            .write(&["cluster", "host2", "right"], i, &[Metric::new("b", b)])
            .unwrap();
    }

    let (stats, from, to) = store
        .stats(&path_selector(&["cluster", "host1"]), "a", 0, count)
        .unwrap();
    assert_eq!((from, to), (1, count));
    assert_eq!(stats.samples, samples);
    assert_eq!(stats.avg, Float::from(asum / samples as f64));
    assert_eq!(stats.min, Float::from(amin));
    assert_eq!(stats.max, Float::from(amax));

    // Two contributing chains double the sample count; avg-aggregation
    // divides the averaged averages back down to the underlying mean.
    let (stats, from, to) = store
        .stats(&path_selector(&["cluster", "host2"]), "b", 0, count)
        .unwrap();
    assert_eq!((from, to), (1, count));
    assert_eq!(stats.samples, samples * 2);
    assert_eq!(stats.avg, Float::from(bsum / (samples * 2) as f64));
    assert_eq!(stats.min, Float::from(bmin));
    assert_eq!(stats.max, Float::from(bmax));
}

#[test]
fn test_free() {
    let store = new_store(&[
        ("a", 1, AggregationStrategy::None),
        ("b", 2, AggregationStrategy::None),
    ]);

    let count = 3000i64;
    for i in 0..count {
        store
            .write(
                &["cluster", "host", "1"],
                i,
                &[Metric::new("a", i as f32), Metric::new("b", i as f32)],
            )
            .unwrap();
    }

    let freed = store
        .free(&["cluster", "host"], (BUFFER_CAP * 2) as i64 + 100)
        .unwrap();
    assert_eq!(freed, 3);

    let (adata, from, to, _) = store
        .read(&path_selector(&["cluster", "host", "1"]), "a", 0, count, 0)
        .unwrap();
    assert_eq!(from, (BUFFER_CAP * 2) as i64);
    assert_eq!(to, count);
    assert_eq!(adata.len(), count as usize - 2 * BUFFER_CAP);
    assert_eq!(adata[0], Float((BUFFER_CAP * 2) as f32));
    assert_eq!(adata[adata.len() - 1], Float((count - 1) as f32));

    // Data newer than the horizon is unchanged, older data is gone.
    let size_before = store.size_in_bytes();
    assert!(size_before > 0);
}

#[test]
fn test_free_reduces_size() {
    let store = new_store(&[("a", 1, AggregationStrategy::None)]);
    for i in 0..(BUFFER_CAP as i64 * 4) {
        store
            .write(&["c", "h"], i, &[Metric::new("a", 1.0f32)])
            .unwrap();
    }

    let before = store.size_in_bytes();
    let freed = store.free(&[], BUFFER_CAP as i64 * 2).unwrap();
    assert!(freed > 0);
    assert!(store.size_in_bytes() < before);
}

#[test]
fn test_unknown_metric() {
    let store = new_store(&[("a", 1, AggregationStrategy::None)]);

    // Unknown samples are dropped, the write succeeds.
    store
        .write(
            &["h"],
            0,
            &[Metric::new("a", 1.0f32), Metric::new("nope", 2.0f32)],
        )
        .unwrap();

    assert!(matches!(
        store.read(&path_selector(&["h"]), "nope", 0, 10, 0),
        Err(StoreError::UnknownMetric(_))
    ));
}

#[test]
fn test_invalid_range_and_missing_host() {
    let store = new_store(&[("a", 1, AggregationStrategy::None)]);
    store
        .write(&["h"], 0, &[Metric::new("a", 1.0f32)])
        .unwrap();

    assert!(matches!(
        store.read(&path_selector(&["h"]), "a", 100, 50, 0),
        Err(StoreError::InvalidRange { .. })
    ));
    assert!(matches!(
        store.read(&path_selector(&["elsewhere"]), "a", 0, 10, 0),
        Err(StoreError::NoData)
    ));
}

#[test]
fn test_write_from_past() {
    let store = new_store(&[("a", 1, AggregationStrategy::None)]);
    store
        .write(&["h"], 10_000, &[Metric::new("a", 1.0f32)])
        .unwrap();

    assert!(matches!(
        store.write(&["h"], 5, &[Metric::new("a", 2.0f32)]),
        Err(StoreError::WriteFromPast)
    ));
}

#[test]
fn test_list_children() {
    let store = new_store(&[("a", 1, AggregationStrategy::None)]);
    for host in ["host1", "host2", "host3"] {
        store
            .write(&["emmy", host], 0, &[Metric::new("a", 1.0f32)])
            .unwrap();
    }

    let mut children = store.list_children(&["emmy"]);
    children.sort();
    assert_eq!(children, vec!["host1", "host2", "host3"]);

    assert!(store.list_children(&["nonexistent"]).is_empty());
}

#[test]
fn test_read_with_resolution() {
    let frequency = 3;
    let count = 5000i64;
    let store = new_store(&[("a", frequency, AggregationStrategy::None)]);
    for i in 0..count {
        store
            .write(&["h"], i * frequency, &[Metric::new("a", i as f32)])
            .unwrap();
    }

    let (data, _, _, resolution) = store
        .read(&path_selector(&["h"]), "a", 0, count * frequency, frequency * 2)
        .unwrap();
    assert_eq!(resolution, frequency * 2);
    assert_eq!(data.len(), (count / 2) as usize);
}

#[test]
fn test_concurrent_disjoint_writers() {
    let frequency = 5i64;
    let count = 2000i64;
    let store = Arc::new(new_store(&[("a", frequency, AggregationStrategy::None)]));

    let mut handles = Vec::new();
    for g in 0..4 {
        let store = Arc::clone(&store);
        handles.push(std::thread::spawn(move || {
            let host = format!("host{g}");
            for i in 0..count {
                store
                    .write(
                        &["cluster", &host, "cpu0"],
                        i * frequency,
                        &[Metric::new("a", i as f32)],
                    )
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for g in 0..4 {
        let host = format!("host{g}");
        let sel = path_selector(&["cluster", &host, "cpu0"]);
        let (data, _, _, _) = store.read(&sel, "a", 0, count * frequency, 0).unwrap();
        assert_eq!(data.len(), count as usize);
        for (i, value) in data.iter().enumerate() {
            assert_eq!(*value, Float(i as f32), "torn read for {host} at {i}");
        }
    }
}
