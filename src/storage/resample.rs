//! Downsampling for presentation: largest-triangle-three-bucket.
//!
//! LTTB keeps the visually significant points of a series. It is only
//! applied on the way out of a query; stored data always stays at the
//! native frequency.

use crate::core::{Float, Result, StoreError, NAN};

/// Downsample `data` from `old_frequency` to `new_frequency` seconds per
/// point. Returns the data and the frequency actually achieved: short
/// series and non-coarsening requests pass through unchanged. The new
/// frequency must be a multiple of the old one.
pub fn largest_triangle_three_bucket(
    data: Vec<Float>,
    old_frequency: i64,
    new_frequency: i64,
) -> Result<(Vec<Float>, i64)> {
    if old_frequency == 0 || new_frequency == 0 || new_frequency <= old_frequency {
        return Ok((data, old_frequency));
    }

    if new_frequency % old_frequency != 0 {
        return Err(StoreError::Resample(format!(
            "new frequency {new_frequency} must be a multiple of the old frequency {old_frequency}"
        )));
    }

    let step = (new_frequency / old_frequency) as usize;
    let new_len = data.len() / step;
    if new_len < 3 || data.len() < 100 {
        return Ok((data, old_frequency));
    }

    let mut out = Vec::with_capacity(new_len);
    out.push(data[0]);

    // Selected point of the previous bucket, as (x, y).
    let mut prev = (0.0f64, data[0].to_f64());

    for bucket in 1..new_len - 1 {
        let range = bucket * step..(data.len()).min((bucket + 1) * step);
        let next_range = (bucket + 1) * step..(data.len()).min((bucket + 2) * step);
        let (next_x, next_y) = average_point(&data[next_range.clone()], next_range.start);

        let mut best_idx = range.start;
        let mut best_area = f64::NEG_INFINITY;
        for i in range {
            let area = triangle_area(prev, (i as f64, data[i].to_f64()), (next_x, next_y));
            if area > best_area {
                best_area = area;
                best_idx = i;
            }
        }

        out.push(data[best_idx]);
        prev = (best_idx as f64, data[best_idx].to_f64());
    }

    out.push(data[data.len() - 1]);
    Ok((out, new_frequency))
}

fn triangle_area(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (((a.0 - c.0) * (b.1 - a.1) - (a.0 - b.0) * (c.1 - a.1)) * 0.5).abs()
}

/// The average point of a bucket. A bucket containing any missing value
/// averages to NaN so that gaps stay visible after downsampling.
fn average_point(points: &[Float], x_start: usize) -> (f64, f64) {
    let mut x = 0.0;
    let mut y = 0.0;
    let mut has_nan = false;
    for (i, point) in points.iter().enumerate() {
        x += (x_start + i) as f64;
        y += point.to_f64();
        if point.is_nan() {
            has_nan = true;
        }
    }

    let len = points.len().max(1) as f64;
    if has_nan {
        (x / len, NAN.to_f64())
    } else {
        (x / len, y / len)
    }
}
