//! Order statistics over sample values.
//!
//! All functions ignore ordering of the input and return `None` for an empty
//! slice instead of producing `NaN`.

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut values = values.to_vec();
    values.sort_by(|a, b| a.total_cmp(b));
    values
}

/// Median of the values; the mean of the two middle values for an even count.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let sorted = sorted(values);
    let mid = sorted.len() / 2;

    if sorted.len() % 2 == 0 {
        mean(&sorted[mid - 1..=mid])
    } else {
        Some(sorted[mid])
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Mean absolute difference between consecutive values, in sample order.
///
/// Needs at least two values.
pub fn jitter(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }

    let diffs: Vec<f64> =
        values.windows(2).map(|pair| (pair[0] - pair[1]).abs()).collect();

    mean(&diffs)
}
