/// Pairwise similarity kernels.
///
/// Each kernel compares two series (or two feature vectors) and knows
/// nothing about asset identifiers; `similarity_service` attaches those when
/// turning a `MetricError` into a `ClusteringError`.

#[derive(Debug, Clone, PartialEq)]
pub enum MetricError {
    LengthMismatch { len_a: usize, len_b: usize },
    Undefined(String),
}

/// Pearson correlation of two aligned series.
pub fn pearson(a: &[f64], b: &[f64]) -> Result<f64, MetricError> {
    if a.len() != b.len() {
        return Err(MetricError::LengthMismatch {
            len_a: a.len(),
            len_b: b.len(),
        });
    }
    if a.len() < 2 {
        return Err(MetricError::Undefined("fewer than two observations".to_string()));
    }

    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    if var_a <= f64::EPSILON * f64::EPSILON || var_b <= f64::EPSILON * f64::EPSILON {
        return Err(MetricError::Undefined("zero variance".to_string()));
    }
    Ok((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}

/// Equal-frequency bin index of every value.
///
/// Values are ranked ascending with ties broken by position, and rank `r`
/// falls into bin `r * bins / n`.
pub fn equal_frequency_bins(values: &[f64], bins: usize) -> Vec<usize> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]).then(i.cmp(&j)));

    let mut out = vec![0; n];
    for (rank, &idx) in order.iter().enumerate() {
        out[idx] = rank * bins / n;
    }
    out
}

/// Empirical mutual information in nats of two aligned series.
pub fn mutual_information(a: &[f64], b: &[f64], bins: usize) -> Result<f64, MetricError> {
    if a.len() != b.len() {
        return Err(MetricError::LengthMismatch {
            len_a: a.len(),
            len_b: b.len(),
        });
    }
    if a.len() < 2 || bins < 2 {
        return Err(MetricError::Undefined("not enough observations to bin".to_string()));
    }

    let n = a.len();
    let bins_a = equal_frequency_bins(a, bins);
    let bins_b = equal_frequency_bins(b, bins);

    let mut joint = vec![0usize; bins * bins];
    let mut marginal_a = vec![0usize; bins];
    let mut marginal_b = vec![0usize; bins];
    for (&x, &y) in bins_a.iter().zip(bins_b.iter()) {
        joint[x * bins + y] += 1;
        marginal_a[x] += 1;
        marginal_b[y] += 1;
    }

    let total = n as f64;
    let mut mi = 0.0;
    for x in 0..bins {
        for y in 0..bins {
            let count = joint[x * bins + y];
            if count == 0 {
                continue;
            }
            let p_xy = count as f64 / total;
            let p_x = marginal_a[x] as f64 / total;
            let p_y = marginal_b[y] as f64 / total;
            mi += p_xy * (p_xy / (p_x * p_y)).ln();
        }
    }
    Ok(mi.max(0.0))
}

/// Cosine similarity of two feature vectors.
pub fn cosine(a: &[f64], b: &[f64]) -> Result<f64, MetricError> {
    if a.len() != b.len() {
        return Err(MetricError::LengthMismatch {
            len_a: a.len(),
            len_b: b.len(),
        });
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return Err(MetricError::Undefined("zero-norm feature vector".to_string()));
    }
    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Dynamic time warping distance with a Sakoe-Chiba band of half-width `window`.
///
/// Cost is the absolute difference of aligned values. Series whose lengths
/// differ by more than `window` have no admissible path.
pub fn dtw_distance(a: &[f64], b: &[f64], window: usize) -> Result<f64, MetricError> {
    let n = a.len();
    let m = b.len();
    if n.abs_diff(m) > window {
        return Err(MetricError::LengthMismatch { len_a: n, len_b: m });
    }
    if n == 0 {
        return Err(MetricError::Undefined("empty series".to_string()));
    }

    let mut prev = vec![f64::INFINITY; m + 1];
    let mut curr = vec![f64::INFINITY; m + 1];
    prev[0] = 0.0;

    for i in 1..=n {
        curr.fill(f64::INFINITY);
        let lo = i.saturating_sub(window).max(1);
        let hi = (i + window).min(m);
        for j in lo..=hi {
            let cost = (a[i - 1] - b[j - 1]).abs();
            let best = prev[j].min(curr[j - 1]).min(prev[j - 1]);
            curr[j] = cost + best;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let distance = prev[m];
    if distance.is_finite() {
        Ok(distance)
    } else {
        Err(MetricError::Undefined("no warping path inside the band".to_string()))
    }
}

/// Z-score with population standard deviation; a constant series maps to zeros.
pub fn zscore(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std <= f64::EPSILON {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - mean) / std).collect()
}

/// `1 / (1 + d)`: distance 0 maps to 1, large distances approach 0.
pub fn distance_to_similarity(distance: f64) -> f64 {
    1.0 / (1.0 + distance)
}

pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pearson_perfect_and_inverse() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![2.0, 4.0, 6.0, 8.0];
        let c = vec![4.0, 3.0, 2.0, 1.0];
        assert!((pearson(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&a, &c).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&a, &b).unwrap(), pearson(&b, &a).unwrap());
    }

    #[test]
    fn test_pearson_errors() {
        assert!(matches!(
            pearson(&[1.0, 2.0], &[1.0, 2.0, 3.0]),
            Err(MetricError::LengthMismatch { len_a: 2, len_b: 3 })
        ));
        assert!(matches!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), Err(MetricError::Undefined(_))));
    }

    #[test]
    fn test_equal_frequency_bins_break_ties_by_position() {
        let bins = equal_frequency_bins(&[0.5, 0.5, 0.1, 0.9], 2);
        // ranks: 0.1 -> 0, first 0.5 -> 1, second 0.5 -> 2, 0.9 -> 3
        assert_eq!(bins, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_mutual_information_symmetric_and_maximal_for_identical() {
        let a: Vec<f64> = (0..100).map(|i| ((i * 37) % 100) as f64).collect();
        let b: Vec<f64> = (0..100).map(|i| ((i * 53) % 100) as f64).collect();
        let ab = mutual_information(&a, &b, 10).unwrap();
        let ba = mutual_information(&b, &a, 10).unwrap();
        assert!((ab - ba).abs() < 1e-12);

        let aa = mutual_information(&a, &a, 10).unwrap();
        assert!((aa - (10.0_f64).ln()).abs() < 1e-9);
        assert!(aa > ab);
    }

    #[test]
    fn test_cosine_zero_norm_is_undefined() {
        assert!(matches!(cosine(&[0.0, 0.0], &[1.0, 2.0]), Err(MetricError::Undefined(_))));
        assert!((cosine(&[1.0, 0.0], &[0.0, 1.0]).unwrap()).abs() < 1e-12);
    }

    #[test]
    fn test_dtw_identical_and_shifted() {
        let a = vec![0.0, 1.0, 2.0, 1.0, 0.0];
        assert_eq!(dtw_distance(&a, &a, 2).unwrap(), 0.0);

        let shifted = vec![0.0, 0.0, 1.0, 2.0, 1.0];
        // Warping absorbs a one-step lag except for the trailing value.
        let d = dtw_distance(&a, &shifted, 1).unwrap();
        assert!(d < 1.0 + 1e-12);
        assert_eq!(dtw_distance(&a, &shifted, 1).unwrap(), dtw_distance(&shifted, &a, 1).unwrap());
    }

    #[test]
    fn test_dtw_band_rejects_large_length_difference() {
        let a = vec![1.0; 10];
        let b = vec![1.0; 4];
        assert!(matches!(dtw_distance(&a, &b, 3), Err(MetricError::LengthMismatch { .. })));
        assert!(dtw_distance(&a, &b, 6).is_ok());
    }

    #[test]
    fn test_zscore_constant_series() {
        assert_eq!(zscore(&[3.0, 3.0]), vec![0.0, 0.0]);
        let z = zscore(&[1.0, 3.0]);
        assert_eq!(z, vec![-1.0, 1.0]);
    }
}
