/// Feature matrix construction
///
/// Turns each asset's series into a fixed-width vector of statistics. Assets
/// that cannot produce every configured statistic are excluded from the run
/// (never zero-filled) and reported back to the caller.

use ndarray::{Array2, ArrayView1, Axis};
use tracing::{debug, info, warn};

use crate::errors::ClusteringError;
use crate::models::asset::{Asset, SeriesKind, Universe};
use crate::models::config::{FeatureConfig, FeatureStatistic};
use crate::models::report::ExcludedAsset;
use crate::services::indicators;

/// Assets × features, rows in universe order.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    asset_ids: Vec<String>,
    feature_names: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn new(asset_ids: Vec<String>, feature_names: Vec<String>, values: Array2<f64>) -> Result<Self, ClusteringError> {
        if values.nrows() != asset_ids.len() || values.ncols() != feature_names.len() {
            return Err(ClusteringError::InvalidConfig(format!(
                "feature matrix shape {:?} does not match {} assets x {} features",
                values.dim(),
                asset_ids.len(),
                feature_names.len()
            )));
        }
        Ok(Self {
            asset_ids,
            feature_names,
            values,
        })
    }

    pub fn asset_ids(&self) -> &[String] {
        &self.asset_ids
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_assets(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    pub fn row(&self, idx: usize) -> ArrayView1<'_, f64> {
        self.values.row(idx)
    }

    /// Columns scaled to zero mean and unit population variance. A constant
    /// column becomes all zeros.
    pub fn standardized(&self) -> Array2<f64> {
        let mut out = self.values.clone();
        for mut column in out.axis_iter_mut(Axis(1)) {
            let n = column.len() as f64;
            if n == 0.0 {
                continue;
            }
            let mean = column.sum() / n;
            let std = (column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
            column.mapv_inplace(|v| if std > f64::EPSILON { (v - mean) / std } else { 0.0 });
        }
        out
    }
}

/// Result of building features: the matrix plus every excluded asset.
#[derive(Debug, Clone)]
pub struct FeatureBuild {
    pub matrix: FeatureMatrix,
    pub excluded: Vec<ExcludedAsset>,
}

/// Minimum observation count an asset needs for `stat`.
pub fn min_observations(stat: &FeatureStatistic, kind: SeriesKind) -> usize {
    // Returns lose one observation when derived from prices.
    let offset = match kind {
        SeriesKind::Price => 1,
        SeriesKind::Return => 0,
    };
    let from_returns = |n: usize| n + offset;

    match stat {
        FeatureStatistic::MeanReturn => from_returns(1),
        FeatureStatistic::Volatility => from_returns(2),
        FeatureStatistic::Skewness => from_returns(3),
        FeatureStatistic::Kurtosis => from_returns(4),
        FeatureStatistic::Autocorrelation { lag } => from_returns(lag + 2),
        FeatureStatistic::Momentum { window } => from_returns(*window),
        FeatureStatistic::MaxDrawdown => 2,
        FeatureStatistic::MovingAverageRatio { window, .. } => *window,
        FeatureStatistic::Rsi { window, .. } => window + 1,
        FeatureStatistic::MacdHistogram { slow, signal, .. } => slow + signal - 1,
        FeatureStatistic::BollingerBandwidth { window, .. }
        | FeatureStatistic::BollingerPercentB { window, .. } => *window,
    }
}

/// Build one feature vector per asset.
///
/// # Arguments
/// * `universe` - Assets sorted by identifier
/// * `config` - Statistics to compute, in column order
/// * `kind` - Whether observation values are prices or returns
///
/// # Returns
/// The feature matrix over the assets that produced every statistic, and the
/// excluded assets with their reasons.
pub fn build_feature_matrix(
    universe: &Universe,
    config: &FeatureConfig,
    kind: SeriesKind,
) -> Result<FeatureBuild, ClusteringError> {
    let feature_names: Vec<String> = config.statistics.iter().map(FeatureStatistic::name).collect();
    let required = config
        .statistics
        .iter()
        .map(|s| min_observations(s, kind))
        .max()
        .unwrap_or(0);

    let lengths: Vec<usize> = universe.assets().iter().map(Asset::len).collect();
    if let (Some(min), Some(max)) = (lengths.iter().min(), lengths.iter().max()) {
        if min != max {
            warn!(
                "⚠️ Series lengths differ across the universe ({}..={}); alignment is expected upstream",
                min, max
            );
        }
    }

    let mut ids = Vec::new();
    let mut rows: Vec<f64> = Vec::new();
    let mut excluded = Vec::new();

    for asset in universe.assets() {
        match asset_features(asset, &config.statistics, kind, required) {
            Ok(features) => {
                ids.push(asset.id.clone());
                rows.extend(features);
            }
            Err(e) => {
                warn!("Excluding {} from the run: {}", asset.id, e);
                excluded.push(ExcludedAsset {
                    asset: asset.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let values = Array2::from_shape_vec((ids.len(), feature_names.len()), rows)
        .map_err(|e| ClusteringError::InvalidConfig(e.to_string()))?;

    info!(
        "🧮 Built feature matrix: {} assets x {} features ({} excluded)",
        ids.len(),
        feature_names.len(),
        excluded.len()
    );

    Ok(FeatureBuild {
        matrix: FeatureMatrix::new(ids, feature_names, values)?,
        excluded,
    })
}

fn asset_features(
    asset: &Asset,
    statistics: &[FeatureStatistic],
    kind: SeriesKind,
    required: usize,
) -> Result<Vec<f64>, ClusteringError> {
    asset.validate(kind)?;
    if asset.len() < required {
        return Err(ClusteringError::InsufficientData {
            asset: asset.id.clone(),
            required,
            actual: asset.len(),
        });
    }

    let returns = asset.returns(kind);
    let levels = asset.price_index(kind);

    statistics
        .iter()
        .map(|stat| {
            let value = compute_statistic(stat, &returns, &levels);
            match value {
                Some(v) if v.is_finite() => Ok(v),
                _ => {
                    debug!("{} produced no finite value for {}", stat.name(), asset.id);
                    Err(ClusteringError::InvalidSeries {
                        asset: asset.id.clone(),
                        reason: format!("feature {} is undefined", stat.name()),
                    })
                }
            }
        })
        .collect()
}

fn compute_statistic(stat: &FeatureStatistic, returns: &[f64], levels: &[f64]) -> Option<f64> {
    match stat {
        FeatureStatistic::MeanReturn => mean(returns),
        FeatureStatistic::Volatility => sample_std(returns),
        FeatureStatistic::Skewness => standardized_moment(returns, 3).map(|moment| match moment {
            Moment::ZeroVariance => 0.0,
            Moment::Standardized(skew) => skew,
        }),
        // Excess kurtosis; a flat series has none.
        FeatureStatistic::Kurtosis => standardized_moment(returns, 4).map(|moment| match moment {
            Moment::ZeroVariance => 0.0,
            Moment::Standardized(kurtosis) => kurtosis - 3.0,
        }),
        FeatureStatistic::Autocorrelation { lag } => autocorrelation(returns, *lag),
        FeatureStatistic::MaxDrawdown => max_drawdown(levels),
        FeatureStatistic::Momentum { window } => {
            if returns.len() < *window {
                return None;
            }
            let growth = returns[returns.len() - window..]
                .iter()
                .fold(1.0, |acc, r| acc * (1.0 + r));
            Some(growth - 1.0)
        }
        FeatureStatistic::MovingAverageRatio { window, kind } => {
            let ma = indicators::moving_average(levels, *window, *kind);
            let last_ma = (*ma.last()?)?;
            let last = *levels.last()?;
            if last_ma.abs() < f64::EPSILON {
                return None;
            }
            Some(last / last_ma - 1.0)
        }
        FeatureStatistic::Rsi { window, method } => *indicators::rsi(levels, *window, *method).last()?,
        FeatureStatistic::MacdHistogram { fast, slow, signal } => {
            let hist = (*indicators::macd_histogram(levels, *fast, *slow, *signal).last()?)?;
            let last = *levels.last()?;
            if last.abs() < f64::EPSILON {
                return None;
            }
            Some(hist / last)
        }
        FeatureStatistic::BollingerBandwidth { window, num_std } => {
            let (middle, upper, lower) = indicators::bollinger_bands(levels, *window, *num_std);
            let (m, u, l) = ((*middle.last()?)?, (*upper.last()?)?, (*lower.last()?)?);
            if m.abs() < f64::EPSILON {
                return None;
            }
            Some((u - l) / m)
        }
        FeatureStatistic::BollingerPercentB { window, num_std } => {
            let (_, upper, lower) = indicators::bollinger_bands(levels, *window, *num_std);
            let (u, l) = ((*upper.last()?)?, (*lower.last()?)?);
            let last = *levels.last()?;
            let width = u - l;
            if width.abs() < f64::EPSILON {
                Some(0.5)
            } else {
                Some((last - l) / width)
            }
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Population standardized moment; 0.0 for a constant series.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Moment {
    ZeroVariance,
    Standardized(f64),
}

fn standardized_moment(values: &[f64], order: i32) -> Option<Moment> {
    let m = mean(values)?;
    let n = values.len() as f64;
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    if m2 < f64::EPSILON * f64::EPSILON {
        return Some(Moment::ZeroVariance);
    }
    let mk = values.iter().map(|v| (v - m).powi(order)).sum::<f64>() / n;
    Some(Moment::Standardized(mk / m2.powf(order as f64 / 2.0)))
}

fn autocorrelation(values: &[f64], lag: usize) -> Option<f64> {
    if lag == 0 || values.len() <= lag {
        return None;
    }
    let m = mean(values)?;
    let denom: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    if denom < f64::EPSILON * f64::EPSILON {
        return Some(0.0);
    }
    let num: f64 = values[lag..]
        .iter()
        .zip(values.iter())
        .map(|(a, b)| (a - m) * (b - m))
        .sum();
    Some(num / denom)
}

/// Largest peak-to-trough decline as a non-positive fraction.
fn max_drawdown(levels: &[f64]) -> Option<f64> {
    let first = *levels.first()?;
    let (_, worst) = levels.iter().fold((first, 0.0_f64), |(peak, worst), &v| {
        let peak = peak.max(v);
        let dd = if peak > 0.0 { v / peak - 1.0 } else { 0.0 };
        (peak, worst.min(dd))
    });
    Some(worst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::asset::Observation;
    use crate::models::config::{MovingAverageKind, RsiMethod};
    use chrono::{Duration, TimeZone, Utc};

    fn asset(id: &str, values: &[f64]) -> Asset {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Asset::new(
            id,
            values
                .iter()
                .enumerate()
                .map(|(i, &value)| Observation {
                    timestamp: start + Duration::days(i as i64),
                    value,
                })
                .collect(),
        )
    }

    fn prices(n: usize, drift: f64, wiggle: f64) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 * (1.0 + drift).powi(i as i32) * (1.0 + wiggle * (i as f64 * 0.7).sin()))
            .collect()
    }

    #[test]
    fn test_short_series_excluded_not_zero_filled() {
        let universe = Universe::new(vec![
            asset("LONG", &prices(60, 0.001, 0.01)),
            asset("SHORT", &prices(10, 0.001, 0.01)),
        ])
        .unwrap();
        let config = FeatureConfig::default();

        let build = build_feature_matrix(&universe, &config, SeriesKind::Price).unwrap();

        assert_eq!(build.matrix.asset_ids(), &["LONG".to_string()]);
        assert_eq!(build.matrix.n_features(), config.statistics.len());
        assert_eq!(build.excluded.len(), 1);
        assert_eq!(build.excluded[0].asset, "SHORT");
        assert!(build.excluded[0].reason.contains("Insufficient data"));
    }

    #[test]
    fn test_invalid_series_excluded() {
        let mut bad = prices(60, 0.0, 0.01);
        bad[10] = f64::NAN;
        let universe = Universe::new(vec![asset("BAD", &bad), asset("OK", &prices(60, 0.0, 0.01))]).unwrap();

        let build = build_feature_matrix(&universe, &FeatureConfig::default(), SeriesKind::Price).unwrap();
        assert_eq!(build.matrix.n_assets(), 1);
        assert_eq!(build.excluded[0].asset, "BAD");
    }

    #[test]
    fn test_min_observations_accounts_for_series_kind() {
        let stat = FeatureStatistic::Autocorrelation { lag: 5 };
        assert_eq!(min_observations(&stat, SeriesKind::Price), 8);
        assert_eq!(min_observations(&stat, SeriesKind::Return), 7);
        let macd = FeatureStatistic::MacdHistogram {
            fast: 12,
            slow: 26,
            signal: 9,
        };
        assert_eq!(min_observations(&macd, SeriesKind::Price), 34);
    }

    #[test]
    fn test_basic_statistics() {
        let returns = vec![0.01, -0.01, 0.01, -0.01];
        assert!((mean(&returns).unwrap()).abs() < 1e-15);
        assert!(sample_std(&returns).unwrap() > 0.0);
        // Alternating series is perfectly anti-correlated at lag 1.
        assert!(autocorrelation(&returns, 1).unwrap() < -0.7);
        assert_eq!(standardized_moment(&[0.02; 5], 3), Some(Moment::ZeroVariance));
        assert_eq!(max_drawdown(&[100.0, 120.0, 90.0, 130.0]), Some(90.0 / 120.0 - 1.0));
    }

    #[test]
    fn test_flat_returns_have_zero_excess_kurtosis() {
        let flat = [0.01; 6];
        assert_eq!(compute_statistic(&FeatureStatistic::Kurtosis, &flat, &[]), Some(0.0));
        assert_eq!(compute_statistic(&FeatureStatistic::Skewness, &flat, &[]), Some(0.0));

        // Two-point symmetric distribution: raw kurtosis 1, excess -2.
        let alternating = [0.01, -0.01, 0.01, -0.01];
        let excess = compute_statistic(&FeatureStatistic::Kurtosis, &alternating, &[]).unwrap();
        assert!((excess + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_indicator_features_are_finite() {
        let universe = Universe::new(vec![asset("A", &prices(80, 0.002, 0.02))]).unwrap();
        let config = FeatureConfig {
            statistics: vec![
                FeatureStatistic::MovingAverageRatio {
                    window: 20,
                    kind: MovingAverageKind::Weighted,
                },
                FeatureStatistic::Rsi {
                    window: 14,
                    method: RsiMethod::Cutler,
                },
                FeatureStatistic::MacdHistogram {
                    fast: 12,
                    slow: 26,
                    signal: 9,
                },
                FeatureStatistic::BollingerBandwidth {
                    window: 20,
                    num_std: 2.0,
                },
                FeatureStatistic::BollingerPercentB {
                    window: 20,
                    num_std: 2.0,
                },
            ],
        };
        let build = build_feature_matrix(&universe, &config, SeriesKind::Price).unwrap();
        assert!(build.excluded.is_empty());
        assert!(build.matrix.values().iter().all(|v| v.is_finite()));
        let rsi = build.matrix.values()[[0, 1]];
        assert!((0.0..=100.0).contains(&rsi));
    }

    #[test]
    fn test_return_series_use_rebuilt_price_index() {
        let returns: Vec<f64> = (0..40).map(|i| 0.01 * ((i % 3) as f64 - 1.0)).collect();
        let universe = Universe::new(vec![asset("R", &returns)]).unwrap();
        let config = FeatureConfig {
            statistics: vec![FeatureStatistic::MeanReturn, FeatureStatistic::MaxDrawdown],
        };
        let build = build_feature_matrix(&universe, &config, SeriesKind::Return).unwrap();
        let row = build.matrix.row(0);
        assert!((row[0] - mean(&returns).unwrap()).abs() < 1e-15);
        assert!(row[1] < 0.0);
    }

    #[test]
    fn test_standardized_columns() {
        let values = Array2::from_shape_vec((3, 2), vec![1.0, 5.0, 2.0, 5.0, 3.0, 5.0]).unwrap();
        let matrix = FeatureMatrix::new(
            vec!["A".into(), "B".into(), "C".into()],
            vec!["x".into(), "const".into()],
            values,
        )
        .unwrap();
        let z = matrix.standardized();
        assert!(z.column(0).sum().abs() < 1e-12);
        assert!(z.column(1).iter().all(|&v| v == 0.0));
    }
}
