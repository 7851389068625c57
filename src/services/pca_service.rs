/// Principal component analysis over the feature matrix.
///
/// Columns are standardized, the resulting correlation matrix is decomposed
/// with cyclic Jacobi rotations and the assets are projected onto the leading
/// components.

use ndarray::{Array1, Array2, Axis};
use tracing::{debug, info};

use crate::errors::ClusteringError;
use crate::models::config::{ComponentSelection, PcaConfig};
use crate::models::report::{ComponentImportance, PcaResult};
use crate::services::feature_service::FeatureMatrix;

const JACOBI_MAX_SWEEPS: usize = 100;
const JACOBI_TOLERANCE: f64 = 1e-12;

/// Eigen decomposition of a symmetric matrix, eigenvalues descending.
#[derive(Debug, Clone)]
pub struct EigenDecomposition {
    pub eigenvalues: Array1<f64>,
    /// Column `i` belongs to `eigenvalues[i]`.
    pub eigenvectors: Array2<f64>,
}

impl EigenDecomposition {
    /// Cyclic Jacobi eigenvalue algorithm. Deterministic for a given input.
    pub fn from_symmetric(matrix: &Array2<f64>) -> Self {
        let n = matrix.nrows();
        let mut a = matrix.clone();
        let mut v = Array2::<f64>::eye(n);

        for sweep in 0..JACOBI_MAX_SWEEPS {
            let off: f64 = (0..n)
                .flat_map(|p| ((p + 1)..n).map(move |q| (p, q)))
                .map(|(p, q)| a[[p, q]] * a[[p, q]])
                .sum();
            if off.sqrt() < JACOBI_TOLERANCE {
                debug!("Jacobi converged after {} sweeps", sweep);
                break;
            }

            for p in 0..n {
                for q in (p + 1)..n {
                    let apq = a[[p, q]];
                    if apq.abs() < f64::MIN_POSITIVE {
                        continue;
                    }
                    let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                    let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                    let t = if theta == 0.0 { 1.0 } else { t };
                    let c = 1.0 / (t * t + 1.0).sqrt();
                    let s = t * c;

                    for k in 0..n {
                        let akp = a[[k, p]];
                        let akq = a[[k, q]];
                        a[[k, p]] = c * akp - s * akq;
                        a[[k, q]] = s * akp + c * akq;
                    }
                    for k in 0..n {
                        let apk = a[[p, k]];
                        let aqk = a[[q, k]];
                        a[[p, k]] = c * apk - s * aqk;
                        a[[q, k]] = s * apk + c * aqk;
                    }
                    for k in 0..n {
                        let vkp = v[[k, p]];
                        let vkq = v[[k, q]];
                        v[[k, p]] = c * vkp - s * vkq;
                        v[[k, q]] = s * vkp + c * vkq;
                    }
                }
            }
        }

        // Sort by eigenvalue (descending), stable on index for ties.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&i, &j| a[[j, j]].total_cmp(&a[[i, i]]).then(i.cmp(&j)));

        let eigenvalues = Array1::from_iter(order.iter().map(|&i| a[[i, i]]));
        let mut eigenvectors = Array2::<f64>::zeros((n, n));
        for (new_idx, &old_idx) in order.iter().enumerate() {
            let mut column = v.column(old_idx).to_owned();
            // Largest-magnitude loading is made positive.
            let pivot = column
                .iter()
                .copied()
                .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
            if pivot < 0.0 {
                column.mapv_inplace(|x| -x);
            }
            eigenvectors.column_mut(new_idx).assign(&column);
        }

        Self {
            eigenvalues,
            eigenvectors,
        }
    }
}

/// Eigenvalue shares of `total`, non-increasing, with a sum that never
/// exceeds 1.0 once rounded.
fn variance_shares(eigenvalues: &[f64], total: f64) -> Vec<f64> {
    let mut shares: Vec<f64> = eigenvalues.iter().map(|v| v / total).collect();
    // Each pass shrinks the sum by about one ulp; scaling keeps the order.
    for _ in 0..64 {
        if shares.iter().sum::<f64>() <= 1.0 {
            break;
        }
        for share in shares.iter_mut() {
            *share *= 1.0 - f64::EPSILON;
        }
    }
    shares
}

/// Assets projected onto the retained components.
#[derive(Debug, Clone)]
pub struct ReducedFeatures {
    pub asset_ids: Vec<String>,
    /// Assets × retained components.
    pub values: Array2<f64>,
    pub result: PcaResult,
}

/// Standardize, decompose and project the feature matrix.
///
/// # Arguments
/// * `features` - Feature matrix of the assets that survived extraction
/// * `config` - Component selection rule
///
/// # Returns
/// Projected features plus the explained-variance share of every component,
/// or `DegenerateInput` when the matrix cannot support a decomposition.
pub fn reduce(features: &FeatureMatrix, config: &PcaConfig) -> Result<ReducedFeatures, ClusteringError> {
    let n_assets = features.n_assets();
    let n_features = features.n_features();

    if n_features == 0 {
        return Err(ClusteringError::DegenerateInput("feature matrix has no columns".to_string()));
    }
    if n_assets < n_features + 1 {
        return Err(ClusteringError::DegenerateInput(format!(
            "{} assets cannot support PCA over {} features (need at least {})",
            n_assets,
            n_features,
            n_features + 1
        )));
    }

    let values = features.values();
    let means = values.mean_axis(Axis(0)).ok_or_else(|| {
        ClusteringError::DegenerateInput("feature matrix has no rows".to_string())
    })?;
    let stds = values.std_axis(Axis(0), 0.0);
    if let Some(col) = stds.iter().position(|s| *s <= f64::EPSILON) {
        return Err(ClusteringError::DegenerateInput(format!(
            "feature {} has zero variance",
            features.feature_names()[col]
        )));
    }

    let standardized = (values - &means) / &stds;
    let correlation = standardized.t().dot(&standardized) / n_assets as f64;
    let eigen = EigenDecomposition::from_symmetric(&correlation);

    let clipped: Vec<f64> = eigen.eigenvalues.iter().map(|v| v.max(0.0)).collect();
    let total: f64 = clipped.iter().sum();
    if total <= f64::EPSILON {
        return Err(ClusteringError::DegenerateInput("total feature variance is zero".to_string()));
    }
    let shares = variance_shares(&clipped, total);

    let retained = match config.components {
        ComponentSelection::Fixed { count } => count.min(n_features),
        ComponentSelection::VarianceThreshold { threshold } => {
            let mut cumulative = 0.0;
            shares
                .iter()
                .position(|s| {
                    cumulative += s;
                    cumulative >= threshold - 1e-12
                })
                .map_or(n_features, |idx| idx + 1)
        }
    };

    let basis = eigen.eigenvectors.slice(ndarray::s![.., ..retained]);
    let projected = standardized.dot(&basis);
    let retained_share: f64 = shares[..retained].iter().sum();

    info!(
        "📉 PCA retained {} of {} components ({:.1}% of variance)",
        retained,
        n_features,
        retained_share * 100.0
    );

    Ok(ReducedFeatures {
        asset_ids: features.asset_ids().to_vec(),
        values: projected,
        result: PcaResult {
            components: shares
                .iter()
                .enumerate()
                .map(|(idx, &share)| ComponentImportance {
                    component: idx + 1,
                    explained_variance_share: share,
                })
                .collect(),
            retained_components: retained,
            retained_variance_share: retained_share,
            feature_names: features.feature_names().to_vec(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn matrix(rows: Vec<[f64; 3]>) -> FeatureMatrix {
        let n = rows.len();
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        FeatureMatrix::new(
            (0..n).map(|i| format!("A{:02}", i)).collect(),
            vec!["f1".into(), "f2".into(), "f3".into()],
            Array2::from_shape_vec((n, 3), flat).unwrap(),
        )
        .unwrap()
    }

    fn sample() -> FeatureMatrix {
        matrix(
            (0..20)
                .map(|i| {
                    let x = i as f64;
                    [x, 2.0 * x + (x * 1.3).sin(), (x * 0.7).cos()]
                })
                .collect(),
        )
    }

    #[test]
    fn test_jacobi_diagonalizes_symmetric_matrix() {
        let m = array![[2.0, 1.0], [1.0, 2.0]];
        let eigen = EigenDecomposition::from_symmetric(&m);
        assert!((eigen.eigenvalues[0] - 3.0).abs() < 1e-10);
        assert!((eigen.eigenvalues[1] - 1.0).abs() < 1e-10);
        // A v = lambda v
        let v0 = eigen.eigenvectors.column(0).to_owned();
        let av = m.dot(&v0);
        for k in 0..2 {
            assert!((av[k] - 3.0 * v0[k]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_shares_sorted_and_sum_to_one() {
        let reduced = reduce(&sample(), &PcaConfig::default()).unwrap();
        let shares: Vec<f64> = reduced
            .result
            .components
            .iter()
            .map(|c| c.explained_variance_share)
            .collect();
        assert!(shares.iter().all(|s| *s >= 0.0));
        assert!(shares.windows(2).all(|w| w[0] >= w[1]));
        assert!(shares.iter().sum::<f64>() <= 1.0);
        assert_eq!(reduced.values.ncols(), reduced.result.retained_components);
        assert!(reduced.result.retained_variance_share >= 0.9);
    }

    #[test]
    fn test_fixed_component_count_is_capped() {
        let config = PcaConfig {
            components: ComponentSelection::Fixed { count: 10 },
        };
        let reduced = reduce(&sample(), &config).unwrap();
        assert_eq!(reduced.result.retained_components, 3);
        assert_eq!(reduced.values.dim(), (20, 3));
    }

    #[test]
    fn test_projection_is_deterministic() {
        let a = reduce(&sample(), &PcaConfig::default()).unwrap();
        let b = reduce(&sample(), &PcaConfig::default()).unwrap();
        assert_eq!(a.values, b.values);
    }

    #[test]
    fn test_too_few_assets_is_degenerate() {
        let features = matrix(vec![[1.0, 2.0, 3.0], [2.0, 1.0, 0.0], [0.5, 0.1, 4.0]]);
        let err = reduce(&features, &PcaConfig::default()).unwrap_err();
        assert!(matches!(err, ClusteringError::DegenerateInput(_)));
    }

    #[test]
    fn test_zero_variance_column_is_degenerate() {
        let features = matrix((0..10).map(|i| [i as f64, 1.0, (i * i) as f64]).collect());
        let err = reduce(&features, &PcaConfig::default()).unwrap_err();
        assert!(err.to_string().contains("f2"));
    }

    #[test]
    fn test_rounded_shares_never_exceed_one() {
        // Plain division sums to 1.0000000000000002 for these eigenvalues.
        let eigenvalues = [
            0.8313979539108868,
            0.6093924350126585,
            0.55343354800622,
            0.2790859977671136,
            0.09152017194688666,
        ];
        let total: f64 = eigenvalues.iter().sum();
        let shares = variance_shares(&eigenvalues, total);
        assert!(shares.iter().sum::<f64>() <= 1.0);
        assert!(shares.windows(2).all(|w| w[0] >= w[1]));
        assert!(shares.iter().all(|s| *s > 0.0));
    }

    #[test]
    fn test_shares_bounded_over_random_matrices() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..200 {
            let rows: Vec<[f64; 3]> = (0..30)
                .map(|_| [rng.random::<f64>(), rng.random::<f64>(), rng.random::<f64>()])
                .collect();
            let reduced = reduce(&matrix(rows), &PcaConfig::default()).unwrap();
            let total: f64 = reduced
                .result
                .components
                .iter()
                .map(|c| c.explained_variance_share)
                .sum();
            assert!(total <= 1.0, "shares sum to {}", total);
            assert!(reduced.result.retained_variance_share <= 1.0);
        }
    }
}
