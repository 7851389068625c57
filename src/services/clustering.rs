/// Clustering engine
///
/// Every algorithm family is a variant of `AlgorithmConfig` and is reached
/// through the same `assign` call, producing the same `ClusterAssignment`
/// shape whatever the input (reduced features, a similarity matrix or a
/// similarity graph). All algorithms are deterministic for a given input and
/// seed.

use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::errors::ClusteringError;
use crate::models::cluster::{AlgorithmConfig, ClusterAssignment, CommunityAlgorithm, Convergence, IsolatedNodes, Linkage};
use crate::models::similarity::{SimilarityGraph, SimilarityMatrix};
use crate::state::CancellationFlag;

const GAIN_EPSILON: f64 = 1e-12;

/// What an algorithm clusters.
#[derive(Debug, Clone, Copy)]
pub enum ClusterInput<'a> {
    /// Assets × reduced components, rows in `asset_ids` order.
    Features {
        asset_ids: &'a [String],
        values: &'a Array2<f64>,
    },
    Similarity(&'a SimilarityMatrix),
    Graph(&'a SimilarityGraph),
}

impl ClusterInput<'_> {
    fn kind(&self) -> &'static str {
        match self {
            ClusterInput::Features { .. } => "reduced features",
            ClusterInput::Similarity(_) => "a similarity matrix",
            ClusterInput::Graph(_) => "a similarity graph",
        }
    }
}

/// Wall-clock budget plus the run's cancellation flag.
#[derive(Debug, Clone)]
pub struct ClusterBudget {
    deadline: Option<Instant>,
    cancel: CancellationFlag,
}

impl ClusterBudget {
    pub fn new(cancel: CancellationFlag, time_budget: Option<Duration>) -> Self {
        Self {
            deadline: time_budget.map(|d| Instant::now() + d),
            cancel,
        }
    }

    pub fn unlimited(cancel: CancellationFlag) -> Self {
        Self::new(cancel, None)
    }

    /// `Err(Cancelled)` when the run was cancelled, `Ok(true)` once the
    /// deadline has passed.
    fn exhausted(&self) -> Result<bool, ClusteringError> {
        if self.cancel.is_cancelled() {
            return Err(ClusteringError::Cancelled);
        }
        Ok(self.deadline.is_some_and(|d| Instant::now() >= d))
    }
}

const TIME_BUDGET_EXCEEDED: &str = "time budget exceeded";
const ITERATION_CAP_REACHED: &str = "iteration cap reached";

type RawLabels = (Vec<Option<usize>>, Convergence);

impl AlgorithmConfig {
    /// Partition the input.
    ///
    /// # Arguments
    /// * `input` - Reduced features, similarity matrix or similarity graph
    /// * `seed` - Seed for randomized initialization (k-means only)
    /// * `budget` - Time budget and cancellation flag
    ///
    /// # Returns
    /// A complete assignment, tagged partial when a budget cut the run short.
    pub fn assign(
        &self,
        input: ClusterInput<'_>,
        seed: u64,
        budget: &ClusterBudget,
    ) -> Result<ClusterAssignment, ClusteringError> {
        let mismatch = || {
            ClusteringError::InvalidConfig(format!("{} clustering cannot run on {}", self.family(), input.kind()))
        };

        let (asset_ids, (labels, convergence)) = match (self, input) {
            (
                AlgorithmConfig::KMeans {
                    k,
                    max_iterations,
                    tolerance,
                },
                ClusterInput::Features { asset_ids, values },
            ) => (asset_ids, kmeans(values, *k, *max_iterations, *tolerance, seed, budget)?),
            (AlgorithmConfig::Dbscan { eps, min_samples }, ClusterInput::Features { asset_ids, values }) => {
                (asset_ids, dbscan(values, *eps, *min_samples, budget)?)
            }
            (AlgorithmConfig::Hierarchical { n_clusters, linkage }, ClusterInput::Features { asset_ids, values }) => {
                let distances = feature_distances(values, *linkage == Linkage::Ward);
                (asset_ids, agglomerate(distances, values.nrows(), *n_clusters, *linkage, budget)?)
            }
            (AlgorithmConfig::Hierarchical { n_clusters, linkage }, ClusterInput::Similarity(matrix)) => {
                if *linkage == Linkage::Ward {
                    return Err(ClusteringError::InvalidConfig(
                        "ward linkage requires Euclidean feature input".to_string(),
                    ));
                }
                let distances = similarity_distances(matrix);
                (matrix.asset_ids(), agglomerate(distances, matrix.len(), *n_clusters, *linkage, budget)?)
            }
            (
                AlgorithmConfig::Graph {
                    algorithm,
                    isolated_nodes,
                    max_iterations,
                },
                ClusterInput::Graph(graph),
            ) => (
                graph.node_ids(),
                graph_communities(graph, *algorithm, *isolated_nodes, *max_iterations, budget)?,
            ),
            _ => return Err(mismatch()),
        };

        let seed = self.is_seeded().then_some(seed);
        let assignment = ClusterAssignment::new(asset_ids.to_vec(), labels, convergence, seed);
        info!(
            "🧩 {} clustering: {} clusters, {} noise over {} assets{}",
            self.family(),
            assignment.num_clusters(),
            assignment.noise_count(),
            assignment.len(),
            if assignment.convergence().is_partial() { " (partial)" } else { "" }
        );
        Ok(assignment)
    }
}

fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

// ---------------------------------------------------------------------------
// K-means
// ---------------------------------------------------------------------------

fn kmeans(
    points: &Array2<f64>,
    k: usize,
    max_iterations: usize,
    tolerance: f64,
    seed: u64,
    budget: &ClusterBudget,
) -> Result<RawLabels, ClusteringError> {
    let n = points.nrows();
    if n == 0 {
        return Err(ClusteringError::DegenerateInput("no assets to cluster".to_string()));
    }
    if k == 0 || k > n {
        return Err(ClusteringError::InvalidConfig(format!(
            "k = {} must be between 1 and the {} assets available",
            k, n
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = kmeans_plus_plus(points, k, &mut rng);
    let mut labels = vec![usize::MAX; n];

    for iteration in 1..=max_iterations {
        let changed = assign_to_nearest(points, &centroids, &mut labels);
        if !changed {
            debug!("k-means assignments stable after {} iterations", iteration);
            return Ok((wrap(labels), Convergence::Converged { iterations: iteration }));
        }

        let previous = centroids.clone();
        update_centroids(points, &labels, &mut centroids);
        reseed_empty_clusters(points, &labels, &previous, &mut centroids);

        let shift = (0..k)
            .map(|c| squared_distance(previous.row(c), centroids.row(c)).sqrt())
            .fold(0.0_f64, f64::max);
        if shift < tolerance {
            assign_to_nearest(points, &centroids, &mut labels);
            debug!("k-means centroid shift {:.2e} below tolerance after {} iterations", shift, iteration);
            return Ok((wrap(labels), Convergence::Converged { iterations: iteration }));
        }

        if budget.exhausted()? {
            assign_to_nearest(points, &centroids, &mut labels);
            return Ok((
                wrap(labels),
                Convergence::Partial {
                    iterations: iteration,
                    reason: TIME_BUDGET_EXCEEDED.to_string(),
                },
            ));
        }
    }

    assign_to_nearest(points, &centroids, &mut labels);
    Ok((
        wrap(labels),
        Convergence::Partial {
            iterations: max_iterations,
            reason: ITERATION_CAP_REACHED.to_string(),
        },
    ))
}

fn wrap(labels: Vec<usize>) -> Vec<Option<usize>> {
    labels.into_iter().map(Some).collect()
}

/// k-means++ seeding: each further centroid is drawn with probability
/// proportional to the squared distance to the nearest chosen one.
fn kmeans_plus_plus(points: &Array2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = points.nrows();
    let mut chosen = vec![rng.random_range(0..n)];
    let mut nearest: Vec<f64> = (0..n)
        .map(|i| squared_distance(points.row(i), points.row(chosen[0])))
        .collect();

    while chosen.len() < k {
        let total: f64 = nearest.iter().sum();
        let next = if total <= 0.0 {
            // Every point sits on a chosen centroid; take the lowest unused index.
            (0..n).find(|i| !chosen.contains(i)).unwrap_or(0)
        } else {
            let target = rng.random::<f64>() * total;
            let mut cumulative = 0.0;
            nearest
                .iter()
                .position(|d| {
                    cumulative += d;
                    cumulative > target
                })
                .unwrap_or_else(|| nearest.iter().rposition(|d| *d > 0.0).unwrap_or(0))
        };
        chosen.push(next);
        for (i, d) in nearest.iter_mut().enumerate() {
            *d = d.min(squared_distance(points.row(i), points.row(next)));
        }
    }

    let mut centroids = Array2::<f64>::zeros((k, points.ncols()));
    for (c, &idx) in chosen.iter().enumerate() {
        centroids.row_mut(c).assign(&points.row(idx));
    }
    centroids
}

/// Nearest centroid per point, ties to the lowest cluster index. Returns
/// whether any label changed.
fn assign_to_nearest(points: &Array2<f64>, centroids: &Array2<f64>, labels: &mut [usize]) -> bool {
    let mut changed = false;
    for (i, label) in labels.iter_mut().enumerate() {
        let mut best = 0;
        let mut best_d = f64::INFINITY;
        for c in 0..centroids.nrows() {
            let d = squared_distance(points.row(i), centroids.row(c));
            if d < best_d {
                best = c;
                best_d = d;
            }
        }
        if *label != best {
            *label = best;
            changed = true;
        }
    }
    changed
}

fn update_centroids(points: &Array2<f64>, labels: &[usize], centroids: &mut Array2<f64>) {
    let k = centroids.nrows();
    let mut sums = Array2::<f64>::zeros(centroids.dim());
    let mut counts = vec![0usize; k];
    for (i, &label) in labels.iter().enumerate() {
        let mut row = sums.row_mut(label);
        row += &points.row(i);
        counts[label] += 1;
    }
    for c in 0..k {
        if counts[c] > 0 {
            let mean = &sums.row(c) / counts[c] as f64;
            centroids.row_mut(c).assign(&mean);
        }
    }
}

/// Move each empty cluster onto the point farthest from its own centroid
/// (ties to the lowest index).
fn reseed_empty_clusters(points: &Array2<f64>, labels: &[usize], previous: &Array2<f64>, centroids: &mut Array2<f64>) {
    let k = centroids.nrows();
    let mut counts = vec![0usize; k];
    for &label in labels {
        counts[label] += 1;
    }
    let mut taken: Vec<usize> = Vec::new();
    for c in (0..k).filter(|&c| counts[c] == 0) {
        let mut farthest = None;
        let mut farthest_d = f64::NEG_INFINITY;
        for (i, &label) in labels.iter().enumerate() {
            if taken.contains(&i) {
                continue;
            }
            let d = squared_distance(points.row(i), previous.row(label));
            if d > farthest_d {
                farthest = Some(i);
                farthest_d = d;
            }
        }
        if let Some(i) = farthest {
            debug!("k-means cluster {} empty, reseeded with point {}", c, i);
            centroids.row_mut(c).assign(&points.row(i));
            taken.push(i);
        }
    }
}

// ---------------------------------------------------------------------------
// DBSCAN
// ---------------------------------------------------------------------------

fn dbscan(points: &Array2<f64>, eps: f64, min_samples: usize, budget: &ClusterBudget) -> Result<RawLabels, ClusteringError> {
    let n = points.nrows();
    let eps_sq = eps * eps;

    // Neighbourhoods include the point itself.
    let neighbourhoods: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| squared_distance(points.row(i), points.row(j)) <= eps_sq)
                .collect()
        })
        .collect();
    let is_core: Vec<bool> = neighbourhoods.iter().map(|nb| nb.len() >= min_samples).collect();

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut next_cluster = 0;

    for seed in 0..n {
        if labels[seed].is_some() || !is_core[seed] {
            continue;
        }
        if budget.exhausted()? {
            return Ok((
                labels,
                Convergence::Partial {
                    iterations: next_cluster,
                    reason: TIME_BUDGET_EXCEEDED.to_string(),
                },
            ));
        }

        labels[seed] = Some(next_cluster);
        let mut queue = VecDeque::from([seed]);
        while let Some(p) = queue.pop_front() {
            if !is_core[p] {
                continue;
            }
            for &q in &neighbourhoods[p] {
                if labels[q].is_none() {
                    labels[q] = Some(next_cluster);
                    queue.push_back(q);
                }
            }
        }
        next_cluster += 1;
    }

    Ok((labels, Convergence::Converged { iterations: 1 }))
}

// ---------------------------------------------------------------------------
// Agglomerative clustering
// ---------------------------------------------------------------------------

/// Dense n × n Euclidean distances; squared for Ward's criterion.
fn feature_distances(points: &Array2<f64>, squared: bool) -> Vec<f64> {
    let n = points.nrows();
    let mut distances = vec![0.0; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d2 = squared_distance(points.row(i), points.row(j));
            let d = if squared { d2 } else { d2.sqrt() };
            distances[i * n + j] = d;
            distances[j * n + i] = d;
        }
    }
    distances
}

/// Distance = upper bound - similarity. Unbounded metrics use the largest
/// observed similarity as the bound; missing pairs take the largest distance.
fn similarity_distances(matrix: &SimilarityMatrix) -> Vec<f64> {
    let n = matrix.len();
    let upper = matrix
        .metric()
        .similarity_upper_bound()
        .or_else(|| matrix.max_similarity())
        .unwrap_or(1.0);

    let max_distance = matrix
        .pairs()
        .filter_map(|(_, _, v)| v.similarity())
        .map(|s| upper - s)
        .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |m| m.max(d))))
        .unwrap_or(1.0);

    let mut distances = vec![0.0; n * n];
    for (i, j, value) in matrix.pairs() {
        let d = value.similarity().map_or(max_distance, |s| upper - s);
        distances[i * n + j] = d;
        distances[j * n + i] = d;
    }
    distances
}

/// Lance-Williams agglomeration down to `n_clusters` clusters. Closest pair
/// merges first; ties go to the lowest index pair.
fn agglomerate(
    mut distances: Vec<f64>,
    n: usize,
    n_clusters: usize,
    linkage: Linkage,
    budget: &ClusterBudget,
) -> Result<RawLabels, ClusteringError> {
    if n == 0 {
        return Err(ClusteringError::DegenerateInput("no assets to cluster".to_string()));
    }
    let target = n_clusters.clamp(1, n);
    let mut active = vec![true; n];
    let mut sizes = vec![1usize; n];
    let mut owner: Vec<usize> = (0..n).collect();
    let mut remaining = n;
    let mut merges = 0;

    while remaining > target {
        if budget.exhausted()? {
            return Ok((
                owner.into_iter().map(Some).collect(),
                Convergence::Partial {
                    iterations: merges,
                    reason: TIME_BUDGET_EXCEEDED.to_string(),
                },
            ));
        }

        let mut best: Option<(usize, usize, f64)> = None;
        for i in (0..n).filter(|&i| active[i]) {
            for j in ((i + 1)..n).filter(|&j| active[j]) {
                let d = distances[i * n + j];
                if best.map_or(true, |(_, _, bd)| d < bd) {
                    best = Some((i, j, d));
                }
            }
        }
        let Some((i, j, d_ij)) = best else { break };

        let (n_i, n_j) = (sizes[i] as f64, sizes[j] as f64);
        for k in (0..n).filter(|&k| active[k] && k != i && k != j) {
            let d_ik = distances[i * n + k];
            let d_jk = distances[j * n + k];
            let n_k = sizes[k] as f64;
            let updated = match linkage {
                Linkage::Single => d_ik.min(d_jk),
                Linkage::Complete => d_ik.max(d_jk),
                Linkage::Average => (n_i * d_ik + n_j * d_jk) / (n_i + n_j),
                Linkage::Ward => ((n_i + n_k) * d_ik + (n_j + n_k) * d_jk - n_k * d_ij) / (n_i + n_j + n_k),
            };
            distances[i * n + k] = updated;
            distances[k * n + i] = updated;
        }

        active[j] = false;
        sizes[i] += sizes[j];
        for o in owner.iter_mut().filter(|o| **o == j) {
            *o = i;
        }
        remaining -= 1;
        merges += 1;
    }

    Ok((owner.into_iter().map(Some).collect(), Convergence::Converged { iterations: merges }))
}

// ---------------------------------------------------------------------------
// Graph communities
// ---------------------------------------------------------------------------

fn graph_communities(
    graph: &SimilarityGraph,
    algorithm: CommunityAlgorithm,
    isolated_nodes: IsolatedNodes,
    max_iterations: usize,
    budget: &ClusterBudget,
) -> Result<RawLabels, ClusteringError> {
    let n = graph.node_count();
    let (communities, convergence) = match algorithm {
        CommunityAlgorithm::ConnectedComponents => {
            budget.exhausted()?;
            (connected_components(graph), Convergence::Converged { iterations: 1 })
        }
        CommunityAlgorithm::Louvain => louvain(graph, max_iterations, budget)?,
    };

    let labels = (0..n)
        .map(|node| {
            if !graph.is_isolated(node) {
                return Some(communities[node]);
            }
            match isolated_nodes {
                IsolatedNodes::Exclude => None,
                // Offset past every community id so each isolated node stays alone.
                IsolatedNodes::Singleton => Some(n + node),
            }
        })
        .collect();
    Ok((labels, convergence))
}

fn connected_components(graph: &SimilarityGraph) -> Vec<usize> {
    let n = graph.node_count();
    let mut component = vec![usize::MAX; n];
    let mut next = 0;
    for start in 0..n {
        if component[start] != usize::MAX {
            continue;
        }
        component[start] = next;
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for &(neighbour, _) in graph.neighbours(node) {
                if component[neighbour] == usize::MAX {
                    component[neighbour] = next;
                    queue.push_back(neighbour);
                }
            }
        }
        next += 1;
    }
    component
}

/// Weighted graph at one Louvain level. Self loops hold the weight of edges
/// collapsed inside an aggregated node.
struct LevelGraph {
    adjacency: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
}

impl LevelGraph {
    fn len(&self) -> usize {
        self.adjacency.len()
    }

    fn degree(&self, node: usize) -> f64 {
        self.adjacency[node].iter().map(|(_, w)| w).sum::<f64>() + 2.0 * self.self_loops[node]
    }
}

struct LocalMoves {
    communities: Vec<usize>,
    moved: bool,
    stopped: Option<&'static str>,
}

/// Louvain modularity optimization: local moving followed by aggregation,
/// repeated until no node changes community. Nodes are visited in index
/// order and gain ties resolve to the lowest community id.
fn louvain(graph: &SimilarityGraph, max_iterations: usize, budget: &ClusterBudget) -> Result<(Vec<usize>, Convergence), ClusteringError> {
    let n = graph.node_count();
    let mut level = LevelGraph {
        adjacency: (0..n).map(|i| graph.neighbours(i).to_vec()).collect(),
        self_loops: vec![0.0; n],
    };
    let mut membership: Vec<usize> = (0..n).collect();
    let two_m: f64 = (0..n).map(|i| level.degree(i)).sum();
    if two_m <= 0.0 {
        return Ok((membership, Convergence::Converged { iterations: 0 }));
    }

    let mut passes = 0;
    loop {
        let moves = local_moving(&level, two_m, &mut passes, max_iterations, budget)?;
        let (node_to_community, count) = renumber(&moves.communities);
        for m in membership.iter_mut() {
            *m = node_to_community[*m];
        }
        debug!("Louvain level: {} nodes -> {} communities after {} passes", level.len(), count, passes);

        if let Some(reason) = moves.stopped {
            return Ok((
                membership,
                Convergence::Partial {
                    iterations: passes,
                    reason: reason.to_string(),
                },
            ));
        }
        if !moves.moved || count == level.len() {
            return Ok((membership, Convergence::Converged { iterations: passes }));
        }
        level = aggregate(&level, &node_to_community, count);
    }
}

fn local_moving(
    level: &LevelGraph,
    two_m: f64,
    passes: &mut usize,
    max_iterations: usize,
    budget: &ClusterBudget,
) -> Result<LocalMoves, ClusteringError> {
    let n = level.len();
    let degrees: Vec<f64> = (0..n).map(|i| level.degree(i)).collect();
    let mut communities: Vec<usize> = (0..n).collect();
    let mut totals = degrees.clone();
    let mut any_moved = false;

    loop {
        let stopped = if *passes >= max_iterations {
            Some(ITERATION_CAP_REACHED)
        } else if budget.exhausted()? {
            Some(TIME_BUDGET_EXCEEDED)
        } else {
            None
        };
        if stopped.is_some() {
            return Ok(LocalMoves {
                communities,
                moved: any_moved,
                stopped,
            });
        }
        *passes += 1;

        let mut moved = false;
        for node in 0..n {
            let k_i = degrees[node];
            let own = communities[node];

            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for &(neighbour, w) in &level.adjacency[node] {
                *links.entry(communities[neighbour]).or_insert(0.0) += w;
            }

            totals[own] -= k_i;
            let gain = |community: usize, weight: f64| weight - totals[community] * k_i / two_m;

            let mut best = own;
            let mut best_gain = gain(own, links.get(&own).copied().unwrap_or(0.0));
            for (&community, &weight) in &links {
                let g = gain(community, weight);
                if g > best_gain + GAIN_EPSILON || ((g - best_gain).abs() <= GAIN_EPSILON && community < best) {
                    best = community;
                    best_gain = g;
                }
            }
            totals[best] += k_i;

            if best != own {
                communities[node] = best;
                moved = true;
                any_moved = true;
            }
        }

        if !moved {
            return Ok(LocalMoves {
                communities,
                moved: any_moved,
                stopped: None,
            });
        }
    }
}

/// Community ids renumbered by first appearance in node order.
fn renumber(communities: &[usize]) -> (Vec<usize>, usize) {
    let mut remap: BTreeMap<usize, usize> = BTreeMap::new();
    let renumbered = communities
        .iter()
        .map(|c| {
            let next = remap.len();
            *remap.entry(*c).or_insert(next)
        })
        .collect();
    (renumbered, remap.len())
}

fn aggregate(level: &LevelGraph, node_to_community: &[usize], count: usize) -> LevelGraph {
    let mut self_loops = vec![0.0; count];
    let mut weights: BTreeMap<(usize, usize), f64> = BTreeMap::new();

    for u in 0..level.len() {
        let cu = node_to_community[u];
        self_loops[cu] += level.self_loops[u];
        for &(v, w) in &level.adjacency[u] {
            if u >= v {
                continue;
            }
            let cv = node_to_community[v];
            if cu == cv {
                self_loops[cu] += w;
            } else {
                *weights.entry((cu.min(cv), cu.max(cv))).or_insert(0.0) += w;
            }
        }
    }

    let mut adjacency = vec![Vec::new(); count];
    for ((a, b), w) in weights {
        adjacency[a].push((b, w));
        adjacency[b].push((a, w));
    }
    for neighbours in adjacency.iter_mut() {
        neighbours.sort_by(|x, y| x.0.cmp(&y.0));
    }

    LevelGraph { adjacency, self_loops }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cluster::ClusterLabel;
    use crate::models::similarity::{Edge, PairValue, SimilarityMetric};
    use ndarray::array;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("A{:03}", i)).collect()
    }

    fn budget() -> ClusterBudget {
        ClusterBudget::unlimited(CancellationFlag::new())
    }

    /// Three tight blobs around (0,0), (10,0) and (0,10).
    fn blobs() -> Array2<f64> {
        let centers = [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)];
        let sizes = [6, 4, 3];
        let mut rows = Vec::new();
        for (c, &(cx, cy)) in centers.iter().enumerate() {
            for p in 0..sizes[c] {
                let jitter = 0.1 * p as f64;
                rows.push(cx + jitter);
                rows.push(cy - jitter);
            }
        }
        Array2::from_shape_vec((13, 2), rows).unwrap()
    }

    fn sorted_sizes(assignment: &ClusterAssignment) -> Vec<usize> {
        let mut sizes: Vec<usize> = assignment.members().iter().map(Vec::len).collect();
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        sizes
    }

    #[test]
    fn test_kmeans_recovers_blobs_and_is_deterministic() {
        let points = blobs();
        let ids = ids(13);
        let config = AlgorithmConfig::KMeans {
            k: 3,
            max_iterations: 100,
            tolerance: 1e-9,
        };
        let input = ClusterInput::Features {
            asset_ids: &ids,
            values: &points,
        };
        let first = config.assign(input, 42, &budget()).unwrap();
        let second = config.assign(input, 42, &budget()).unwrap();

        assert_eq!(sorted_sizes(&first), vec![6, 4, 3]);
        assert_eq!(first.labels(), second.labels());
        assert_eq!(first.seed(), Some(42));
        assert!(!first.convergence().is_partial());
    }

    #[test]
    fn test_kmeans_rejects_k_above_n() {
        let points = array![[0.0], [1.0]];
        let ids = ids(2);
        let config = AlgorithmConfig::KMeans {
            k: 3,
            max_iterations: 10,
            tolerance: 1e-6,
        };
        let err = config
            .assign(
                ClusterInput::Features {
                    asset_ids: &ids,
                    values: &points,
                },
                1,
                &budget(),
            )
            .unwrap_err();
        assert!(matches!(err, ClusteringError::InvalidConfig(_)));
    }

    #[test]
    fn test_kmeans_iteration_cap_is_partial() {
        let points = blobs();
        let ids = ids(13);
        let config = AlgorithmConfig::KMeans {
            k: 3,
            max_iterations: 1,
            tolerance: 0.0,
        };
        let assignment = config
            .assign(
                ClusterInput::Features {
                    asset_ids: &ids,
                    values: &points,
                },
                7,
                &budget(),
            )
            .unwrap();
        assert!(assignment.convergence().is_partial());
        assert_eq!(assignment.len(), 13);
    }

    #[test]
    fn test_dbscan_marks_outliers_as_noise() {
        let mut rows: Vec<f64> = (0..8).flat_map(|i| [0.1 * i as f64, 0.0]).collect();
        rows.extend([50.0, 50.0, -40.0, 30.0]);
        let points = Array2::from_shape_vec((10, 2), rows).unwrap();
        let ids = ids(10);
        let config = AlgorithmConfig::Dbscan {
            eps: 0.25,
            min_samples: 3,
        };
        let assignment = config
            .assign(
                ClusterInput::Features {
                    asset_ids: &ids,
                    values: &points,
                },
                0,
                &budget(),
            )
            .unwrap();
        assert_eq!(assignment.num_clusters(), 1);
        assert_eq!(assignment.noise_count(), 2);
        assert_eq!(assignment.labels()[8], ClusterLabel::Noise);
        assert_eq!(assignment.seed(), None);
    }

    #[test]
    fn test_dbscan_eps_is_inclusive() {
        let points = array![[0.0], [1.0], [2.0]];
        let ids = ids(3);
        let config = AlgorithmConfig::Dbscan {
            eps: 1.0,
            min_samples: 2,
        };
        let assignment = config
            .assign(
                ClusterInput::Features {
                    asset_ids: &ids,
                    values: &points,
                },
                0,
                &budget(),
            )
            .unwrap();
        assert_eq!(assignment.num_clusters(), 1);
        assert_eq!(assignment.noise_count(), 0);
    }

    #[test]
    fn test_hierarchical_linkages_on_features() {
        let points = blobs();
        let ids = ids(13);
        for linkage in [Linkage::Single, Linkage::Complete, Linkage::Average, Linkage::Ward] {
            let config = AlgorithmConfig::Hierarchical { n_clusters: 3, linkage };
            let assignment = config
                .assign(
                    ClusterInput::Features {
                        asset_ids: &ids,
                        values: &points,
                    },
                    0,
                    &budget(),
                )
                .unwrap();
            assert_eq!(sorted_sizes(&assignment), vec![6, 4, 3], "{:?}", linkage);
        }
    }

    fn similarity_matrix(values: &[Option<f64>], n: usize, metric: SimilarityMetric) -> SimilarityMatrix {
        let entries = values
            .iter()
            .map(|v| match v {
                Some(s) => PairValue::Value { raw: *s, similarity: *s },
                None => PairValue::Missing {
                    reason: "test".to_string(),
                },
            })
            .collect();
        SimilarityMatrix::new(metric, ids(n), entries).unwrap()
    }

    #[test]
    fn test_hierarchical_on_similarity_matrix() {
        // (0,1)=0.9 (0,2)=0.1 (0,3)=missing (1,2)=0.2 (1,3)=0.0 (2,3)=0.8
        let matrix = similarity_matrix(
            &[Some(0.9), Some(0.1), None, Some(0.2), Some(0.0), Some(0.8)],
            4,
            SimilarityMetric::Correlation,
        );
        let config = AlgorithmConfig::Hierarchical {
            n_clusters: 2,
            linkage: Linkage::Average,
        };
        let assignment = config.assign(ClusterInput::Similarity(&matrix), 0, &budget()).unwrap();
        assert_eq!(assignment.members(), vec![vec![0, 1], vec![2, 3]]);

        let ward = AlgorithmConfig::Hierarchical {
            n_clusters: 2,
            linkage: Linkage::Ward,
        };
        assert!(ward.assign(ClusterInput::Similarity(&matrix), 0, &budget()).is_err());
    }

    #[test]
    fn test_hierarchical_merge_ties_take_lowest_pair() {
        let matrix = similarity_matrix(&[Some(0.5); 3], 3, SimilarityMetric::Cosine);
        let config = AlgorithmConfig::Hierarchical {
            n_clusters: 2,
            linkage: Linkage::Single,
        };
        let assignment = config.assign(ClusterInput::Similarity(&matrix), 0, &budget()).unwrap();
        assert_eq!(assignment.members(), vec![vec![0, 1], vec![2]]);
    }

    fn two_triangles_graph() -> SimilarityGraph {
        let edge = |source, target, weight| Edge { source, target, weight };
        SimilarityGraph::from_edges(
            SimilarityMetric::Correlation,
            ids(7),
            vec![
                edge(0, 1, 0.9),
                edge(0, 2, 0.9),
                edge(1, 2, 0.9),
                edge(3, 4, 0.9),
                edge(3, 5, 0.9),
                edge(4, 5, 0.9),
                edge(2, 3, 0.1),
            ],
        )
    }

    #[test]
    fn test_louvain_splits_weakly_joined_triangles() {
        let graph = two_triangles_graph();
        let config = AlgorithmConfig::Graph {
            algorithm: CommunityAlgorithm::Louvain,
            isolated_nodes: IsolatedNodes::Exclude,
            max_iterations: 100,
        };
        let assignment = config.assign(ClusterInput::Graph(&graph), 0, &budget()).unwrap();
        assert_eq!(assignment.members(), vec![vec![0, 1, 2], vec![3, 4, 5]]);
        assert_eq!(assignment.noise_count(), 1);
        assert_eq!(assignment.labels()[6], ClusterLabel::Noise);
    }

    #[test]
    fn test_connected_components_and_singleton_isolates() {
        let graph = two_triangles_graph();
        let config = AlgorithmConfig::Graph {
            algorithm: CommunityAlgorithm::ConnectedComponents,
            isolated_nodes: IsolatedNodes::Singleton,
            max_iterations: 100,
        };
        let assignment = config.assign(ClusterInput::Graph(&graph), 0, &budget()).unwrap();
        assert_eq!(assignment.members(), vec![vec![0, 1, 2, 3, 4, 5], vec![6]]);
        assert_eq!(assignment.noise_count(), 0);
    }

    #[test]
    fn test_input_mismatch_is_config_error() {
        let graph = two_triangles_graph();
        let config = AlgorithmConfig::Dbscan {
            eps: 1.0,
            min_samples: 2,
        };
        assert!(matches!(
            config.assign(ClusterInput::Graph(&graph), 0, &budget()),
            Err(ClusteringError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_cancelled_budget_aborts() {
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let graph = two_triangles_graph();
        let config = AlgorithmConfig::Graph {
            algorithm: CommunityAlgorithm::Louvain,
            isolated_nodes: IsolatedNodes::Exclude,
            max_iterations: 100,
        };
        let result = config.assign(ClusterInput::Graph(&graph), 0, &ClusterBudget::unlimited(cancel));
        assert!(matches!(result, Err(ClusteringError::Cancelled)));
    }

    #[test]
    fn test_expired_time_budget_is_partial() {
        let graph = two_triangles_graph();
        let config = AlgorithmConfig::Graph {
            algorithm: CommunityAlgorithm::Louvain,
            isolated_nodes: IsolatedNodes::Exclude,
            max_iterations: 100,
        };
        let budget = ClusterBudget::new(CancellationFlag::new(), Some(Duration::ZERO));
        let assignment = config.assign(ClusterInput::Graph(&graph), 0, &budget).unwrap();
        assert!(assignment.convergence().is_partial());
        assert_eq!(assignment.len(), 7);
    }
}
