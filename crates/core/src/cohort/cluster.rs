use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cohort::classifier::CohortThresholds;
use crate::cohort::normalize::{FeatureVector, NormalizedPopulation};
use crate::cohort::round2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    pub k: usize,
    pub max_iterations: usize,
    /// Largest centroid shift still considered converged.
    pub tolerance: f64,
    /// Fixed seed for reproducible runs; entropy when absent.
    pub seed: Option<u64>,
    pub timeout_secs: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self { k: 4, max_iterations: 100, tolerance: 0.01, seed: None, timeout_secs: 30 }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClusteringUnavailable {
    #[error("{users} users is not enough to form {k} clusters")]
    InsufficientPopulation { users: usize, k: usize },
    #[error("feature matrix contains non-finite values")]
    NonFinite,
    #[error("clustering did not finish within {secs}s")]
    TimedOut { secs: u64 },
    #[error("clustering worker failed: {0}")]
    Worker(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterName {
    #[serde(rename = "High Value Cluster")]
    HighValue,
    #[serde(rename = "High Frequency Cluster")]
    HighFrequency,
    #[serde(rename = "Inactive Cluster")]
    Inactive,
    #[serde(rename = "At Risk Cluster")]
    AtRisk,
    #[serde(rename = "Regular Customer")]
    Regular,
}

impl ClusterName {
    pub fn label(&self) -> &'static str {
        match self {
            Self::HighValue => "High Value Cluster",
            Self::HighFrequency => "High Frequency Cluster",
            Self::Inactive => "Inactive Cluster",
            Self::AtRisk => "At Risk Cluster",
            Self::Regular => "Regular Customer",
        }
    }
}

/// Member averages in source units, rounded to cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterCharacteristics {
    pub avg_cart_value: f64,
    pub avg_frequency: f64,
    pub avg_recency: f64,
    pub avg_lifetime_value: f64,
}

impl ClusterCharacteristics {
    fn from_vector(values: FeatureVector) -> Self {
        Self {
            avg_cart_value: round2(values[0]),
            avg_frequency: round2(values[1]),
            avg_recency: round2(values[2]),
            avg_lifetime_value: round2(values[3]),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterAnalysis {
    pub cluster_id: usize,
    pub name: ClusterName,
    pub user_count: usize,
    pub characteristics: ClusterCharacteristics,
    /// Final centroid mapped back to source units.
    pub centroid: ClusterCharacteristics,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KMeansResult {
    pub assignments: Vec<usize>,
    pub centroids: Vec<FeatureVector>,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClusteringOutcome {
    /// Cluster id per input row, in input order.
    pub assignments: Vec<usize>,
    pub clusters: Vec<ClusterAnalysis>,
    pub iterations: usize,
    pub converged: bool,
}

/// Lloyd's k-means with k-means++ seeding.
///
/// Stops once no centroid moves more than `tolerance`, or after `max_iterations`.
/// A cluster that loses all its points keeps its previous centroid.
pub fn kmeans<R: Rng + ?Sized>(
    points: &[FeatureVector],
    k: usize,
    max_iterations: usize,
    tolerance: f64,
    rng: &mut R,
) -> Result<KMeansResult, ClusteringUnavailable> {
    if k == 0 || points.len() < k {
        return Err(ClusteringUnavailable::InsufficientPopulation { users: points.len(), k });
    }
    if points.iter().flatten().any(|value| !value.is_finite()) {
        return Err(ClusteringUnavailable::NonFinite);
    }

    let mut centroids = seed_centroids(points, k, rng);
    let mut assignments = vec![0; points.len()];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        iterations += 1;
        assign(points, &centroids, &mut assignments);

        let updated = recompute_centroids(points, &assignments, &centroids);
        let shift = centroids
            .iter()
            .zip(&updated)
            .map(|(old, new)| squared_distance(old, new).sqrt())
            .fold(0.0_f64, f64::max);
        centroids = updated;

        if !shift.is_finite() {
            return Err(ClusteringUnavailable::NonFinite);
        }
        if shift <= tolerance {
            converged = true;
            break;
        }
    }
    assign(points, &centroids, &mut assignments);

    Ok(KMeansResult { assignments, centroids, iterations, converged })
}

fn seed_centroids<R: Rng + ?Sized>(
    points: &[FeatureVector],
    k: usize,
    rng: &mut R,
) -> Vec<FeatureVector> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())]);

    while centroids.len() < k {
        let weights: Vec<f64> = points
            .iter()
            .map(|point| {
                centroids
                    .iter()
                    .map(|centroid| squared_distance(point, centroid))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = weights.iter().sum();

        let index = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = points.len() - 1;
            for (index, weight) in weights.iter().enumerate() {
                if target < *weight {
                    chosen = index;
                    break;
                }
                target -= weight;
            }
            chosen
        } else {
            rng.gen_range(0..points.len())
        };
        centroids.push(points[index]);
    }

    centroids
}

fn assign(points: &[FeatureVector], centroids: &[FeatureVector], assignments: &mut [usize]) {
    for (point, slot) in points.iter().zip(assignments.iter_mut()) {
        *slot = nearest(point, centroids);
    }
}

fn nearest(point: &FeatureVector, centroids: &[FeatureVector]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (index, centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(point, centroid);
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }
    best
}

fn recompute_centroids(
    points: &[FeatureVector],
    assignments: &[usize],
    previous: &[FeatureVector],
) -> Vec<FeatureVector> {
    let mut sums = vec![[0.0; 4]; previous.len()];
    let mut counts = vec![0_usize; previous.len()];
    for (point, cluster) in points.iter().zip(assignments) {
        for (sum, value) in sums[*cluster].iter_mut().zip(point) {
            *sum += value;
        }
        counts[*cluster] += 1;
    }

    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), old)| {
            if count == 0 {
                *old
            } else {
                sum.map(|value| value / count as f64)
            }
        })
        .collect()
}

fn squared_distance(a: &FeatureVector, b: &FeatureVector) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Runs k-means over a normalized population and characterizes each cluster.
#[derive(Clone, Debug, Default)]
pub struct ClusterEngine {
    config: ClusteringConfig,
    thresholds: CohortThresholds,
}

impl ClusterEngine {
    pub fn new(config: ClusteringConfig, thresholds: CohortThresholds) -> Self {
        Self { config, thresholds }
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    pub fn analyze<R: Rng + ?Sized>(
        &self,
        population: &NormalizedPopulation,
        rng: &mut R,
    ) -> Result<ClusteringOutcome, ClusteringUnavailable> {
        let result = kmeans(
            &population.points(),
            self.config.k,
            self.config.max_iterations,
            self.config.tolerance,
            rng,
        )?;

        let mut sums = vec![[0.0; 4]; self.config.k];
        let mut counts = vec![0_usize; self.config.k];
        for (raw, cluster) in population.raw.iter().zip(&result.assignments) {
            for (sum, value) in sums[*cluster].iter_mut().zip(raw) {
                *sum += value;
            }
            counts[*cluster] += 1;
        }

        let clusters = sums
            .into_iter()
            .zip(counts)
            .zip(&result.centroids)
            .enumerate()
            .filter(|(_, ((_, count), _))| *count > 0)
            .map(|(cluster_id, ((sum, count), centroid))| {
                let averages = sum.map(|value| value / count as f64);
                ClusterAnalysis {
                    cluster_id,
                    name: self.name_for(&averages),
                    user_count: count,
                    characteristics: ClusterCharacteristics::from_vector(averages),
                    centroid: ClusterCharacteristics::from_vector(
                        population.stats.denormalize(centroid),
                    ),
                }
            })
            .collect();

        Ok(ClusteringOutcome {
            assignments: result.assignments,
            clusters,
            iterations: result.iterations,
            converged: result.converged,
        })
    }

    /// Names a cluster from its member averages. Diagnostic only; never a user's cohort.
    pub fn name_for(&self, averages: &FeatureVector) -> ClusterName {
        let t = &self.thresholds;
        let [cart, frequency, recency, _] = *averages;

        if cart > t.high_spender_amount.to_f64().unwrap_or(f64::INFINITY) {
            ClusterName::HighValue
        } else if frequency > t.frequent_buyer_orders_per_month {
            ClusterName::HighFrequency
        } else if recency > t.inactive_days as f64 {
            ClusterName::Inactive
        } else if recency > t.at_risk_days as f64 {
            ClusterName::AtRisk
        } else {
            ClusterName::Regular
        }
    }
}
