use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::domain::user::{ClusterFeatures, UserMetrics};

/// Recency assumed for users who never placed a qualifying order.
pub const NO_ORDER_RECENCY_DAYS: i64 = 365;

/// (cart value, orders per month, recency days, lifetime value)
pub type FeatureVector = [f64; 4];

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureRange {
    pub min: f64,
    pub max: f64,
}

impl FeatureRange {
    fn spanning(values: impl Iterator<Item = f64>) -> Self {
        let mut range = Self { min: f64::INFINITY, max: f64::NEG_INFINITY };
        for value in values {
            range.min = range.min.min(value);
            range.max = range.max.max(value);
        }
        if range.min > range.max {
            return Self { min: 0.0, max: 0.0 };
        }
        range
    }

    pub fn is_degenerate(&self) -> bool {
        self.max <= self.min
    }

    pub fn scale(&self, value: f64) -> f64 {
        if self.is_degenerate() {
            return 0.0;
        }
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    /// Scales so that the population minimum maps to 1.
    pub fn scale_inverted(&self, value: f64) -> f64 {
        if self.is_degenerate() {
            return 0.0;
        }
        ((self.max - value) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    pub fn unscale(&self, normalized: f64) -> f64 {
        self.min + normalized * (self.max - self.min)
    }

    pub fn unscale_inverted(&self, normalized: f64) -> f64 {
        self.max - normalized * (self.max - self.min)
    }
}

/// Population min/max for each feature, computed once per run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PopulationStats {
    pub cart_value: FeatureRange,
    pub frequency: FeatureRange,
    pub recency: FeatureRange,
    pub lifetime_value: FeatureRange,
}

impl PopulationStats {
    pub fn normalize(&self, raw: &FeatureVector) -> ClusterFeatures {
        ClusterFeatures {
            normalized_cart_value: self.cart_value.scale(raw[0]),
            normalized_frequency: self.frequency.scale(raw[1]),
            normalized_recency: self.recency.scale_inverted(raw[2]),
            normalized_lifetime_value: self.lifetime_value.scale(raw[3]),
        }
    }

    /// Maps a point in feature space back to source units.
    pub fn denormalize(&self, point: &FeatureVector) -> FeatureVector {
        [
            self.cart_value.unscale(point[0]),
            self.frequency.unscale(point[1]),
            self.recency.unscale_inverted(point[2]),
            self.lifetime_value.unscale(point[3]),
        ]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedPopulation {
    pub raw: Vec<FeatureVector>,
    pub features: Vec<ClusterFeatures>,
    pub stats: PopulationStats,
}

impl NormalizedPopulation {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn points(&self) -> Vec<FeatureVector> {
        self.features.iter().map(ClusterFeatures::to_vector).collect()
    }
}

impl ClusterFeatures {
    pub fn to_vector(&self) -> FeatureVector {
        [
            self.normalized_cart_value,
            self.normalized_frequency,
            self.normalized_recency,
            self.normalized_lifetime_value,
        ]
    }
}

pub fn raw_features(metrics: &UserMetrics) -> FeatureVector {
    [
        metrics.avg_cart_value.to_f64().unwrap_or(0.0),
        metrics.order_frequency,
        metrics.days_since_last_order.unwrap_or(NO_ORDER_RECENCY_DAYS) as f64,
        metrics.lifetime_value.to_f64().unwrap_or(0.0),
    ]
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FeatureNormalizer;

impl FeatureNormalizer {
    /// Min-max scales the population into [0,1]^4, preserving input order.
    pub fn normalize<'a>(
        &self,
        population: impl IntoIterator<Item = &'a UserMetrics>,
    ) -> NormalizedPopulation {
        let raw: Vec<FeatureVector> = population.into_iter().map(raw_features).collect();
        let column = |index: usize| raw.iter().map(move |row| row[index]);
        let stats = PopulationStats {
            cart_value: FeatureRange::spanning(column(0)),
            frequency: FeatureRange::spanning(column(1)),
            recency: FeatureRange::spanning(column(2)),
            lifetime_value: FeatureRange::spanning(column(3)),
        };
        let features = raw.iter().map(|row| stats.normalize(row)).collect();

        NormalizedPopulation { raw, features, stats }
    }
}
