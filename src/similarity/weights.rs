// Per-dimension weights applied at query time

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::features::{Feature, FEATURE_COUNT};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WeightError {
    #[error("unknown feature dimension '{0}'")]
    UnknownFeature(String),

    #[error("weight for '{feature}' must be positive and finite, got {value}")]
    NotPositive { feature: Feature, value: f64 },
}

/// Positive multipliers, one per feature dimension, in column order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeights([f64; FEATURE_COUNT]);

impl Default for FeatureWeights {
    fn default() -> Self {
        let mut w = [1.0; FEATURE_COUNT];
        for feature in Feature::ALL {
            w[feature.index()] = default_weight(feature);
        }
        Self(w)
    }
}

/// Reference weighting of each dimension.
pub fn default_weight(feature: Feature) -> f64 {
    match feature {
        Feature::PitchMean => 0.7,
        Feature::PitchStd => 2.0,
        Feature::DurationMean => 1.0,
        Feature::DurationStd => 1.0,
        Feature::IoiMean => 1.5,
        Feature::IoiStd => 2.0,
        Feature::SyncopationRatio => 2.0,
        Feature::Tempo => 0.5,
        Feature::IntervalStd => 1.8,
        Feature::ContourSlope => 1.2,
    }
}

impl FeatureWeights {
    /// All weights equal to 1.
    pub fn uniform() -> Self {
        Self([1.0; FEATURE_COUNT])
    }

    /// Build weights from name -> value pairs. Dimensions not named keep
    /// their default weight.
    pub fn from_map<'a, S>(overrides: impl IntoIterator<Item = (&'a S, &'a f64)>) -> Result<Self, WeightError>
    where
        S: AsRef<str> + 'a,
    {
        Self::default().merged(overrides)
    }

    /// Copy with the named dimensions replaced; the rest keep this value.
    pub fn merged<'a, S>(mut self, overrides: impl IntoIterator<Item = (&'a S, &'a f64)>) -> Result<Self, WeightError>
    where
        S: AsRef<str> + 'a,
    {
        for (name, &value) in overrides {
            let feature = Feature::from_name(name.as_ref())
                .ok_or_else(|| WeightError::UnknownFeature(name.as_ref().to_string()))?;
            self = self.with(feature, value)?;
        }
        Ok(self)
    }

    /// Copy with one dimension replaced.
    pub fn with(mut self, feature: Feature, value: f64) -> Result<Self, WeightError> {
        if !(value.is_finite() && value > 0.0) {
            return Err(WeightError::NotPositive { feature, value });
        }
        self.0[feature.index()] = value;
        Ok(self)
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.0[feature.index()]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Name -> value, sorted by name; the shape used in config files.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        Feature::ALL
            .iter()
            .map(|f| (f.name().to_string(), self.get(*f)))
            .collect()
    }
}
