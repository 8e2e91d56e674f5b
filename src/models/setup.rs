//! Setup (resizing plan): how many entries a strategy uses and their weights.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::new_id;

/// Reasons a setup fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("setup must have at least one step")]
    NoSteps,

    #[error("setup has {actual} weights but {expected} steps")]
    WeightCountMismatch { expected: usize, actual: usize },

    #[error("weight {weight} for step {index} must be greater than 0")]
    NonPositiveWeight { index: usize, weight: Decimal },
}

/// Named entry plan with a fixed shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "SetupData")]
pub struct Setup {
    pub id: String,
    pub name: String,

    /// Number of planned entries
    pub step_count: usize,

    /// Relative cost weight per step, not required to sum to 1
    pub weights: Vec<Decimal>,

    /// Kept for positions that still reference it
    pub is_deleted: bool,
}

/// Wire form accepted on input; older exports use the `resizing*` names.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetupData {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "resizingTimes")]
    step_count: Option<usize>,
    #[serde(default, alias = "resizingRatios")]
    weights: Option<Vec<Decimal>>,
    #[serde(default)]
    is_deleted: bool,
}

impl From<SetupData> for Setup {
    fn from(data: SetupData) -> Self {
        let mut setup = Setup::new(
            data.name.filter(|n| !n.is_empty()).unwrap_or_else(|| "Default Setup".to_string()),
            data.step_count.filter(|c| *c > 0).unwrap_or(1),
            data.weights.unwrap_or_else(|| vec![Decimal::ONE]),
        );
        if let Some(id) = data.id.filter(|id| !id.is_empty()) {
            setup.id = id;
        }
        setup.is_deleted = data.is_deleted;
        setup
    }
}

impl Setup {
    /// Create a setup, padding missing weights with 1 or dropping extras so
    /// that `weights.len() == step_count`.
    pub fn new(name: impl Into<String>, step_count: usize, weights: Vec<Decimal>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            step_count,
            weights: reconcile(weights, step_count),
            is_deleted: false,
        }
    }

    /// Equal-weight plan with `step_count` entries.
    pub fn uniform(name: impl Into<String>, step_count: usize) -> Self {
        Self::new(name, step_count, vec![Decimal::ONE; step_count])
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        if self.step_count == 0 {
            return Err(SetupError::NoSteps);
        }
        if self.weights.len() != self.step_count {
            return Err(SetupError::WeightCountMismatch {
                expected: self.step_count,
                actual: self.weights.len(),
            });
        }
        if let Some((index, weight)) = self
            .weights
            .iter()
            .enumerate()
            .find(|(_, w)| **w <= Decimal::ZERO)
        {
            return Err(SetupError::NonPositiveWeight { index, weight: *weight });
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Replace the plan shape. The edit is only kept if it validates.
    pub fn update(
        &mut self,
        name: impl Into<String>,
        step_count: usize,
        weights: Vec<Decimal>,
    ) -> Result<(), SetupError> {
        let candidate = Setup {
            id: self.id.clone(),
            name: name.into(),
            step_count,
            weights: reconcile(weights, step_count),
            is_deleted: self.is_deleted,
        };
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    /// Weight of step `index`, zero when the plan has no such step.
    pub fn weight(&self, index: usize) -> Decimal {
        self.weights.get(index).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn total_weight(&self) -> Decimal {
        self.weights.iter().copied().sum()
    }

    pub fn is_active(&self) -> bool {
        !self.is_deleted
    }
}

impl Default for Setup {
    fn default() -> Self {
        Self::uniform("Default Setup", 1)
    }
}

fn reconcile(mut weights: Vec<Decimal>, step_count: usize) -> Vec<Decimal> {
    weights.resize(step_count, Decimal::ONE);
    weights
}
