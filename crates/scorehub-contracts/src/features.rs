use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected {expected} feature values, got {found}")]
pub struct ShapeError {
    pub expected: usize,
    pub found: usize,
}

/// Fixed-shape numeric input to a scoring model.
///
/// `NAMES` defines both the arity and the column order used when the vector is
/// encoded as a model row. Implementations must return values in that order.
pub trait FeatureVector {
    const NAMES: &'static [&'static str];

    fn values(&self) -> Vec<f64>;

    fn arity() -> usize {
        Self::NAMES.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringFeatures {
    pub credit_utilization_ratio: f64,
    pub payment_history: f64,
    pub length_of_credit_history: f64,
    pub number_of_open_credit_accounts: f64,
}

impl ScoringFeatures {
    pub fn new(
        credit_utilization_ratio: f64,
        payment_history: f64,
        length_of_credit_history: f64,
        number_of_open_credit_accounts: f64,
    ) -> Self {
        Self {
            credit_utilization_ratio,
            payment_history,
            length_of_credit_history,
            number_of_open_credit_accounts,
        }
    }

    pub fn from_values(values: &[f64]) -> Result<Self, ShapeError> {
        let [a, b, c, d] = values else {
            return Err(ShapeError {
                expected: Self::arity(),
                found: values.len(),
            });
        };
        Ok(Self::new(*a, *b, *c, *d))
    }
}

impl FeatureVector for ScoringFeatures {
    const NAMES: &'static [&'static str] = &[
        "credit_utilization_ratio",
        "payment_history",
        "length_of_credit_history",
        "number_of_open_credit_accounts",
    ];

    fn values(&self) -> Vec<f64> {
        vec![
            self.credit_utilization_ratio,
            self.payment_history,
            self.length_of_credit_history,
            self.number_of_open_credit_accounts,
        ]
    }
}
