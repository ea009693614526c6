//! Reductions applied to a completed batch's results.

use serde::{Deserialize, Serialize};

use crate::error::AggregateError;
use crate::task::Output;

/// Header the md_sim batch log starts with
pub const SIM_LOG_HEADER: &str = "SIMS \n";

/// Caller-selected reduction over a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Aggregation {
    Mean,
    Sum,
    Concat {
        #[serde(default)]
        header: Option<String>,
        separator: String,
    },
}

impl Aggregation {
    /// Newline-joined text
    pub fn lines() -> Self {
        Self::Concat {
            header: None,
            separator: "\n".into(),
        }
    }

    /// Newline-joined text under the simulation log header
    pub fn sim_log() -> Self {
        Self::Concat {
            header: Some(SIM_LOG_HEADER.into()),
            separator: "\n".into(),
        }
    }

    pub fn apply(&self, outputs: &[Output]) -> Result<Output, AggregateError> {
        match self {
            Self::Mean => mean(&numbers(outputs)?).map(Output::Number),
            Self::Sum => sum(&numbers(outputs)?).map(Output::Number),
            Self::Concat { header, separator } => {
                let parts = texts(outputs)?;
                concat(&parts, header.as_deref(), separator).map(Output::Text)
            }
        }
    }
}

/// Arithmetic mean, always within `[min, max]` of the inputs
pub fn mean(values: &[f64]) -> Result<f64, AggregateError> {
    let total = sum(values)?;
    let (min, max) = bounds(values);
    // sum / n can drift an ulp past the extremes
    Ok((total / values.len() as f64).clamp(min, max))
}

pub fn sum(values: &[f64]) -> Result<f64, AggregateError> {
    if values.is_empty() {
        return Err(AggregateError::Empty);
    }
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(AggregateError::NotNumeric { index });
    }
    Ok(values.iter().sum())
}

pub fn concat(
    parts: &[&str],
    header: Option<&str>,
    separator: &str,
) -> Result<String, AggregateError> {
    if parts.is_empty() {
        return Err(AggregateError::Empty);
    }
    Ok(format!("{}{}", header.unwrap_or_default(), parts.join(separator)))
}

fn bounds(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        })
}

fn numbers(outputs: &[Output]) -> Result<Vec<f64>, AggregateError> {
    outputs
        .iter()
        .enumerate()
        .map(|(index, o)| o.as_number().ok_or(AggregateError::NotNumeric { index }))
        .collect()
}

fn texts(outputs: &[Output]) -> Result<Vec<&str>, AggregateError> {
    outputs
        .iter()
        .enumerate()
        .map(|(index, o)| o.as_text().ok_or(AggregateError::NotText { index }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_of_estimates() {
        let m = mean(&[3.0, 3.2, 3.4]).unwrap();
        assert!((m - 3.2).abs() < 1e-12);
    }

    #[test]
    fn test_mean_stays_within_bounds() {
        let samples: &[&[f64]] = &[
            &[0.1, 0.1, 0.1],
            &[0.1, 0.2, 0.3, 0.4],
            &[4.0],
            &[1e308, 1e308],
            &[-2.5, 7.25, 0.0, 3.125, -0.5],
            &[3.16, 3.12, 3.2, 3.04, 3.28, 3.08],
        ];
        for values in samples {
            let m = mean(values).unwrap();
            let (lo, hi) = bounds(values);
            assert!(m >= lo && m <= hi, "{m} outside [{lo}, {hi}] for {values:?}");
        }
    }

    #[test]
    fn test_empty_aggregation_fails() {
        assert_eq!(mean(&[]), Err(AggregateError::Empty));
        assert_eq!(sum(&[]), Err(AggregateError::Empty));
        assert_eq!(concat(&[], None, "\n"), Err(AggregateError::Empty));
        assert_eq!(Aggregation::Mean.apply(&[]), Err(AggregateError::Empty));
        assert_eq!(Aggregation::lines().apply(&[]), Err(AggregateError::Empty));
    }

    #[test]
    fn test_non_finite_rejected() {
        assert_eq!(
            mean(&[1.0, f64::NAN]),
            Err(AggregateError::NotNumeric { index: 1 })
        );
    }

    #[test]
    fn test_apply_type_mismatch() {
        let outputs = vec![Output::Number(1.0), Output::Text("node-a".into())];
        assert_eq!(
            Aggregation::Mean.apply(&outputs),
            Err(AggregateError::NotNumeric { index: 1 })
        );
        assert_eq!(
            Aggregation::lines().apply(&outputs),
            Err(AggregateError::NotText { index: 0 })
        );
        assert_eq!(
            Aggregation::Sum.apply(&[Output::Record(serde_json::json!({"n": 1}))]),
            Err(AggregateError::NotNumeric { index: 0 })
        );
    }

    #[test]
    fn test_sim_log_format() {
        let outputs = vec![Output::Text("x1001c0s0b0n0".into()), Output::Text("x1001c0s0b1n0".into())];
        let log = Aggregation::sim_log().apply(&outputs).unwrap();
        assert_eq!(log, Output::Text("SIMS \nx1001c0s0b0n0\nx1001c0s0b1n0".into()));
    }

    #[test]
    fn test_sum() {
        let total = Aggregation::Sum
            .apply(&[Output::Number(1.5), Output::Number(2.5)])
            .unwrap();
        assert_eq!(total, Output::Number(4.0));
    }
}
