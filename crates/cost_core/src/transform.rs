//! Log transforms applied to predictors and targets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the regression is modeled on a `log1p` scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogTransform {
    #[default]
    None,
    Input,
    Output,
    Both,
}

impl LogTransform {
    pub const ALL: [LogTransform; 4] = [
        LogTransform::None,
        LogTransform::Input,
        LogTransform::Output,
        LogTransform::Both,
    ];

    pub fn logs_input(self) -> bool {
        matches!(self, LogTransform::Input | LogTransform::Both)
    }

    pub fn logs_output(self) -> bool {
        matches!(self, LogTransform::Output | LogTransform::Both)
    }

    pub fn label(self) -> &'static str {
        match self {
            LogTransform::None => "none",
            LogTransform::Input => "input",
            LogTransform::Output => "output",
            LogTransform::Both => "both",
        }
    }

    pub fn forward_row(self, row: &[f64]) -> Vec<f64> {
        if self.logs_input() {
            row.iter().map(|v| v.ln_1p()).collect()
        } else {
            row.to_vec()
        }
    }

    pub fn inverse_row(self, row: &[f64]) -> Vec<f64> {
        if self.logs_input() {
            row.iter().map(|v| v.exp_m1()).collect()
        } else {
            row.to_vec()
        }
    }

    pub fn forward_rows(self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.forward_row(r)).collect()
    }

    pub fn forward_target(self, value: f64) -> f64 {
        if self.logs_output() {
            value.ln_1p()
        } else {
            value
        }
    }

    pub fn inverse_target(self, value: f64) -> f64 {
        if self.logs_output() {
            value.exp_m1()
        } else {
            value
        }
    }
}

impl fmt::Display for LogTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Derived predictor columns appended before any scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeatureExpansion {
    #[default]
    Identity,
    /// Append `log1p` of every raw predictor
    AppendLog1p,
}

impl FeatureExpansion {
    pub fn expand(self, row: &[f64]) -> Vec<f64> {
        match self {
            FeatureExpansion::Identity => row.to_vec(),
            FeatureExpansion::AppendLog1p => row
                .iter()
                .copied()
                .chain(row.iter().map(|v| v.ln_1p()))
                .collect(),
        }
    }

    pub fn expand_rows(self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.expand(r)).collect()
    }
}
