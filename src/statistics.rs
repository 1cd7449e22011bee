/// A simple statistics module with utility functions for goodness of fit and population summaries.
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Coefficient of variation of the root-mean-square error, in percent, with `n` in the
/// denominator. `None` when the observed mean is not positive or the inputs are empty.
pub fn cvrmse(observed: &[f64], predicted: &[f64]) -> Option<f64> {
    if observed.is_empty() || observed.len() != predicted.len() {
        return None;
    }
    let mean_observed = observed.mean();
    if mean_observed <= 0. || !mean_observed.is_finite() {
        return None;
    }
    let rms_residual = observed
        .iter()
        .zip(predicted)
        .map(|(o, p)| o - p)
        .quadratic_mean();

    Some(100. * rms_residual / mean_observed)
}

/// Summary of a set of values, as recorded for each generation's fitness.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Summary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

pub fn summarize(values: &[f64]) -> Summary {
    Summary {
        min: values.min(),
        max: values.max(),
        mean: values.mean(),
        std: values.population_std_dev(),
    }
}
