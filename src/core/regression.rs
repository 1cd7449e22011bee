use crate::core::utility_bills::NormalizedBills;
use crate::errors::{CalibrationError, ModelFitError};
use crate::input::{ConditioningFuels, FuelType};
use crate::statistics::cvrmse;
use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use tracing::{debug, instrument};

/// Observations required on each side of a candidate breakpoint.
const MIN_POINTS_PER_SEGMENT: usize = 2;
/// A more complex variant must beat a simpler one by more than this to be preferred.
const CVRMSE_TIE_TOLERANCE: f64 = 1e-9;
const SVD_EPSILON: f64 = 1e-12;

/// Change-point model shapes, declared from simplest to most complex.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumIter, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum ChangePointVariant {
    #[serde(rename = "1P")]
    #[strum(serialize = "1P")]
    Constant,
    #[serde(rename = "2P-heating")]
    #[strum(serialize = "2P-heating")]
    TwoParameterHeating,
    #[serde(rename = "2P-cooling")]
    #[strum(serialize = "2P-cooling")]
    TwoParameterCooling,
    #[serde(rename = "3P-heating")]
    #[strum(serialize = "3P-heating")]
    ThreeParameterHeating,
    #[serde(rename = "3P-cooling")]
    #[strum(serialize = "3P-cooling")]
    ThreeParameterCooling,
    #[serde(rename = "4P")]
    #[strum(serialize = "4P")]
    FourParameter,
    #[serde(rename = "5P")]
    #[strum(serialize = "5P")]
    FiveParameter,
}

impl ChangePointVariant {
    pub fn has_heating_term(&self) -> bool {
        matches!(
            self,
            Self::TwoParameterHeating
                | Self::ThreeParameterHeating
                | Self::FourParameter
                | Self::FiveParameter
        )
    }

    pub fn has_cooling_term(&self) -> bool {
        matches!(
            self,
            Self::TwoParameterCooling
                | Self::ThreeParameterCooling
                | Self::FourParameter
                | Self::FiveParameter
        )
    }
}

/// Daily consumption (kBtu/day) split into its temperature-independent and dependent parts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct DailyPrediction {
    pub baseload: f64,
    pub heating: f64,
    pub cooling: f64,
}

impl DailyPrediction {
    pub fn total(&self) -> f64 {
        self.baseload + self.heating + self.cooling
    }
}

/// A fitted piecewise-linear model of average daily consumption (kBtu/day) against average
/// daily temperature (°F).
///
/// Heating contributes `heating_slope * min(0, T - heating_breakpoint)` and cooling contributes
/// `cooling_slope * max(0, T - cooling_breakpoint)`, so with `heating_slope <= 0` and
/// `cooling_slope >= 0` both terms are non-negative.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ChangePointModel {
    pub variant: ChangePointVariant,
    pub baseload: f64,
    pub heating_slope: f64,
    pub cooling_slope: f64,
    pub heating_breakpoint: Option<f64>,
    pub cooling_breakpoint: Option<f64>,
    pub cvrmse: f64,
}

impl ChangePointModel {
    pub fn predict(&self, temperature_f: f64) -> DailyPrediction {
        DailyPrediction {
            baseload: self.baseload,
            heating: self
                .heating_breakpoint
                .map_or(0., |th| self.heating_slope * (temperature_f - th).min(0.)),
            cooling: self
                .cooling_breakpoint
                .map_or(0., |tc| self.cooling_slope * (temperature_f - tc).max(0.)),
        }
    }

    fn is_plausible(&self) -> bool {
        self.baseload >= 0.
            && self.heating_slope <= 0.
            && self.cooling_slope >= 0.
            && match (self.heating_breakpoint, self.cooling_breakpoint) {
                (Some(th), Some(tc)) => th <= tc,
                _ => true,
            }
    }
}

/// Fits every permitted change-point variant to a fuel's normalized bills and keeps the best.
#[derive(Clone, Debug)]
pub struct ChangePointRegression {
    max_cvrmse: f64,
    breakpoint_step: f64,
}

impl ChangePointRegression {
    pub fn new(max_cvrmse: f64, breakpoint_step: f64) -> Result<Self, CalibrationError> {
        if !(breakpoint_step.is_finite() && breakpoint_step > 0.) {
            return Err(CalibrationError::InvalidConfiguration(format!(
                "breakpoint step must be a positive number of degrees, got {breakpoint_step}"
            )));
        }

        Ok(Self {
            max_cvrmse,
            breakpoint_step,
        })
    }

    #[instrument(skip(self, bills, conditioning), fields(bills = bills.len()))]
    pub fn fit(
        &self,
        fuel_type: FuelType,
        bills: &NormalizedBills,
        conditioning: &ConditioningFuels,
    ) -> Result<ChangePointModel, ModelFitError> {
        let temperatures: Vec<f64> = bills.values().map(|b| b.average_temperature_f).collect();
        let consumption: Vec<f64> = bills.values().map(|b| b.daily_consumption).collect();
        let serves_heating = conditioning.serves_heating(fuel_type);
        let serves_cooling = conditioning.serves_cooling(fuel_type);

        let mut best: Option<ChangePointModel> = None;
        for variant in ChangePointVariant::iter() {
            if (variant.has_heating_term() && !serves_heating)
                || (variant.has_cooling_term() && !serves_cooling)
            {
                continue;
            }
            let Some(candidate) = self.fit_variant(variant, &temperatures, &consumption) else {
                debug!("No plausible {variant} fit for {fuel_type}");
                continue;
            };
            debug!("{fuel_type} {variant} CVRMSE {:.2}%", candidate.cvrmse);
            let improves = match &best {
                Some(b) => candidate.cvrmse < b.cvrmse - CVRMSE_TIE_TOLERANCE,
                None => true,
            };
            if improves {
                best = Some(candidate);
            }
        }

        match best {
            Some(model) if model.cvrmse <= self.max_cvrmse => Ok(model),
            best => Err(ModelFitError {
                fuel_type,
                max_cvrmse: self.max_cvrmse,
                best_cvrmse: best.map(|model| model.cvrmse),
            }),
        }
    }

    /// The lowest-CVRMSE plausible fit of one variant over its breakpoint candidates.
    fn fit_variant(
        &self,
        variant: ChangePointVariant,
        temperatures: &[f64],
        consumption: &[f64],
    ) -> Option<ChangePointModel> {
        let (min_t, max_t) = temperatures.iter().copied().minmax().into_option()?;
        let grid = self.breakpoint_grid(temperatures, min_t, max_t);

        let breakpoints: Vec<(Option<f64>, Option<f64>)> = match variant {
            ChangePointVariant::Constant => vec![(None, None)],
            ChangePointVariant::TwoParameterHeating => vec![(Some(max_t), None)],
            ChangePointVariant::TwoParameterCooling => vec![(None, Some(min_t))],
            ChangePointVariant::ThreeParameterHeating => {
                grid.iter().map(|&th| (Some(th), None)).collect()
            }
            ChangePointVariant::ThreeParameterCooling => {
                grid.iter().map(|&tc| (None, Some(tc))).collect()
            }
            ChangePointVariant::FourParameter => {
                grid.iter().map(|&t| (Some(t), Some(t))).collect()
            }
            ChangePointVariant::FiveParameter => grid
                .iter()
                .tuple_combinations()
                .map(|(&th, &tc)| (Some(th), Some(tc)))
                .collect(),
        };

        breakpoints
            .into_iter()
            .filter_map(|(th, tc)| fit_candidate(variant, th, tc, temperatures, consumption))
            .fold(None, |best: Option<ChangePointModel>, candidate| match best {
                Some(b) if b.cvrmse <= candidate.cvrmse => Some(b),
                _ => Some(candidate),
            })
    }

    /// Candidate breakpoints strictly inside the observed range with enough observations on
    /// each side.
    fn breakpoint_grid(&self, temperatures: &[f64], min_t: f64, max_t: f64) -> Vec<f64> {
        let steps = ((max_t - min_t) / self.breakpoint_step).ceil().max(0.) as usize;
        (1..steps)
            .map(|k| min_t + k as f64 * self.breakpoint_step)
            .filter(|&t| {
                t < max_t
                    && temperatures.iter().filter(|&&x| x < t).count() >= MIN_POINTS_PER_SEGMENT
                    && temperatures.iter().filter(|&&x| x > t).count()
                        >= MIN_POINTS_PER_SEGMENT
            })
            .collect()
    }
}

fn fit_candidate(
    variant: ChangePointVariant,
    heating_breakpoint: Option<f64>,
    cooling_breakpoint: Option<f64>,
    temperatures: &[f64],
    consumption: &[f64],
) -> Option<ChangePointModel> {
    let n = temperatures.len();
    let mut columns: Vec<Vec<f64>> = vec![vec![1.; n]];
    if let Some(th) = heating_breakpoint {
        columns.push(temperatures.iter().map(|t| (t - th).min(0.)).collect());
    }
    if let Some(tc) = cooling_breakpoint {
        columns.push(temperatures.iter().map(|t| (t - tc).max(0.)).collect());
    }
    if n < columns.len() {
        return None;
    }

    let design = DMatrix::from_fn(n, columns.len(), |i, j| columns[j][i]);
    let observed = DVector::from_column_slice(consumption);
    let coefficients = design.svd(true, true).solve(&observed, SVD_EPSILON).ok()?;

    let mut coefficients = coefficients.iter().copied();
    let baseload = coefficients.next()?;
    let heating_slope = match heating_breakpoint {
        Some(_) => coefficients.next()?,
        None => 0.,
    };
    let cooling_slope = match cooling_breakpoint {
        Some(_) => coefficients.next()?,
        None => 0.,
    };
    let mut model = ChangePointModel {
        variant,
        baseload,
        heating_slope,
        cooling_slope,
        heating_breakpoint,
        cooling_breakpoint,
        cvrmse: 0.,
    };
    if !model.is_plausible() {
        return None;
    }
    let predicted: Vec<f64> = temperatures
        .iter()
        .map(|&t| model.predict(t).total())
        .collect();
    model.cvrmse = cvrmse(consumption, &predicted)?;

    Some(model)
}
