use crate::core::regression::DailyPrediction;
use crate::input::FuelType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use strum_macros::{Display, EnumIter};

#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumIter, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EndUse {
    Baseload,
    Heating,
    Cooling,
}

/// Annual energy of one fuel split by end use, in MBtu.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct EndUseConsumption {
    pub baseload: f64,
    pub heating: f64,
    pub cooling: f64,
}

impl EndUseConsumption {
    pub fn get(&self, end_use: EndUse) -> f64 {
        match end_use {
            EndUse::Baseload => self.baseload,
            EndUse::Heating => self.heating,
            EndUse::Cooling => self.cooling,
        }
    }

    pub fn add(&mut self, end_use: EndUse, amount: f64) {
        match end_use {
            EndUse::Baseload => self.baseload += amount,
            EndUse::Heating => self.heating += amount,
            EndUse::Cooling => self.cooling += amount,
        }
    }

    pub fn total(&self) -> f64 {
        self.baseload + self.heating + self.cooling
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            baseload: self.baseload * factor,
            heating: self.heating * factor,
            cooling: self.cooling * factor,
        }
    }
}

impl AddAssign for EndUseConsumption {
    fn add_assign(&mut self, other: Self) {
        self.baseload += other.baseload;
        self.heating += other.heating;
        self.cooling += other.cooling;
    }
}

impl From<DailyPrediction> for EndUseConsumption {
    fn from(prediction: DailyPrediction) -> Self {
        Self {
            baseload: prediction.baseload,
            heating: prediction.heating,
            cooling: prediction.cooling,
        }
    }
}

/// End-use consumption (MBtu) per fuel. Bill-derived targets and simulator results share this
/// shape so they can be compared directly.
pub type DisaggregatedConsumption = IndexMap<FuelType, EndUseConsumption>;
