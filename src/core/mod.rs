pub mod building_modifications;
pub mod calibration;
pub mod consumption;
pub mod degree_days;
pub mod inverse_model;
pub mod regression;
pub mod simulators;
pub mod units;
pub mod utility_bills;
pub mod weather;
