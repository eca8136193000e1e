//! Transaction economics and action intents
//!
//! Gas quoting for bridge operations and the intents the state machines
//! hand to whatever submits transactions.

mod gas;
mod intent;

pub use gas::{GasEstimator, GasLeg, GasOptimization, GasPrice, LegRole};
pub use intent::ActionIntent;
