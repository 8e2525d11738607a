//! The simulation tick engine: virtual buses advancing along subdivided
//! route polylines with adaptive speed, traffic drift, stop dwell and
//! passenger churn. Buses under driver control (or in their grace window)
//! are skipped each tick and resumed teleport-free afterwards.

mod bus;
mod engine;

pub use bus::SimBusSnapshot;
pub use engine::{SimulationConfig, SimulationEngine, COVERAGE_INTERVAL_SECS, TICK_INTERVAL};
