pub mod engine;
pub mod scenario_runner;
pub mod trace;

pub use engine::{LinkEventSummary, NodeId, Simulator};
pub use scenario_runner::{load_scenario, run_builtin_scenario, run_scenario, run_scenario_file};
pub use trace::SimulationReport;
