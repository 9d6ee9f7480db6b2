pub mod approval;
pub mod finalize;
mod runner;
pub mod schema;
pub mod steps;

pub use runner::{ApplicationRunner, RunOptions, RunReport, RunnerError, StageReport, StepReport};
