//! Scenario catalog: the misleading charts the bot is taught about.

pub mod catalog;
pub mod model;

pub use catalog::ScenarioCatalog;
pub use model::{
    AxisBound, ChartConfig, ChartDataPoint, ChartSpec, ChartType, Scenario, ScenarioMode,
    ScriptedStep, SeriesNames, StepInput,
};
