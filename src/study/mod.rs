//! Study protocol: email gate, A/B groups, and the survey dashboard.

pub mod group;
pub mod manager;
pub mod progress;
pub mod survey;

pub use group::UserGroup;
pub use manager::{Participant, StudyManager};
pub use progress::{DashboardStep, ProgressState, SurveyKind};
pub use survey::{SurveyConfig, SurveyLinks};
