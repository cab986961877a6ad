//! Scenario records: the chart, the trick, and the tutorial script.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::conversation::ConversationStep;

/// Chart family used to render a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Bar,
    Line,
    Area,
    Pie,
}

/// One x-axis category with one or two series values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartDataPoint {
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<f64>,
}

impl ChartDataPoint {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            value2: None,
        }
    }

    pub fn pair(name: impl Into<String>, value: f64, value2: f64) -> Self {
        Self {
            name: name.into(),
            value,
            value2: Some(value2),
        }
    }
}

/// One end of the y-axis domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisBound {
    Fixed(f64),
    Auto(AutoBound),
}

/// Marker serialized as the string `"auto"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoBound {
    Auto,
}

impl AxisBound {
    pub const AUTO: AxisBound = AxisBound::Auto(AutoBound::Auto);
}

/// Legend labels for the plotted series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesNames {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<String>,
}

/// Rendering hints. The misleading feature usually lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_axis_domain: Option<(AxisBound, AxisBound)>,
    #[serde(default)]
    pub hide_y_axis: bool,
    #[serde(default)]
    pub reversed_y_axis: bool,
    pub colors: Vec<String>,
    #[serde(default)]
    pub show_grid: bool,
    pub series_names: SeriesNames,
}

/// Chart specification handed to the presentation layer untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub data: Vec<ChartDataPoint>,
    pub config: ChartConfig,
}

/// Scripted input for one user step of a tutorial scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedStep {
    /// Instruction shown to the user.
    pub hint: String,
    /// Correct-by-construction replies offered as buttons.
    pub options: Vec<String>,
}

/// How the user answers in a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScenarioMode {
    /// Tutorial: multiple choice per step, guide persona disabled.
    Scripted {
        steps: BTreeMap<ConversationStep, ScriptedStep>,
    },
    /// Training: free text, guide persona enabled.
    FreeText,
}

/// Input resolved for the current step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepInput {
    Scripted { hint: String, options: Vec<String> },
    FreeText,
}

/// Immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub chart: ChartSpec,
    /// The trick: what is misleading, and the wrong reading the bot asserts first.
    pub ai_context: String,
    pub mode: ScenarioMode,
}

impl Scenario {
    pub fn is_tutorial(&self) -> bool {
        matches!(self.mode, ScenarioMode::Scripted { .. })
    }

    /// Resolve the input surface for `step`.
    ///
    /// Scripted options exist only on user steps of tutorial scenarios; a
    /// tutorial step without a script falls back to free text.
    pub fn input_for(&self, step: ConversationStep) -> StepInput {
        match &self.mode {
            ScenarioMode::Scripted { steps } if step.is_user_step() => steps
                .get(&step)
                .map(|s| StepInput::Scripted {
                    hint: s.hint.clone(),
                    options: s.options.clone(),
                })
                .unwrap_or(StepInput::FreeText),
            _ => StepInput::FreeText,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tutorial() -> Scenario {
        let mut steps = BTreeMap::new();
        steps.insert(
            ConversationStep::UserCorrects,
            ScriptedStep {
                hint: "Correct it.".to_string(),
                options: vec!["You're wrong!".to_string()],
            },
        );
        Scenario {
            id: 101,
            title: "Latency".to_string(),
            description: "ms".to_string(),
            chart: ChartSpec {
                chart_type: ChartType::Line,
                data: vec![ChartDataPoint::new("Test 1", 150.0)],
                config: ChartConfig {
                    y_axis_domain: Some((AxisBound::Fixed(0.0), AxisBound::Fixed(250.0))),
                    hide_y_axis: false,
                    reversed_y_axis: true,
                    colors: vec!["#f59e0b".to_string()],
                    show_grid: true,
                    series_names: SeriesNames {
                        value: "Latency (ms)".to_string(),
                        value2: None,
                    },
                },
            },
            ai_context: "inverted axis".to_string(),
            mode: ScenarioMode::Scripted { steps },
        }
    }

    #[test]
    fn scripted_input_only_on_user_steps() {
        let scenario = tutorial();
        assert!(scenario.is_tutorial());
        assert_eq!(
            scenario.input_for(ConversationStep::UserCorrects),
            StepInput::Scripted {
                hint: "Correct it.".to_string(),
                options: vec!["You're wrong!".to_string()],
            }
        );
        assert_eq!(
            scenario.input_for(ConversationStep::InitMisled),
            StepInput::FreeText
        );
        assert_eq!(
            scenario.input_for(ConversationStep::Completed),
            StepInput::FreeText
        );
        // No script for this step
        assert_eq!(
            scenario.input_for(ConversationStep::UserSuggestsFix),
            StepInput::FreeText
        );
    }

    #[test]
    fn free_text_scenario_never_scripts() {
        let mut scenario = tutorial();
        scenario.mode = ScenarioMode::FreeText;
        assert!(!scenario.is_tutorial());
        assert_eq!(
            scenario.input_for(ConversationStep::UserCorrects),
            StepInput::FreeText
        );
    }

    #[test]
    fn axis_bounds_serialize_like_chart_libraries_expect() {
        let domain = (AxisBound::Fixed(0.0), AxisBound::AUTO);
        let json = serde_json::to_value(domain).unwrap();
        assert_eq!(json, serde_json::json!([0.0, "auto"]));
        let back: (AxisBound, AxisBound) = serde_json::from_value(json).unwrap();
        assert_eq!(back.1, AxisBound::AUTO);
    }

    #[test]
    fn scripted_steps_serialize_with_step_keys() {
        let json = serde_json::to_value(&tutorial().mode).unwrap();
        assert_eq!(json["mode"], "scripted");
        assert_eq!(json["steps"]["user_corrects"]["options"][0], "You're wrong!");
    }
}
