//! Built-in scenario catalog: two tutorial charts followed by six training charts.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::conversation::ConversationStep;

use super::model::{
    AxisBound, ChartConfig, ChartDataPoint, ChartSpec, ChartType, Scenario, ScenarioMode,
    ScriptedStep, SeriesNames,
};

/// Ordered, read-only list of scenarios.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioCatalog {
    scenarios: Vec<Scenario>,
}

impl ScenarioCatalog {
    /// Build a catalog from an explicit list. Order is play order.
    pub fn new(scenarios: Vec<Scenario>) -> Self {
        Self { scenarios }
    }

    /// The catalog shipped with the game.
    pub fn builtin() -> Self {
        Self::new(builtin_scenarios())
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Scenario> {
        self.scenarios.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter()
    }

    pub fn tutorial_count(&self) -> usize {
        self.scenarios.iter().filter(|s| s.is_tutorial()).count()
    }

    pub fn training_count(&self) -> usize {
        self.len() - self.tutorial_count()
    }

    /// Index of the first training scenario, or 0 if every scenario is a tutorial.
    pub fn first_training_index(&self) -> usize {
        self.scenarios
            .iter()
            .position(|s| !s.is_tutorial())
            .unwrap_or(0)
    }

    /// Position of `index` among the training levels, `None` for tutorial scenarios.
    pub fn training_level(&self, index: usize) -> Option<usize> {
        let scenario = self.get(index)?;
        if scenario.is_tutorial() {
            return None;
        }
        Some(
            self.scenarios[..index]
                .iter()
                .filter(|s| !s.is_tutorial())
                .count(),
        )
    }
}

impl Default for ScenarioCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn colors(values: &[&str]) -> Vec<String> {
    values.iter().map(|c| c.to_string()).collect()
}

fn series(value: &str) -> SeriesNames {
    SeriesNames {
        value: value.to_string(),
        value2: None,
    }
}

fn fixed(lo: f64, hi: f64) -> Option<(AxisBound, AxisBound)> {
    Some((AxisBound::Fixed(lo), AxisBound::Fixed(hi)))
}

fn from_zero() -> Option<(AxisBound, AxisBound)> {
    Some((AxisBound::Fixed(0.0), AxisBound::AUTO))
}

fn script(steps: [(&str, &str); 3]) -> ScenarioMode {
    let user_steps = [
        ConversationStep::UserCorrects,
        ConversationStep::UserExplainsFeature,
        ConversationStep::UserSuggestsFix,
    ];
    let steps: BTreeMap<_, _> = user_steps
        .into_iter()
        .zip(steps)
        .map(|(step, (hint, option))| {
            (
                step,
                ScriptedStep {
                    hint: hint.to_string(),
                    options: vec![option.to_string()],
                },
            )
        })
        .collect();
    ScenarioMode::Scripted { steps }
}

fn builtin_scenarios() -> Vec<Scenario> {
    vec![
        // ── Tutorial ────────────────────────────────────────────────────
        Scenario {
            id: 101,
            title: "Network Latency Log".to_string(),
            description: "Average server response time (ms) recorded during three consecutive stress tests.".to_string(),
            chart: ChartSpec {
                chart_type: ChartType::Line,
                data: vec![
                    ChartDataPoint::new("Test 1", 150.0),
                    ChartDataPoint::new("Test 2", 180.0),
                    ChartDataPoint::new("Test 3", 210.0),
                ],
                config: ChartConfig {
                    y_axis_domain: fixed(0.0, 250.0),
                    hide_y_axis: false,
                    reversed_y_axis: true,
                    colors: colors(&["#f59e0b"]),
                    show_grid: true,
                    series_names: series("Latency (ms)"),
                },
            },
            ai_context: "The Y-axis is inverted (0 is at the top, 250 at the bottom). Visually, the line is going 'down' from Test 1 to Test 3. You should interpret this 'downward' visual trend as a good thing, claiming that latency is decreasing and performance is improving, ignoring that the values are actually increasing (150->210).".to_string(),
            mode: script([
                (
                    "The bot thinks performance is improving because the line goes down. Correct it.",
                    "You're wrong! The latency is actually getting worse.",
                ),
                (
                    "Look closely at the Y-axis numbers.",
                    "The Y-axis is inverted! Higher numbers are at the bottom.",
                ),
                (
                    "How do we make the 'bad' trend look intuitively 'bad'?",
                    "Flip the axis back to normal so rising lines show rising values.",
                ),
            ]),
        },
        Scenario {
            id: 102,
            title: "Total Registered Users".to_string(),
            description: "Cumulative count of registered users over the last 4 quarters.".to_string(),
            chart: ChartSpec {
                chart_type: ChartType::Area,
                data: vec![
                    ChartDataPoint::new("Q1", 1000.0),
                    ChartDataPoint::new("Q2", 1900.0),
                    ChartDataPoint::new("Q3", 2500.0),
                    ChartDataPoint::new("Q4", 2800.0),
                ],
                config: ChartConfig {
                    y_axis_domain: from_zero(),
                    hide_y_axis: false,
                    reversed_y_axis: false,
                    colors: colors(&["#06b6d4"]),
                    show_grid: true,
                    series_names: series("Total Users"),
                },
            },
            ai_context: "This is a cumulative graph. The total is always rising. However, the *rate* of growth is slowing down massively (900 -> 600 -> 300). You should look at the rising slope and claim the company is exploding with growth and we are adding more users than ever before.".to_string(),
            mode: script([
                (
                    "The bot sees the total going up and assumes rapid growth. Correct it.",
                    "Look at the rate of growth, not just the total.",
                ),
                (
                    "What does a cumulative graph hide?",
                    "It hides the fact that we are acquiring fewer users each quarter.",
                ),
                (
                    "What is a better way to visualize current performance?",
                    "Plot 'New Users per Quarter' instead of 'Total Users'.",
                ),
            ]),
        },
        // ── Training ────────────────────────────────────────────────────
        Scenario {
            id: 1,
            title: "Annual Tax Rate".to_string(),
            description: "Corporate tax rate percentage changes over two fiscal years.".to_string(),
            chart: ChartSpec {
                chart_type: ChartType::Bar,
                data: vec![
                    ChartDataPoint::new("2022", 35.0),
                    ChartDataPoint::new("2023", 35.5),
                ],
                config: ChartConfig {
                    y_axis_domain: fixed(34.0, 36.0),
                    hide_y_axis: false,
                    reversed_y_axis: false,
                    colors: colors(&["#ef4444"]),
                    show_grid: true,
                    series_names: series("Tax Rate (%)"),
                },
            },
            ai_context: "The Y-axis is truncated (starts at 34, ends at 36). The visual difference between 35.0 and 35.5 looks huge (almost double). You should panic and say taxes have skyrocketed and nearly doubled.".to_string(),
            mode: ScenarioMode::FreeText,
        },
        Scenario {
            id: 2,
            title: "Company Valuation History".to_string(),
            description: "Stock price valuation recorded at specific milestones.".to_string(),
            chart: ChartSpec {
                chart_type: ChartType::Line,
                data: vec![
                    ChartDataPoint::new("2015", 100.0),
                    ChartDataPoint::new("2017", 120.0),
                    ChartDataPoint::new("2023", 150.0),
                ],
                config: ChartConfig {
                    y_axis_domain: fixed(0.0, 200.0),
                    hide_y_axis: false,
                    reversed_y_axis: false,
                    colors: colors(&["#10b981"]),
                    show_grid: true,
                    series_names: series("Stock Price ($)"),
                },
            },
            ai_context: "The X-axis has irregular time intervals (2 years between first two, 6 years between last two). The line looks straight and steady. You should claim the growth has been perfectly consistent and smooth for the last 8 years, ignoring the huge time gap where anything could have happened.".to_string(),
            mode: ScenarioMode::FreeText,
        },
        Scenario {
            id: 3,
            title: "Weekly Server Uptime".to_string(),
            description: "Server uptime percentage for selected days of the week.".to_string(),
            chart: ChartSpec {
                chart_type: ChartType::Bar,
                data: vec![
                    ChartDataPoint::new("Fri", 99.9),
                    ChartDataPoint::new("Sat", 99.95),
                    ChartDataPoint::new("Sun", 99.99),
                ],
                config: ChartConfig {
                    y_axis_domain: fixed(99.8, 100.0),
                    hide_y_axis: false,
                    reversed_y_axis: false,
                    colors: colors(&["#8b5cf6"]),
                    show_grid: true,
                    series_names: series("Uptime (%)"),
                },
            },
            ai_context: "The graph is cherry-picked. It only shows Friday, Saturday, and Sunday (weekend). You should conclude that the server is always improving and never crashes, ignoring that Monday-Thursday are missing.".to_string(),
            mode: ScenarioMode::FreeText,
        },
        Scenario {
            id: 4,
            title: "Environmental Correlation".to_string(),
            description: "Comparison of local ice cream sales and shark sightings.".to_string(),
            chart: ChartSpec {
                chart_type: ChartType::Line,
                data: vec![
                    ChartDataPoint::pair("June", 100.0, 5.0),
                    ChartDataPoint::pair("July", 150.0, 8.0),
                    ChartDataPoint::pair("Aug", 130.0, 6.0),
                    ChartDataPoint::pair("Sept", 80.0, 2.0),
                ],
                config: ChartConfig {
                    y_axis_domain: from_zero(),
                    hide_y_axis: false,
                    reversed_y_axis: false,
                    colors: colors(&["#f59e0b", "#6366f1"]),
                    show_grid: false,
                    series_names: SeriesNames {
                        value: "Ice Cream Sales".to_string(),
                        value2: Some("Shark Sightings".to_string()),
                    },
                },
            },
            ai_context: "The two lines move together perfectly. You should fall for the 'Spurious Correlation' fallacy and confidently claim that eating ice cream attracts sharks.".to_string(),
            mode: ScenarioMode::FreeText,
        },
        Scenario {
            id: 5,
            title: "Market Share Analysis".to_string(),
            description: "Comparison of market dominance between Product A and Product B.".to_string(),
            chart: ChartSpec {
                chart_type: ChartType::Bar,
                data: vec![
                    ChartDataPoint::new("Prod A", 32.0),
                    ChartDataPoint::new("Prod B", 34.0),
                ],
                config: ChartConfig {
                    y_axis_domain: fixed(30.0, 35.0),
                    hide_y_axis: true,
                    reversed_y_axis: false,
                    colors: colors(&["#ec4899"]),
                    show_grid: false,
                    series_names: series("Share"),
                },
            },
            ai_context: "The Y-axis has no numbers/labels. The visual difference makes Product B look much taller than A. You should claim Product B is vastly superior and dominating the market, ignoring that we don't know the actual scale.".to_string(),
            mode: ScenarioMode::FreeText,
        },
        Scenario {
            id: 6,
            title: "Regional Web Traffic".to_string(),
            description: "Total annual website visitors from two different regions.".to_string(),
            chart: ChartSpec {
                chart_type: ChartType::Bar,
                data: vec![
                    ChartDataPoint::new("USA", 50000.0),
                    ChartDataPoint::new("Iceland", 500.0),
                ],
                config: ChartConfig {
                    y_axis_domain: from_zero(),
                    hide_y_axis: false,
                    reversed_y_axis: false,
                    colors: colors(&["#3b82f6"]),
                    show_grid: true,
                    series_names: series("Total Visitors"),
                },
            },
            ai_context: "This graph compares total numbers without normalizing for population. The USA bar is huge, Iceland is tiny. You should say that people in the USA love the site much more than people in Iceland, ignoring the massive population difference.".to_string(),
            mode: ScenarioMode::FreeText,
        },
    ]
}
