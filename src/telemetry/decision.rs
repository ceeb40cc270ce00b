//! Routing Decision Engine
//!
//! Classifies the latest complete sample into a routing priority. Rules are a
//! data table ordered by priority; the first breached rule wins. Hypoxia
//! outranks tachycardia, which outranks fever, which outranks humidity.

use serde::Serialize;
use std::fmt;

use super::wire::{Sample, SensorField};
use crate::config::DecisionThresholds;

/// Routing classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    MedicalPriority,
    EmergencyRouting,
    AlertRouting,
    EnvironmentalRouting,
    NormalRouting,
    InsufficientData,
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MedicalPriority => "Medical Priority Path",
            Self::EmergencyRouting => "Emergency Routing",
            Self::AlertRouting => "Alert Routing",
            Self::EnvironmentalRouting => "Environmental Routing",
            Self::NormalRouting => "Normal Routing",
            Self::InsufficientData => "Insufficient Data",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::MedicalPriority => Severity::Critical,
            Self::EmergencyRouting => Severity::High,
            Self::AlertRouting => Severity::Elevated,
            Self::EnvironmentalRouting => Severity::Advisory,
            Self::NormalRouting => Severity::Normal,
            Self::InsufficientData => Severity::Unknown,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Elevated,
    Advisory,
    Normal,
    Unknown,
}

/// Per-field reading state, independent of the classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldState {
    Normal,
    High,
    Low,
    Absent,
}

impl FieldState {
    pub fn is_abnormal(&self) -> bool {
        matches!(self, Self::High | Self::Low)
    }
}

/// Strict threshold comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Above(f64),
    Below(f64),
}

impl Comparison {
    pub fn breached(&self, value: f64) -> bool {
        match *self {
            Self::Above(limit) => value > limit,
            Self::Below(limit) => value < limit,
        }
    }

    fn breach_state(&self) -> FieldState {
        match self {
            Self::Above(_) => FieldState::High,
            Self::Below(_) => FieldState::Low,
        }
    }
}

/// One row of the rule table
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoutingRule {
    /// Lower value wins
    pub priority: u8,
    pub field: SensorField,
    pub comparison: Comparison,
    pub classification: Classification,
}

/// Sample lacked readings required for a decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteSample {
    pub missing: Vec<SensorField>,
}

impl fmt::Display for IncompleteSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.missing.iter().map(|m| m.as_str()).collect();
        write!(f, "incomplete sample, missing: {}", names.join(", "))
    }
}

impl std::error::Error for IncompleteSample {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldStates {
    pub temperature: FieldState,
    pub humidity: FieldState,
    pub heart_rate: FieldState,
    pub spo2: FieldState,
}

impl FieldStates {
    pub fn get(&self, field: SensorField) -> FieldState {
        match field {
            SensorField::Temperature => self.temperature,
            SensorField::Humidity => self.humidity,
            SensorField::HeartRate => self.heart_rate,
            SensorField::Spo2 => self.spo2,
        }
    }
}

/// Result of evaluating one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub classification: Classification,
    pub severity: Severity,
    pub field_states: FieldStates,
}

/// Priority-ordered rule table. Pure and `Sync`; safe to share across threads.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<RoutingRule>,
}

impl RuleTable {
    pub fn new(mut rules: Vec<RoutingRule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        Self { rules }
    }

    pub fn from_thresholds(t: &DecisionThresholds) -> Self {
        Self::new(vec![
            RoutingRule {
                priority: 1,
                field: SensorField::Spo2,
                comparison: Comparison::Below(t.spo2_low),
                classification: Classification::MedicalPriority,
            },
            RoutingRule {
                priority: 2,
                field: SensorField::HeartRate,
                comparison: Comparison::Above(t.heart_rate_high),
                classification: Classification::EmergencyRouting,
            },
            RoutingRule {
                priority: 3,
                field: SensorField::Temperature,
                comparison: Comparison::Above(t.temperature_high),
                classification: Classification::AlertRouting,
            },
            RoutingRule {
                priority: 4,
                field: SensorField::Humidity,
                comparison: Comparison::Above(t.humidity_high),
                classification: Classification::EnvironmentalRouting,
            },
        ])
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// First breached rule wins; a complete sample breaching nothing is normal
    pub fn classify(&self, sample: &Sample) -> Result<Classification, IncompleteSample> {
        if !sample.is_complete() {
            return Err(IncompleteSample {
                missing: sample.missing(),
            });
        }

        let classification = self
            .rules
            .iter()
            .find(|rule| {
                sample
                    .get(rule.field)
                    .is_some_and(|v| rule.comparison.breached(v))
            })
            .map(|rule| rule.classification)
            .unwrap_or(Classification::NormalRouting);

        Ok(classification)
    }

    pub fn field_state(&self, sample: &Sample, field: SensorField) -> FieldState {
        let Some(value) = sample.get(field) else {
            return FieldState::Absent;
        };
        self.rules
            .iter()
            .filter(|rule| rule.field == field)
            .find(|rule| rule.comparison.breached(value))
            .map(|rule| rule.comparison.breach_state())
            .unwrap_or(FieldState::Normal)
    }

    pub fn field_states(&self, sample: &Sample) -> FieldStates {
        FieldStates {
            temperature: self.field_state(sample, SensorField::Temperature),
            humidity: self.field_state(sample, SensorField::Humidity),
            heart_rate: self.field_state(sample, SensorField::HeartRate),
            spo2: self.field_state(sample, SensorField::Spo2),
        }
    }

    /// Classification plus per-field states; incomplete samples map to `InsufficientData`
    pub fn evaluate(&self, sample: &Sample) -> Evaluation {
        let classification = self
            .classify(sample)
            .unwrap_or(Classification::InsufficientData);

        Evaluation {
            classification,
            severity: classification.severity(),
            field_states: self.field_states(sample),
        }
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::from_thresholds(&DecisionThresholds::default())
    }
}

/// Evaluate a sample against the reference thresholds
pub fn evaluate_decision(sample: &Sample) -> Evaluation {
    RuleTable::default().evaluate(sample)
}
