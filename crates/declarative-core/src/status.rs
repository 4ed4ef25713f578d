//! Status and condition model written back onto the reconciled object
//!
//! All `with_*` methods return a modified copy; the original is untouched.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::resource::Resource;

/// Coarse lifecycle state of a reconciled object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    Ready,
    #[default]
    Processing,
    Error,
    Deleting,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Ready => "Ready",
            State::Processing => "Processing",
            State::Error => "Error",
            State::Deleting => "Deleting",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// A single typed condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(type_: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: String::new(),
            message: String::new(),
            observed_generation: 0,
            last_transition_time: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.observed_generation = generation;
        self
    }
}

/// Ordered conditions keyed by type, one entry per type
///
/// Setting an existing type replaces it in place and keeps its position.
/// Serialized as a plain list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions(IndexMap<String, Condition>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a condition
    ///
    /// The transition time only moves when the status actually changes.
    pub fn set(&mut self, mut condition: Condition) {
        let now = Utc::now();
        match self.0.get(&condition.type_) {
            Some(existing) if existing.status == condition.status => {
                condition.last_transition_time = existing.last_transition_time.or(Some(now));
            }
            _ => condition.last_transition_time = Some(now),
        }
        self.0.insert(condition.type_.clone(), condition);
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.get(type_)
    }

    pub fn contains(&self, type_: &str) -> bool {
        self.0.contains_key(type_)
    }

    /// Whether the condition exists and is True
    pub fn is_true(&self, type_: &str) -> bool {
        self.get(type_)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Conditions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.values())
    }
}

impl<'de> Deserialize<'de> for Conditions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let list = Vec::<Condition>::deserialize(deserializer)?;
        let mut conditions = Conditions::new();
        for condition in list {
            conditions.0.insert(condition.type_.clone(), condition);
        }
        Ok(conditions)
    }
}

/// Human readable record of the last thing the engine did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    pub operation: String,
    pub last_update_time: DateTime<Utc>,
}

/// Status exposed and accepted by a reconciled object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default)]
    pub state: State,

    #[serde(default)]
    pub conditions: Conditions,

    /// Resources applied and owned as of the last successful pass
    #[serde(default)]
    pub synced: Vec<Resource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,
}

impl Status {
    pub fn with_state(&self, state: State) -> Self {
        let mut status = self.clone();
        status.state = state;
        status
    }

    /// Record an error as the last operation
    pub fn with_err(&self, err: &dyn std::error::Error) -> Self {
        self.with_operation(err.to_string())
    }

    pub fn with_operation(&self, operation: impl Into<String>) -> Self {
        let mut status = self.clone();
        status.last_operation = Some(LastOperation {
            operation: operation.into(),
            last_update_time: Utc::now(),
        });
        status
    }

    pub fn with_synced(&self, synced: Vec<Resource>) -> Self {
        let mut status = self.clone();
        status.synced = synced;
        status
    }

    pub fn with_condition(&self, condition: Condition) -> Self {
        let mut status = self.clone();
        status.conditions.set(condition);
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::GroupVersionKind;

    #[test]
    fn test_conditions_upsert_preserves_order() {
        let mut conditions = Conditions::new();
        conditions.set(Condition::new("Resources", ConditionStatus::False));
        conditions.set(Condition::new("Installation", ConditionStatus::False));
        conditions.set(Condition::new("Resources", ConditionStatus::True).with_reason("Ready"));

        let types: Vec<&str> = conditions.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(types, vec!["Resources", "Installation"]);
        assert_eq!(conditions.len(), 2);
        assert!(conditions.is_true("Resources"));
        assert!(!conditions.is_true("Installation"));
        assert!(!conditions.is_true("Missing"));
    }

    #[test]
    fn test_transition_time_kept_when_status_unchanged() {
        let mut conditions = Conditions::new();
        conditions.set(Condition::new("Ready", ConditionStatus::True));
        let first = conditions.get("Ready").unwrap().last_transition_time;

        conditions.set(Condition::new("Ready", ConditionStatus::True).with_message("still"));
        let second = conditions.get("Ready").unwrap();
        assert_eq!(second.last_transition_time, first);
        assert_eq!(second.message, "still");
    }

    #[test]
    fn test_with_methods_return_copies() {
        let status = Status::default();
        let errored = status
            .with_state(State::Error)
            .with_operation("render failed");

        assert_eq!(status.state, State::Processing);
        assert!(status.last_operation.is_none());
        assert_eq!(errored.state, State::Error);
        assert_eq!(errored.last_operation.unwrap().operation, "render failed");
    }

    #[test]
    fn test_with_err_records_message() {
        let err = std::io::Error::other("disk gone");
        let status = Status::default().with_err(&err);
        assert_eq!(status.last_operation.unwrap().operation, "disk gone");
    }

    #[test]
    fn test_status_serializes_conditions_as_list() {
        let status = Status::default()
            .with_condition(Condition::new("Installation", ConditionStatus::True))
            .with_synced(vec![Resource::new(
                "web",
                "default",
                GroupVersionKind::new("apps", "v1", "Deployment"),
            )]);

        let json = serde_json::to_value(&status).unwrap();
        assert!(json["conditions"].is_array());
        assert_eq!(json["conditions"][0]["type"], "Installation");
        assert_eq!(json["synced"][0]["kind"], "Deployment");

        let back: Status = serde_json::from_value(json).unwrap();
        assert!(back.conditions.is_true("Installation"));
        assert_eq!(back.synced.len(), 1);
    }
}
