//! Workflow model: stages of steps, as handed to an agent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Filter label value that matches any workflow label value.
pub const WILDCARD: &str = "*";

/// One unit of execution inside a stage.
///
/// `uuid` is generated once when the workflow is built and is the key used
/// for recovery lookups, so it must stay stable across agent restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Run while the workflow has no error.
    #[serde(default = "default_true")]
    pub on_success: bool,
    /// Run once the workflow has an error.
    #[serde(default)]
    pub on_failure: bool,
    /// Fire-and-forget (background services); never waited on.
    #[serde(default)]
    pub detached: bool,
}

fn default_true() -> bool {
    true
}

impl Step {
    /// Create a step with a fresh UUID that runs only on success.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            image: image.into(),
            commands: Vec::new(),
            entrypoint: Vec::new(),
            environment: HashMap::new(),
            on_success: true,
            on_failure: false,
            detached: false,
        }
    }

    /// Replace the generated UUID.
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    /// Append a command.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    /// Set an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Run only after the workflow has failed.
    pub fn on_failure_only(mut self) -> Self {
        self.on_success = false;
        self.on_failure = true;
        self
    }

    /// Run regardless of the workflow's error state.
    pub fn always(mut self) -> Self {
        self.on_success = true;
        self.on_failure = true;
        self
    }

    /// Mark as detached.
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    /// Run policy: whether this step is dispatched given the error state so far.
    pub fn should_run(&self, workflow_failed: bool) -> bool {
        (!workflow_failed && self.on_success) || (workflow_failed && self.on_failure)
    }
}

/// Steps launched together; completion order among them is unspecified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(default)]
    pub name: String,
    pub steps: Vec<Step>,
}

impl Stage {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }
}

/// Compiled pipeline: stages executed in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub stages: Vec<Stage>,
}

impl Config {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Every step, stage by stage.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.stages.iter().flat_map(|stage| stage.steps.iter())
    }

    /// Non-empty step UUIDs in stage-then-step order.
    pub fn step_uuids(&self) -> Vec<String> {
        self.steps()
            .filter(|step| !step.uuid.is_empty())
            .map(|step| step.uuid.clone())
            .collect()
    }
}

/// A unit of work assigned to an agent by `Peer::next`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub config: Config,
    /// Execution deadline in seconds; 0 means the agent's default.
    #[serde(default)]
    pub timeout: u64,
}

impl Workflow {
    pub fn new(id: impl Into<String>, config: Config) -> Self {
        Self {
            id: id.into(),
            config,
            timeout: 0,
        }
    }
}

/// Labels an agent advertises to the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl Filter {
    pub fn new(labels: HashMap<String, String>) -> Self {
        Self { labels }
    }

    /// Whether a workflow carrying `required` labels may be assigned to this agent.
    ///
    /// Every required `k=v` must be present in the filter with value `v` or `*`.
    pub fn matches(&self, required: &HashMap<String, String>) -> bool {
        required.iter().all(|(key, value)| {
            self.labels
                .get(key)
                .is_some_and(|have| have == value || have == WILDCARD)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_run_policy() {
        let normal = Step::new("build", "rust");
        assert!(normal.should_run(false));
        assert!(!normal.should_run(true));

        let cleanup = Step::new("notify", "alpine").on_failure_only();
        assert!(!cleanup.should_run(false));
        assert!(cleanup.should_run(true));

        let always = Step::new("report", "alpine").always();
        assert!(always.should_run(false));
        assert!(always.should_run(true));
    }

    #[test]
    fn test_step_uuids_in_order_skipping_empty() {
        let config = Config::new(vec![
            Stage::new(
                "one",
                vec![Step::new("a", "x").with_uuid("u1"), Step::new("b", "x").with_uuid("")],
            ),
            Stage::new("two", vec![Step::new("c", "x").with_uuid("u3")]),
        ]);
        assert_eq!(config.step_uuids(), vec!["u1", "u3"]);
    }

    #[test]
    fn test_step_defaults_from_json() {
        let step: Step = serde_json::from_str(r#"{"uuid": "u1", "name": "build"}"#).unwrap();
        assert!(step.on_success);
        assert!(!step.on_failure);
        assert!(!step.detached);
        assert!(step.commands.is_empty());
    }

    #[test]
    fn test_filter_subset_match() {
        let filter = Filter::new(labels(&[("arch", "amd64"), ("repo", "*")]));
        assert!(filter.matches(&HashMap::new()));
        assert!(filter.matches(&labels(&[("arch", "amd64")])));
        assert!(filter.matches(&labels(&[("arch", "amd64"), ("repo", "drover")])));
        assert!(!filter.matches(&labels(&[("arch", "arm64")])));
        assert!(!filter.matches(&labels(&[("gpu", "yes")])));
    }
}
