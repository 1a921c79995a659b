//! Plan construction and validation
//!
//! A `Plan` is the unit submitted for execution: a fresh execution id plus the
//! ordered steps of one run. Plans are validated eagerly so a malformed
//! dependency graph never reaches the scheduler.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::step::Step;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("Duplicate step id: {0}")]
    DuplicateStep(String),

    #[error("Step '{step}' depends on non-existent step '{dependency}'")]
    MissingDependency { step: String, dependency: String },

    #[error("Cyclic dependency detected between steps: {0:?}")]
    CyclicDependency(Vec<String>),

    #[error("Step '{0}' must allow at least one attempt")]
    InvalidMaxAttempts(String),

    #[error("Step id must not be empty")]
    EmptyStepId,
}

/// An immutable, validated set of steps for one execution run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PlanSpec", into = "PlanSpec")]
pub struct Plan {
    execution_id: Uuid,
    test_id: Option<String>,
    steps: Vec<Step>,
}

/// Serialized form of a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,

    pub steps: Vec<Step>,
}

impl TryFrom<PlanSpec> for Plan {
    type Error = PlanError;

    fn try_from(spec: PlanSpec) -> Result<Self, Self::Error> {
        validate_steps(&spec.steps)?;
        Ok(Self {
            execution_id: spec.execution_id.unwrap_or_else(Uuid::new_v4),
            test_id: spec.test_id,
            steps: spec.steps,
        })
    }
}

impl From<Plan> for PlanSpec {
    fn from(plan: Plan) -> Self {
        Self {
            execution_id: Some(plan.execution_id),
            test_id: plan.test_id,
            steps: plan.steps,
        }
    }
}

impl Plan {
    /// Build a plan with a freshly generated execution id
    pub fn new(steps: Vec<Step>) -> Result<Self, PlanError> {
        PlanSpec {
            execution_id: None,
            test_id: None,
            steps,
        }
        .try_into()
    }

    /// Build a plan for a specific test
    pub fn for_test(test_id: impl Into<String>, steps: Vec<Step>) -> Result<Self, PlanError> {
        PlanSpec {
            execution_id: None,
            test_id: Some(test_id.into()),
            steps,
        }
        .try_into()
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn test_id(&self) -> Option<&str> {
        self.test_id.as_deref()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Group step ids into levels where every step only depends on earlier levels
    pub fn execution_levels(&self) -> Vec<Vec<String>> {
        compute_execution_levels(&self.steps).unwrap_or_default()
    }
}

fn validate_steps(steps: &[Step]) -> Result<(), PlanError> {
    let mut ids = HashSet::new();
    for step in steps {
        if step.id.is_empty() {
            return Err(PlanError::EmptyStepId);
        }
        if !ids.insert(step.id.as_str()) {
            return Err(PlanError::DuplicateStep(step.id.clone()));
        }
        if step.max_attempts == 0 {
            return Err(PlanError::InvalidMaxAttempts(step.id.clone()));
        }
    }

    for step in steps {
        if let Some(dep) = &step.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(PlanError::MissingDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    compute_execution_levels(steps).map(|_| ())
}

fn compute_execution_levels(steps: &[Step]) -> Result<Vec<Vec<String>>, PlanError> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in steps {
        in_degree.entry(step.id.as_str()).or_insert(0);
        if let Some(dep) = &step.depends_on {
            *in_degree.entry(step.id.as_str()).or_insert(0) += 1;
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(step.id.as_str());
        }
    }

    let mut levels: Vec<Vec<String>> = Vec::new();
    let mut current_level: Vec<String> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id.to_string())
        .collect();

    current_level.sort();

    while !current_level.is_empty() {
        let mut next_level = Vec::new();
        for id in &current_level {
            if let Some(deps) = dependents.get(id.as_str()) {
                for &dep in deps {
                    if let Some(degree) = in_degree.get_mut(dep) {
                        *degree -= 1;
                        if *degree == 0 {
                            next_level.push(dep.to_string());
                        }
                    }
                }
            }
        }
        next_level.sort();
        levels.push(std::mem::replace(&mut current_level, next_level));
    }

    let processed: HashSet<&str> = levels.iter().flatten().map(|s| s.as_str()).collect();
    if processed.len() != in_degree.len() {
        let mut cycle: Vec<String> = in_degree
            .keys()
            .filter(|id| !processed.contains(*id))
            .map(|id| id.to_string())
            .collect();
        cycle.sort();
        return Err(PlanError::CyclicDependency(cycle));
    }

    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_plan_levels() {
        let plan = Plan::new(vec![
            Step::new("setup", "noop"),
            Step::new("tests", "noop").depends_on("setup"),
            Step::new("cleanup", "noop").depends_on("tests"),
        ])
        .unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(
            plan.execution_levels(),
            vec![vec!["setup"], vec!["tests"], vec!["cleanup"]]
        );
    }

    #[test]
    fn test_fan_out_levels() {
        let plan = Plan::new(vec![
            Step::new("setup", "noop"),
            Step::new("api", "noop").depends_on("setup"),
            Step::new("e2e", "noop").depends_on("setup"),
            Step::new("lint", "noop"),
        ])
        .unwrap();

        assert_eq!(
            plan.execution_levels(),
            vec![vec!["lint", "setup"], vec!["api", "e2e"]]
        );
    }

    #[test]
    fn test_missing_dependency() {
        let result = Plan::new(vec![Step::new("tests", "noop").depends_on("setup")]);
        assert!(matches!(result, Err(PlanError::MissingDependency { .. })));
    }

    #[test]
    fn test_cyclic_dependency() {
        let result = Plan::new(vec![
            Step::new("a", "noop").depends_on("c"),
            Step::new("b", "noop").depends_on("a"),
            Step::new("c", "noop").depends_on("b"),
            Step::new("d", "noop"),
        ]);
        assert_eq!(
            result,
            Err(PlanError::CyclicDependency(vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string()
            ]))
        );
    }

    #[test]
    fn test_self_dependency() {
        let result = Plan::new(vec![Step::new("a", "noop").depends_on("a")]);
        assert!(matches!(result, Err(PlanError::CyclicDependency(_))));
    }

    #[test]
    fn test_duplicate_step() {
        let result = Plan::new(vec![Step::new("same", "noop"), Step::new("same", "noop")]);
        assert_eq!(result, Err(PlanError::DuplicateStep("same".to_string())));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut step = Step::new("a", "noop");
        step.max_attempts = 0;
        assert!(matches!(
            Plan::new(vec![step]),
            Err(PlanError::InvalidMaxAttempts(_))
        ));
    }

    #[test]
    fn test_fresh_execution_ids() {
        let a = Plan::new(vec![Step::new("a", "noop")]).unwrap();
        let b = Plan::new(vec![Step::new("a", "noop")]).unwrap();
        assert_ne!(a.execution_id(), b.execution_id());
    }

    #[test]
    fn test_json_round_trip_keeps_execution_id() {
        let plan = Plan::for_test(
            "test-42",
            vec![Step::new("s1", "noop"), Step::new("s2", "noop").depends_on("s1")],
        )
        .unwrap();

        let json = serde_json::to_string(&plan).unwrap();
        let decoded: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, plan);
    }

    #[test]
    fn test_deserialize_rejects_cycle() {
        let json = r#"{"steps":[
            {"id":"a","executor_name":"noop","depends_on":"b"},
            {"id":"b","executor_name":"noop","depends_on":"a"}
        ]}"#;
        assert!(serde_json::from_str::<Plan>(json).is_err());
    }
}
