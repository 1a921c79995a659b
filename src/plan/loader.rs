//! Plan file loader
//!
//! Load a plan from a YAML or JSON file.

use std::path::Path;

use super::definition::{Plan, PlanError, PlanSpec};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error in {file}: {error}")]
    Yaml {
        file: String,
        error: serde_yaml::Error,
    },

    #[error("JSON parse error in {file}: {error}")]
    Json {
        file: String,
        error: serde_json::Error,
    },

    #[error("Invalid plan in {file}: {error}")]
    Invalid { file: String, error: PlanError },
}

pub struct PlanLoader;

impl PlanLoader {
    pub fn load_file(path: &Path) -> Result<Plan, LoadError> {
        let content = std::fs::read_to_string(path)?;
        let file = path.display().to_string();

        let spec: PlanSpec = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(|error| LoadError::Json {
                file: file.clone(),
                error,
            })?
        } else {
            Self::parse_yaml_spec(&content, &file)?
        };

        Plan::try_from(spec).map_err(|error| LoadError::Invalid { file, error })
    }

    pub fn load_yaml(yaml: &str) -> Result<Plan, LoadError> {
        let spec = Self::parse_yaml_spec(yaml, "<inline>")?;
        Plan::try_from(spec).map_err(|error| LoadError::Invalid {
            file: "<inline>".to_string(),
            error,
        })
    }

    fn parse_yaml_spec(content: &str, file: &str) -> Result<PlanSpec, LoadError> {
        serde_yaml::from_str(content).map_err(|error| LoadError::Yaml {
            file: file.to_string(),
            error,
        })
    }
}
