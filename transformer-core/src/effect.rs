use serde::{Deserialize, Serialize};

/// One processing step applied to decoded samples, e.g. `volume=0.5` for
/// audio or `hflip` for video. The description is handed to the pipeline
/// that runs it; the orchestrator only needs to know that it exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Effect(String);

impl Effect {
    pub fn new(description: impl Into<String>) -> Self {
        Self(description.into())
    }

    pub fn description(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Effect {
    fn from(description: &str) -> Self {
        Self::new(description)
    }
}
