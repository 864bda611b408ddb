use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// The maximum number of times the whole pass list is run while it keeps changing the module.
    pub max_iterations: usize,
    /// Run `verify_module` after every pass that reports a change.
    pub verify_after_each_pass: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::standard()
    }
}

impl PipelineSettings {
    pub fn standard() -> Self {
        Self {
            max_iterations: 10,
            verify_after_each_pass: false,
        }
    }

    /// Settings that verify the module after every change, for tests and debugging.
    pub fn checked() -> Self {
        Self {
            verify_after_each_pass: true,
            ..Self::standard()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
