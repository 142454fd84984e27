use serde::{Deserialize, Serialize};

use engine::Credential;

/// Settings persisted between runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stored in plain text
    pub replicate_api_key: String,
    pub base_url: Option<String>,
}

impl Config {
    pub fn credential(&self) -> Credential {
        Credential::new(self.replicate_api_key.clone())
    }

    /// The saved key with everything but the first few characters hidden
    pub fn masked_key(&self) -> Option<String> {
        let key = self.replicate_api_key.trim();
        if key.is_empty() {
            return None;
        }
        let visible: String = key.chars().take(4).collect();
        Some(format!("{visible}{}", "*".repeat(key.chars().count() - visible.chars().count())))
    }
}
