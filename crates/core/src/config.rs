use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
    Mps,
}

/// Options handed to the decision model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub model_type: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub device: Device,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_type: "gelab-zero-4b-preview".into(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1024,
            device: Device::Cpu,
        }
    }
}

/// Partial update for [`EngineConfig`]; `None` fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == ConfigPatch::default()
    }
}

impl EngineConfig {
    pub fn merge(&mut self, patch: &ConfigPatch) {
        if let Some(m) = &patch.model_type {
            self.model_type = m.clone();
        }
        if let Some(t) = patch.temperature {
            self.temperature = t;
        }
        if let Some(p) = patch.top_p {
            self.top_p = p;
        }
        if let Some(n) = patch.max_tokens {
            self.max_tokens = n;
        }
        if let Some(d) = patch.device {
            self.device = d;
        }
    }
}
