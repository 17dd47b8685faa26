use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Class assigned to an uploaded picture.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Label {
    Real,
    Ai,
}

impl Label {
    pub fn display_name(&self) -> &'static str {
        match self {
            Label::Real => "Real Painting",
            Label::Ai => "AI-Generated",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Probabilities {
    pub real: f32,
    pub ai: f32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PredictionResponse {
    pub prediction: Label,
    pub confidence: f32,
    pub probabilities: Probabilities,
    pub filename: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelInfo {
    pub model_name: String,
    pub backbone: String,
    pub input_shape: String,
    /// Class names in output-index order of the loaded checkpoint.
    pub classes: Vec<String>,
    pub framework: String,
    pub preprocessing: String,
    pub checkpoint: String,
    pub device: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
