use serde::{Deserialize, Serialize};
use shared::{Label, Probabilities};

use super::model::ModelError;

/// Meaning of the network's output indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassOrder {
    /// Index 0 is `real`, index 1 is `ai`.
    #[default]
    RealFirst,
    AiFirst,
}

impl ClassOrder {
    pub fn labels(&self) -> [Label; 2] {
        match self {
            ClassOrder::RealFirst => [Label::Real, Label::Ai],
            ClassOrder::AiFirst => [Label::Ai, Label::Real],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub label: Label,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: Label,
    pub confidence: f32,
    pub probabilities: Probabilities,
}

impl From<Probabilities> for Prediction {
    fn from(probabilities: Probabilities) -> Self {
        let Decision { label, confidence } = decide(&probabilities);
        Self {
            label,
            confidence,
            probabilities,
        }
    }
}

/// Picks the more probable class. Exact ties go to `ai`.
pub fn decide(probabilities: &Probabilities) -> Decision {
    if probabilities.real > probabilities.ai {
        Decision {
            label: Label::Real,
            confidence: probabilities.real,
        }
    } else {
        Decision {
            label: Label::Ai,
            confidence: probabilities.ai,
        }
    }
}

/// Turns raw network scores into a `(real, ai)` probability pair.
///
/// Two scores are logits of a two-class head and go through softmax; a single
/// score is the logit of a sigmoid head predicting `ai`.
pub fn probabilities_from_scores(
    scores: &[f32],
    order: ClassOrder,
) -> Result<Probabilities, ModelError> {
    match scores {
        [logit] => {
            let ai = sigmoid(f64::from(*logit));
            Ok(Probabilities {
                real: (1.0 - ai) as f32,
                ai: ai as f32,
            })
        }
        [first, second] => {
            let [p_first, p_second] = softmax2(f64::from(*first), f64::from(*second));
            let (real, ai) = match order {
                ClassOrder::RealFirst => (p_first, p_second),
                ClassOrder::AiFirst => (p_second, p_first),
            };
            Ok(Probabilities {
                real: real as f32,
                ai: ai as f32,
            })
        }
        other => Err(ModelError::OutputArity(other.len())),
    }
}

fn softmax2(a: f64, b: f64) -> [f64; 2] {
    let max = a.max(b);
    let ea = (a - max).exp();
    let eb = (b - max).exp();
    let sum = ea + eb;
    [ea / sum, eb / sum]
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}
