pub mod decision;
pub mod model;
pub mod preprocess;
pub mod spectrum;
pub mod validate;

use ndarray::Array4;
use shared::ModelInfo;

use decision::Prediction;
use model::ModelError;

/// Network input in NCHW layout: `(1, 3, size, size)`, channel-normalised.
pub type ImageTensor = Array4<f32>;

pub const RGB_CHANNELS: usize = 3;

/// Read-only view of a loaded network, shared by every request handler.
pub trait Classifier: Send + Sync {
    fn is_loaded(&self) -> bool;

    fn predict(&self, input: &ImageTensor) -> Result<Prediction, ModelError>;

    /// Metadata for the loaded checkpoint, `None` until loading succeeded.
    fn info(&self) -> Option<ModelInfo>;
}
