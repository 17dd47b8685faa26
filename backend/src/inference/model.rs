use serde::{Deserialize, Serialize};
use shared::ModelInfo;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tch::nn::{self, ModuleT};
use tch::vision::efficientnet;
use tch::{CModule, Device, Kind, TchError, Tensor};

use super::decision::{ClassOrder, Prediction, probabilities_from_scores};
use super::{Classifier, ImageTensor};
use crate::config::{ModelConfig, PreprocessingConfig};
use crate::error::StartupError;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model is not loaded")]
    NotLoaded,
    #[error("model inference failed: {0}")]
    Inference(#[from] TchError),
    #[error("expected one or two output scores, got {0}")]
    OutputArity(usize),
    #[error("model lock poisoned by a panicked inference")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backbone {
    #[default]
    #[serde(rename = "efficientnet-b0")]
    EfficientNetB0,
    #[serde(rename = "efficientnet-b1")]
    EfficientNetB1,
    #[serde(rename = "efficientnet-b2")]
    EfficientNetB2,
    #[serde(rename = "efficientnet-b3")]
    EfficientNetB3,
}

impl Backbone {
    pub fn name(&self) -> &'static str {
        match self {
            Backbone::EfficientNetB0 => "EfficientNet-B0",
            Backbone::EfficientNetB1 => "EfficientNet-B1",
            Backbone::EfficientNetB2 => "EfficientNet-B2",
            Backbone::EfficientNetB3 => "EfficientNet-B3",
        }
    }

    /// Backbone with its classifier replaced by an `nclasses` head; the
    /// builders put dropout in front of the head.
    fn build(&self, p: &nn::Path, nclasses: i64) -> Box<dyn ModuleT + Send> {
        match self {
            Backbone::EfficientNetB0 => Box::new(efficientnet::b0(p, nclasses)),
            Backbone::EfficientNetB1 => Box::new(efficientnet::b1(p, nclasses)),
            Backbone::EfficientNetB2 => Box::new(efficientnet::b2(p, nclasses)),
            Backbone::EfficientNetB3 => Box::new(efficientnet::b3(p, nclasses)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointKind {
    /// Traced or scripted module; carries its own architecture.
    TorchScript,
    /// Named parameters loaded into a backbone built here.
    Weights,
}

impl CheckpointKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pt" | "pth" | "jit" => Some(CheckpointKind::TorchScript),
            "safetensors" | "ot" => Some(CheckpointKind::Weights),
            _ => None,
        }
    }
}

/// First candidate that exists under `dir`.
pub fn resolve_checkpoint(dir: &Path, candidates: &[String]) -> Result<PathBuf, StartupError> {
    candidates
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| StartupError::CheckpointNotFound {
            dir: dir.to_path_buf(),
            candidates: candidates.to_vec(),
        })
}

enum Network {
    Scripted(CModule),
    Backbone {
        // Owns the parameters the module closures point at.
        _vs: nn::VarStore,
        net: Box<dyn ModuleT + Send>,
    },
}

impl Network {
    fn scores(&self, xs: &Tensor) -> Result<Vec<f32>, TchError> {
        let output = match self {
            Network::Scripted(module) => module.forward_ts(&[xs])?,
            Network::Backbone { net, .. } => net.forward_t(xs, false),
        };
        let flat = output
            .f_to_kind(Kind::Float)?
            .to_device(Device::Cpu)
            .f_view([-1])?;
        Vec::<f32>::try_from(&flat)
    }
}

struct LoadedNetwork {
    checkpoint: PathBuf,
    network: Mutex<Network>,
}

/// The classification network, loaded once at startup and then only read.
pub struct Model {
    config: ModelConfig,
    image_size: u32,
    use_fft: bool,
    device: Device,
    loaded: Option<LoadedNetwork>,
}

impl Model {
    pub fn new(config: &ModelConfig, preprocessing: &PreprocessingConfig) -> Self {
        Self {
            config: config.clone(),
            image_size: preprocessing.image_size,
            use_fft: preprocessing.use_fft,
            device: Device::cuda_if_available(),
            loaded: None,
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn load(&mut self) -> Result<(), StartupError> {
        let path = resolve_checkpoint(&self.config.dir, &self.config.candidates)?;
        let kind = CheckpointKind::from_path(&path)
            .ok_or_else(|| StartupError::UnsupportedCheckpoint { path: path.clone() })?;
        log::info!("Loading model from: {} ({:?})", path.display(), kind);

        let network = self.load_network(&path, kind).map_err(|source| {
            log::error!("Error loading model: {}", source);
            StartupError::Load {
                path: path.clone(),
                source,
            }
        })?;

        self.loaded = Some(LoadedNetwork {
            checkpoint: path,
            network: Mutex::new(network),
        });
        log::info!(
            "Model loaded successfully on {:?} ({} outputs, {:?})",
            self.device,
            self.config.num_classes,
            self.config.class_order
        );
        Ok(())
    }

    fn load_network(&self, path: &Path, kind: CheckpointKind) -> Result<Network, TchError> {
        match kind {
            CheckpointKind::TorchScript => {
                let mut module = CModule::load_on_device(path, self.device)?;
                module.set_eval();
                Ok(Network::Scripted(module))
            }
            CheckpointKind::Weights => {
                let mut vs = nn::VarStore::new(self.device);
                let net = self
                    .config
                    .backbone
                    .build(&vs.root(), self.config.num_classes);
                vs.load(path)?;
                vs.freeze();
                Ok(Network::Backbone { _vs: vs, net })
            }
        }
    }

    fn input_tensor(&self, input: &ImageTensor) -> Result<Tensor, TchError> {
        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let data: Vec<f32> = input.iter().copied().collect();
        Ok(Tensor::from_slice(&data)
            .f_reshape(shape.as_slice())?
            .to_device(self.device))
    }

    fn class_order(&self) -> ClassOrder {
        self.config.class_order
    }
}

impl Classifier for Model {
    fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn predict(&self, input: &ImageTensor) -> Result<Prediction, ModelError> {
        let loaded = self.loaded.as_ref().ok_or(ModelError::NotLoaded)?;
        let xs = self.input_tensor(input)?;

        let scores = {
            let network = loaded.network.lock().map_err(|_| ModelError::Poisoned)?;
            tch::no_grad(|| network.scores(&xs))?
        };
        log::debug!("Raw model scores: {:?}", scores);

        let probabilities = probabilities_from_scores(&scores, self.class_order())?;
        Ok(Prediction::from(probabilities))
    }

    fn info(&self) -> Option<ModelInfo> {
        let loaded = self.loaded.as_ref()?;
        let backbone = self.config.backbone.name();
        let classes = match self.config.num_classes {
            1 => vec![shared::Label::Ai.display_name().to_string()],
            _ => self
                .class_order()
                .labels()
                .iter()
                .map(|label| label.display_name().to_string())
                .collect(),
        };

        Some(ModelInfo {
            model_name: if self.use_fft {
                format!("{} with FFT", backbone)
            } else {
                backbone.to_string()
            },
            backbone: backbone.to_string(),
            input_shape: format!("{}x{}x3", self.image_size, self.image_size),
            classes,
            framework: "PyTorch (libtorch via tch)".to_string(),
            preprocessing: if self.use_fft {
                "fft-magnitude-spectrum".to_string()
            } else {
                "rgb".to_string()
            },
            checkpoint: loaded
                .checkpoint
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            device: format!("{:?}", self.device),
        })
    }
}
