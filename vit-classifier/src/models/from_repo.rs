use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use candle_core::{DType, Device};
use candle_nn::var_builder::SimpleBackend;
use candle_nn::VarBuilder;
use serde::de::DeserializeOwned;
use snafu::{ResultExt, Snafu};

use crate::architectures::BuildArchitecture;
use crate::error::BoxedError;
use crate::models::checkpoint::LoadCheckpoint;
use crate::models::vit::{ViTClassifier, ViTClassifierConfig, ViTConfig};
use crate::repository::{HfHubRepo, HfHubRepoError, Repo};

static CONFIG_FILE: &str = "config.json";

/// Errors for loading a model from a repository.
#[derive(Debug, Snafu)]
pub enum FromRepoError {
    #[snafu(display("Cannot build model"))]
    BuildModel { source: BoxedError },

    #[snafu(display("Model configuration file does not exist"))]
    ConfigPath,

    #[snafu(display("Cannot convert model configuration"))]
    ConvertConfig { source: BoxedError },

    #[snafu(display("Hugging Face Hub repository error"))]
    HfHubRepo { source: HfHubRepoError },

    #[snafu(display("Cannot deserialize JSON"))]
    JSON { source: serde_json::Error },

    #[snafu(display("Cannot open or load checkpoint"))]
    LoadCheckpoint { source: BoxedError },

    #[snafu(display("Cannot open file for reading: {path:?}"))]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Repository error"))]
    Repository { source: BoxedError },
}

/// Models that can be loaded from a repository with a `config.json`
/// configuration and a safetensors checkpoint.
pub trait FromRepo {
    /// Model configuration.
    type Config: BuildArchitecture<Architecture = Self::Model>
        + TryFrom<Self::StoredConfig, Error = BoxedError>;

    /// Configuration as stored in the repository.
    type StoredConfig: DeserializeOwned;

    /// The type of model that is constructed.
    type Model;

    /// Construct a model from a stored configuration and parameter backend.
    ///
    /// * `config` - The stored model configuration.
    /// * `backend` - The parameter store backend.
    /// * `dtype` - Data type of the model parameters.
    /// * `device` - The device to place the model on.
    fn from_backend(
        config: Self::StoredConfig,
        backend: Box<dyn SimpleBackend>,
        dtype: DType,
        device: &Device,
    ) -> Result<Self::Model, FromRepoError> {
        let config = Self::Config::try_from(config).context(ConvertConfigSnafu)?;
        let vb = VarBuilder::from_backend(backend, dtype, device.clone());
        config.build(vb).context(BuildModelSnafu)
    }

    /// Load a model from a repository.
    ///
    /// * `repo` - Repository with the configuration and checkpoint.
    /// * `dtype` - Data type of the model parameters.
    /// * `device` - The device to place the model on.
    fn from_repo(
        repo: &impl Repo,
        dtype: DType,
        device: &Device,
    ) -> Result<Self::Model, FromRepoError> {
        let config_path = repo
            .file(CONFIG_FILE)
            .context(RepositorySnafu)?
            .ok_or(FromRepoError::ConfigPath)?;
        let config_file = File::open(&config_path).context(OpenSnafu {
            path: config_path.clone(),
        })?;
        let config: Self::StoredConfig =
            serde_json::from_reader(BufReader::new(config_file)).context(JSONSnafu)?;

        log::info!(
            "Loading model from {}",
            config_path
                .parent()
                .map(|path| path.to_string_lossy())
                .unwrap_or_default()
        );

        let backend = repo.load_checkpoint().context(LoadCheckpointSnafu)?;

        Self::from_backend(config, backend, dtype, device)
    }

    /// Load a model from Hugging Face Hub.
    ///
    /// * `name` - Model repository name.
    /// * `revision` - Model revision. If `None`, the main branch is used.
    /// * `dtype` - Data type of the model parameters.
    /// * `device` - The device to place the model on.
    fn from_hf_hub(
        name: &str,
        revision: Option<&str>,
        dtype: DType,
        device: &Device,
    ) -> Result<Self::Model, FromRepoError> {
        let repo = HfHubRepo::new(name, revision).context(HfHubRepoSnafu)?;
        Self::from_repo(&repo, dtype, device)
    }
}

impl FromRepo for ViTClassifier {
    type Config = ViTClassifierConfig;

    type StoredConfig = ViTConfig;

    type Model = ViTClassifier;
}
