use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use candle_core::safetensors::MmapedSafetensors;
use candle_nn::var_builder::SimpleBackend;
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::error::BoxedError;
use crate::repository::Repo;

static SAFETENSORS_INDEX: &str = "model.safetensors.index.json";
static SAFETENSORS_SINGLE: &str = "model.safetensors";

/// Extension trait for checkpoint loading.
///
/// This trait has a single implementation that adds support to `Repo` for
/// loading safetensors checkpoints, either as a single file or sharded
/// with an index file.
pub trait LoadCheckpoint {
    /// Load a checkpoint as a parameter backend.
    fn load_checkpoint(&self) -> Result<Box<dyn SimpleBackend>, BoxedError>;
}

/// Checkpoint loading errors.
#[derive(Debug, Snafu)]
pub enum CheckpointError {
    #[snafu(display("Cannot fetch checkpoint file: {name}"))]
    Fetch { source: BoxedError, name: String },

    #[snafu(display("Cannot open or load checkpoint"))]
    LoadCheckpoint { source: candle_core::Error },

    #[snafu(display("Checkpoint does not exist: {name}"))]
    NonExistentCheckpoint { name: String },

    #[snafu(display("Shard does not exist: {name}"))]
    NonExistentShard { name: String },

    #[snafu(display("Cannot open index file: {}", path.to_string_lossy()))]
    OpenCheckpointIndex { source: io::Error, path: PathBuf },

    #[snafu(display("Cannot parse index file: {}", path.to_string_lossy()))]
    ParseCheckpointIndex {
        source: serde_json::Error,
        path: PathBuf,
    },
}

impl<R> LoadCheckpoint for R
where
    R: Repo,
{
    fn load_checkpoint(&self) -> Result<Box<dyn SimpleBackend>, BoxedError> {
        let paths = match self.file(SAFETENSORS_INDEX).context(FetchSnafu {
            name: SAFETENSORS_INDEX,
        })? {
            Some(index_path) => shard_paths(self, &index_path)?,
            None => vec![self
                .file(SAFETENSORS_SINGLE)
                .context(FetchSnafu {
                    name: SAFETENSORS_SINGLE,
                })?
                .ok_or_else(|| CheckpointError::NonExistentCheckpoint {
                    name: SAFETENSORS_SINGLE.to_string(),
                })?],
        };

        log::debug!("Loading checkpoint from {} file(s)", paths.len());

        Ok(Box::new(unsafe {
            MmapedSafetensors::multi(&paths).context(LoadCheckpointSnafu)?
        }))
    }
}

/// Get the local paths of the shards listed in a shard index.
fn shard_paths(repo: &impl Repo, index_path: &Path) -> Result<Vec<PathBuf>, CheckpointError> {
    let index_file = BufReader::new(File::open(index_path).context(OpenCheckpointIndexSnafu {
        path: index_path.to_owned(),
    })?);
    let index: CheckpointIndex =
        serde_json::from_reader(index_file).context(ParseCheckpointIndexSnafu {
            path: index_path.to_owned(),
        })?;

    index
        .shards()
        .into_iter()
        .map(|shard_name| {
            repo.file(&shard_name)
                .context(FetchSnafu {
                    name: shard_name.clone(),
                })?
                .ok_or(CheckpointError::NonExistentShard { name: shard_name })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct CheckpointIndex {
    weight_map: HashMap<String, String>,
}

impl CheckpointIndex {
    /// Get the names of the shards.
    fn shards(&self) -> BTreeSet<String> {
        self.weight_map.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use snafu::{report, ResultExt, Whatever};

    use super::{CheckpointError, LoadCheckpoint};
    use crate::repository::LocalRepo;

    #[test]
    #[report]
    fn missing_shard_is_reported() -> Result<(), Whatever> {
        let root = std::env::temp_dir().join(format!("vit-checkpoint-shard-{}", std::process::id()));
        fs::create_dir_all(&root).whatever_context("Cannot create repository directory")?;
        fs::write(
            root.join("model.safetensors.index.json"),
            json!({
                "weight_map": {
                    "logits.weight": "model-00001-of-00001.safetensors",
                }
            })
            .to_string(),
        )
        .whatever_context("Cannot write checkpoint index")?;

        let repo = LocalRepo::new(&root).whatever_context("Cannot open repository")?;
        let err = match repo.load_checkpoint() {
            Ok(_) => panic!("Checkpoint with a missing shard was loaded"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::NonExistentShard { name }) if name == "model-00001-of-00001.safetensors"
        ));

        fs::remove_dir_all(&root).whatever_context("Cannot remove repository directory")?;

        Ok(())
    }

    #[test]
    #[report]
    fn missing_checkpoint_is_reported() -> Result<(), Whatever> {
        let root = std::env::temp_dir().join(format!("vit-checkpoint-empty-{}", std::process::id()));
        fs::create_dir_all(&root).whatever_context("Cannot create repository directory")?;

        let repo = LocalRepo::new(&root).whatever_context("Cannot open repository")?;
        let err = match repo.load_checkpoint() {
            Ok(_) => panic!("Checkpoint was loaded from an empty repository"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::NonExistentCheckpoint { .. })
        ));

        fs::remove_dir_all(&root).whatever_context("Cannot remove repository directory")?;

        Ok(())
    }
}
