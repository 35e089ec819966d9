use std::path::{Path, PathBuf};

use snafu::{ensure, Snafu};

use super::repo::Repo;
use crate::error::BoxedError;

/// `LocalRepo` errors.
#[derive(Debug, Snafu)]
pub enum LocalRepoError {
    #[snafu(display("Repository path is not a directory: {}", path.to_string_lossy()))]
    NotADirectory { path: PathBuf },
}

/// Repository in a directory on the local machine.
#[derive(Clone, Debug)]
pub struct LocalRepo {
    root: PathBuf,
}

impl LocalRepo {
    /// Create a new local repository.
    ///
    /// * `root` - Directory that contains the repository files.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, LocalRepoError> {
        let root = root.as_ref().to_path_buf();
        ensure!(root.is_dir(), NotADirectorySnafu { path: root });
        Ok(Self { root })
    }
}

impl Repo for LocalRepo {
    fn file(&self, path: impl AsRef<Path>) -> Result<Option<PathBuf>, BoxedError> {
        let path = self.root.join(path);
        Ok(path.is_file().then_some(path))
    }

    fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.root.join(path).is_file()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use snafu::{report, FromString, ResultExt, Whatever};

    use super::LocalRepo;
    use crate::repository::Repo;

    #[test]
    #[report]
    fn local_repo_finds_existing_files() -> Result<(), Whatever> {
        let root = std::env::temp_dir().join(format!("vit-local-repo-{}", std::process::id()));
        fs::create_dir_all(&root).whatever_context("Cannot create repository directory")?;
        fs::write(root.join("config.json"), "{}").whatever_context("Cannot write file")?;

        let repo = LocalRepo::new(&root).whatever_context("Cannot open repository")?;
        assert!(repo.exists("config.json"));
        assert!(!repo.exists("model.safetensors"));
        assert_eq!(
            repo.file("config.json")
                .map_err(|e| Whatever::with_source(e, "Cannot get file".to_string()))?,
            Some(root.join("config.json"))
        );
        assert_eq!(
            repo.file("model.safetensors")
                .map_err(|e| Whatever::with_source(e, "Cannot get file".to_string()))?,
            None
        );

        fs::remove_dir_all(&root).whatever_context("Cannot remove repository directory")?;

        Ok(())
    }

    #[test]
    fn local_repo_rejects_missing_directory() {
        let root = std::env::temp_dir().join("vit-local-repo-does-not-exist");
        assert!(LocalRepo::new(root).is_err());
    }
}
