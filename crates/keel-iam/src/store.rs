use std::path::{Path, PathBuf};

use keel_common::error::{KeelError, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::types::{Policy, User};

const SYS_DIR_NAME: &str = ".keel.sys";
const IAM_FILE_NAME: &str = "iam.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IamDocument {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub policies: Vec<Policy>,
}

/// Persists the whole identity document as one JSON file; absent when no
/// data directory is configured.
#[derive(Debug, Clone)]
pub struct IamStore {
    path: Option<PathBuf>,
}

impl IamStore {
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref().join(SYS_DIR_NAME);
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            path: Some(dir.join(IAM_FILE_NAME)),
        })
    }

    pub fn ephemeral() -> Self {
        Self { path: None }
    }

    pub async fn load(&self) -> Result<IamDocument> {
        let Some(path) = self.path.as_ref() else {
            return Ok(IamDocument::default());
        };

        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                KeelError::InternalError(format!(
                    "failed to parse iam document {}: {err}",
                    path.display()
                ))
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(IamDocument::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save(&self, document: &IamDocument) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        let bytes = serde_json::to_vec_pretty(document).map_err(|err| {
            KeelError::InternalError(format!("failed to serialize iam document: {err}"))
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}
