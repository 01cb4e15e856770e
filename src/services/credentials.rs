//! File-backed pool of bearer credentials for the rendering service.
//!
//! The store is a flat text file with one credential per line; blank lines
//! and lines starting with `#` are ignored. Every mutation re-reads the file
//! under a single lock and replaces it atomically, so concurrent removals
//! from different job runners are never lost.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

pub struct CredentialPool {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CredentialPool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current credentials in file order. A missing file is an empty pool.
    pub async fn load(&self) -> Result<Vec<String>, CredentialError> {
        read_store(&self.path).await
    }

    /// Remove `credential` from the store. Returns whether it was present.
    pub async fn remove(&self, credential: &str) -> Result<bool, CredentialError> {
        let _guard = self.write_lock.lock().await;

        let mut credentials = read_store(&self.path).await?;
        let before = credentials.len();
        credentials.retain(|c| c != credential);

        if credentials.len() == before {
            return Ok(false);
        }

        write_store(&self.path, &credentials).await?;
        tracing::info!(
            credential = %mask(credential),
            remaining = credentials.len(),
            "Removed exhausted credential from pool"
        );
        Ok(true)
    }

    /// Merge new credentials into the store, skipping ones already present
    /// and ones that contain whitespace. Returns how many were added.
    pub async fn append<I, S>(&self, new: I) -> Result<usize, CredentialError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let _guard = self.write_lock.lock().await;

        let mut credentials = read_store(&self.path).await?;
        let mut seen: HashSet<String> = credentials.iter().cloned().collect();
        let mut added = 0;

        for candidate in new {
            let candidate = candidate.as_ref().trim();
            if candidate.is_empty() || candidate.starts_with('#') {
                continue;
            }
            if !is_storable(candidate) {
                tracing::warn!(
                    credential = %mask(candidate),
                    "Skipping credential containing whitespace or control characters"
                );
                continue;
            }
            if seen.insert(candidate.to_string()) {
                credentials.push(candidate.to_string());
                added += 1;
            }
        }

        if added > 0 {
            write_store(&self.path, &credentials).await?;
            tracing::info!(added, total = credentials.len(), "Appended credentials to pool");
        }
        Ok(added)
    }
}

/// Short form of a credential that is safe to log.
pub fn mask(credential: &str) -> String {
    let tail: String = credential
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("…{tail}")
}

/// A credential must fit on one line of the store and read back unchanged.
fn is_storable(candidate: &str) -> bool {
    !candidate
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
}

fn parse_store(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

async fn read_store(path: &Path) -> Result<Vec<String>, CredentialError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(parse_store(&contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(CredentialError::Read {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

async fn write_store(path: &Path, credentials: &[String]) -> Result<(), CredentialError> {
    let mut contents = credentials.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }

    let tmp = path.with_extension("tmp");
    let write_err = |source| CredentialError::Write {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::write(&tmp, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to read credential store {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write credential store {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
