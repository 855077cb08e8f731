use crate::error::KrbError;
use crate::proto::SharedKey;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, trace};

const KEY_FILE_EXTENSION: &str = "key";

/// Resolves a principal id to the long term key shared with it.
pub trait KeyStore: Send + Sync {
    /// Returns [KrbError::UnknownPrincipal] when no key is registered for the id.
    fn lookup(&self, principal: &str) -> Result<SharedKey, KrbError>;
}

impl<K: KeyStore + ?Sized> KeyStore for Arc<K> {
    fn lookup(&self, principal: &str) -> Result<SharedKey, KrbError> {
        (**self).lookup(principal)
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryKeyStore {
    keys: BTreeMap<String, SharedKey>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, principal: &str, key: SharedKey) -> Option<SharedKey> {
        self.keys.insert(principal.to_string(), key)
    }

    pub fn with(mut self, principal: &str, key: SharedKey) -> Self {
        self.insert(principal, key);
        self
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<(String, SharedKey)> for MemoryKeyStore {
    fn from_iter<I: IntoIterator<Item = (String, SharedKey)>>(iter: I) -> Self {
        MemoryKeyStore {
            keys: iter.into_iter().collect(),
        }
    }
}

impl KeyStore for MemoryKeyStore {
    fn lookup(&self, principal: &str) -> Result<SharedKey, KrbError> {
        self.keys
            .get(principal)
            .cloned()
            .ok_or(KrbError::UnknownPrincipal)
    }
}

/// A directory holding one hex encoded `<principal>.key` file per principal.
/// Files are read on every lookup, so keys can be added or rotated without a
/// restart.
#[derive(Debug, Clone)]
pub struct KeyDirectory {
    path: PathBuf,
}

impl KeyDirectory {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        KeyDirectory { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStore for KeyDirectory {
    fn lookup(&self, principal: &str) -> Result<SharedKey, KrbError> {
        let path = key_file_path(&self.path, principal).ok_or_else(|| {
            trace!(?principal, "Principal id can not name a key file");
            KrbError::UnknownPrincipal
        })?;

        let encoded = match fs::read_to_string(&path) {
            Ok(encoded) => encoded,
            Err(io_err) if io_err.kind() == ErrorKind::NotFound => {
                return Err(KrbError::UnknownPrincipal);
            }
            Err(io_err) => {
                error!(?io_err, "Unable to read key file {}", path.display());
                return Err(KrbError::KeyStoreError);
            }
        };

        SharedKey::from_hex(&encoded).map_err(|err| {
            error!(?err, "Invalid key material in {}", path.display());
            KrbError::KeyStoreError
        })
    }
}

// Ids are used as file names, so anything that could escape the directory is
// treated as an unknown principal.
fn key_file_path(dir: &Path, principal: &str) -> Option<PathBuf> {
    if principal.is_empty()
        || principal == "."
        || principal == ".."
        || principal.contains(['/', '\\', '\0'])
    {
        return None;
    }
    Some(dir.join(format!("{principal}.{KEY_FILE_EXTENSION}")))
}

/// Write a principal's key into a key directory, readable by the owner only.
pub fn store_key_file(dir: &Path, principal: &str, key: &SharedKey) -> Result<PathBuf, KrbError> {
    let path = key_file_path(dir, principal).ok_or(KrbError::InvalidConfiguration)?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut f = options.open(&path).map_err(|io_err| {
        error!(?io_err, "Unable to create key file at {}", path.display());
        KrbError::IoError
    })?;

    writeln!(f, "{}", key.to_hex()).map_err(|io_err| {
        error!(?io_err, "Unable to write key file at {}", path.display());
        KrbError::IoError
    })?;

    Ok(path)
}
