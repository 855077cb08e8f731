use super::TicketCache;
use crate::error::KrbError;
use crate::proto::{SharedKey, TicketData};
use binrw::io::Cursor;
use binrw::{binread, binwrite, BinRead, BinWrite};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::error;

#[binwrite]
#[brw(big)]
#[binread]
#[derive(Debug, Clone, PartialEq, Eq)]
struct DataComponent {
    #[br(temp)]
    #[bw(try_calc(u32::try_from(value.len())))]
    value_len: u32,
    #[br(count = value_len)]
    value: Vec<u8>,
}

impl From<&[u8]> for DataComponent {
    fn from(value: &[u8]) -> Self {
        DataComponent {
            value: value.to_vec(),
        }
    }
}

impl DataComponent {
    fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.value).to_string()
    }
}

#[binwrite]
#[brw(big)]
#[binread]
#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheEntry {
    owner: DataComponent,
    target: DataComponent,
    key: DataComponent,
    issue_time: i64,
    lifetime: i64,
    ticket: DataComponent,
    ticket_mac: DataComponent,
}

impl CacheEntry {
    fn new(owner: &str, ticket: &TicketData) -> Self {
        CacheEntry {
            owner: owner.as_bytes().into(),
            target: ticket.target_id.as_bytes().into(),
            key: ticket.session_key.as_bytes().into(),
            issue_time: ticket.issue_time,
            lifetime: ticket.lifetime,
            ticket: ticket.encrypted_ticket.as_slice().into(),
            ticket_mac: ticket.ticket_mac.as_slice().into(),
        }
    }

    fn matches(&self, owner: &str, target: &str) -> bool {
        self.owner.value == owner.as_bytes() && self.target.value == target.as_bytes()
    }
}

impl TryFrom<&CacheEntry> for TicketData {
    type Error = KrbError;

    fn try_from(entry: &CacheEntry) -> Result<Self, Self::Error> {
        let session_key = SharedKey::try_from(entry.key.value.as_slice()).map_err(|err| {
            error!(?err, "Invalid session key in ticket cache");
            KrbError::CredentialCacheError
        })?;

        Ok(TicketData {
            session_key,
            target_id: entry.target.to_string_lossy(),
            issue_time: entry.issue_time,
            lifetime: entry.lifetime,
            encrypted_ticket: entry.ticket.value.clone(),
            ticket_mac: entry.ticket_mac.value.clone(),
        })
    }
}

#[binwrite]
#[brw(big, magic = b"SKC\x01")]
#[binread]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct FileTicketCacheV1 {
    #[br(temp)]
    #[bw(try_calc(u32::try_from(entries.len())))]
    count: u32,
    #[br(count = count)]
    entries: Vec<CacheEntry>,
}

impl FileTicketCacheV1 {
    fn read(buf: &[u8]) -> Result<Self, KrbError> {
        let mut reader = Cursor::new(buf);
        <FileTicketCacheV1 as BinRead>::read(&mut reader).map_err(|binrw_err| {
            error!(?binrw_err, "Unable to parse ticket cache");
            KrbError::BinRWError
        })
    }

    fn to_bytes(&self) -> Result<Vec<u8>, KrbError> {
        let mut c = Cursor::new(Vec::new());
        self.write(&mut c).map_err(|binrw_err| {
            error!(?binrw_err, "Unable to write binary data.");
            KrbError::BinRWError
        })?;
        Ok(c.into_inner())
    }
}

/// A ticket cache persisted to a single file. The file is re-read for every
/// operation so several processes may share it.
#[derive(Debug, Clone)]
pub struct FileTicketCache {
    path: PathBuf,
}

impl FileTicketCache {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FileTicketCache { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<FileTicketCacheV1, KrbError> {
        match fs::read(&self.path) {
            Ok(buf) => FileTicketCacheV1::read(&buf),
            Err(io_err) if io_err.kind() == ErrorKind::NotFound => {
                Ok(FileTicketCacheV1::default())
            }
            Err(io_err) => {
                error!(?io_err, "Unable to read ticket cache at {}", self.path.display());
                Err(KrbError::IoError)
            }
        }
    }

    fn store(&self, cache: &FileTicketCacheV1) -> Result<(), KrbError> {
        let buf = cache.to_bytes()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|io_err| {
                error!(?io_err, "Unable to create directory {}", parent.display());
                KrbError::IoError
            })?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut f = options.open(&self.path).map_err(|io_err| {
            error!(?io_err, "Unable to create file at {}", self.path.display());
            KrbError::IoError
        })?;

        f.write_all(&buf).map_err(|io_err| {
            error!(?io_err, "Unable to write file at {}", self.path.display());
            KrbError::IoError
        })
    }

    /// Remove the cache file entirely.
    pub fn destroy(&self) -> Result<(), KrbError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(io_err) if io_err.kind() == ErrorKind::NotFound => Ok(()),
            Err(io_err) => {
                error!(?io_err, "Unable to remove file at {}", self.path.display());
                Err(KrbError::IoError)
            }
        }
    }
}

impl TicketCache for FileTicketCache {
    fn get(&self, owner: &str, target: &str) -> Result<Option<TicketData>, KrbError> {
        self.load()?
            .entries
            .iter()
            .find(|e| e.matches(owner, target))
            .map(TicketData::try_from)
            .transpose()
    }

    fn put(&mut self, owner: &str, ticket: &TicketData) -> Result<(), KrbError> {
        let mut cache = self.load()?;
        cache
            .entries
            .retain(|e| !e.matches(owner, &ticket.target_id));
        cache.entries.push(CacheEntry::new(owner, ticket));
        self.store(&cache)
    }

    fn delete(&mut self, owner: &str, target: &str) -> Result<(), KrbError> {
        let mut cache = self.load()?;
        let before = cache.entries.len();
        cache.entries.retain(|e| !e.matches(owner, target));
        if cache.entries.len() == before {
            return Ok(());
        }
        self.store(&cache)
    }
}
