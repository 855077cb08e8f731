mod cc_file;

pub use self::cc_file::FileTicketCache;

use crate::constants::{DEFAULT_TICKET_CACHE, TICKET_CACHE_ENV};
use crate::error::KrbError;
use crate::proto::TicketData;
use std::collections::BTreeMap;
use std::env;
use tracing::trace;

/// Client side storage for tickets, keyed by the owning client and the target
/// principal the ticket is for.
pub trait TicketCache: Send {
    fn get(&self, owner: &str, target: &str) -> Result<Option<TicketData>, KrbError>;

    /// Stores the ticket under its own target id, replacing any previous one.
    fn put(&mut self, owner: &str, ticket: &TicketData) -> Result<(), KrbError>;

    /// Removing an absent entry is not an error.
    fn delete(&mut self, owner: &str, target: &str) -> Result<(), KrbError>;
}

impl<C: TicketCache + ?Sized> TicketCache for Box<C> {
    fn get(&self, owner: &str, target: &str) -> Result<Option<TicketData>, KrbError> {
        (**self).get(owner, target)
    }

    fn put(&mut self, owner: &str, ticket: &TicketData) -> Result<(), KrbError> {
        (**self).put(owner, ticket)
    }

    fn delete(&mut self, owner: &str, target: &str) -> Result<(), KrbError> {
        (**self).delete(owner, target)
    }
}

#[derive(Debug, Default)]
pub struct MemoryTicketCache {
    entries: BTreeMap<(String, String), TicketData>,
}

impl MemoryTicketCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TicketCache for MemoryTicketCache {
    fn get(&self, owner: &str, target: &str) -> Result<Option<TicketData>, KrbError> {
        Ok(self
            .entries
            .get(&(owner.to_string(), target.to_string()))
            .cloned())
    }

    fn put(&mut self, owner: &str, ticket: &TicketData) -> Result<(), KrbError> {
        self.entries.insert(
            (owner.to_string(), ticket.target_id.clone()),
            ticket.clone(),
        );
        Ok(())
    }

    fn delete(&mut self, owner: &str, target: &str) -> Result<(), KrbError> {
        self.entries.remove(&(owner.to_string(), target.to_string()));
        Ok(())
    }
}

fn parse_cache_name(name: Option<&str>) -> String {
    match name {
        Some(n) => n.to_string(),
        None => env::var(TICKET_CACHE_ENV).unwrap_or_else(|_| DEFAULT_TICKET_CACHE.to_string()),
    }
}

/// Open the ticket cache named `MEMORY:` or `FILE:<path>`. Without a name the
/// environment is consulted before falling back to the default file cache.
pub fn resolve(name: Option<&str>) -> Result<Box<dyn TicketCache>, KrbError> {
    let name = parse_cache_name(name);
    trace!(?name, "Resolving ticket cache");

    if name == "MEMORY:" {
        return Ok(Box::new(MemoryTicketCache::new()));
    }

    if let Some(path) = name.strip_prefix("FILE:") {
        if path.is_empty() {
            return Err(KrbError::UnsupportedCredentialCacheType);
        }
        return Ok(Box::new(FileTicketCache::new(path)));
    }

    Err(KrbError::UnsupportedCredentialCacheType)
}
