use serde::Deserialize;
use simple_kerberos::error::KrbError;
use simple_kerberos::keystore::MemoryKeyStore;
use simple_kerberos::proto::SharedKey;
use simple_kerberos::{KeySize, ProtocolConfig};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::error;

#[derive(Debug, Deserialize)]
pub struct TgsPrincipal {
    pub id: String,
    pub address: String,
    #[serde(deserialize_with = "hex::serde::deserialize")]
    pub key: Vec<u8>,
}

/// A client is registered either with its password or with the hex of the key
/// derived from it.
#[derive(Debug, Deserialize)]
pub struct ClientPrincipal {
    pub id: String,
    pub password: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServicePrincipal {
    pub id: String,
    pub tgs: String,
    #[serde(deserialize_with = "hex::serde::deserialize")]
    pub key: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub address: String,
    pub key_bits: Option<u16>,
    pub ticket_lifetime_secs: Option<u64>,
    pub freshness_window_secs: Option<u64>,
    pub tgs: Vec<TgsPrincipal>,
    #[serde(default)]
    pub client: Vec<ClientPrincipal>,
    #[serde(default)]
    pub service: Vec<ServicePrincipal>,
}

impl Config {
    pub fn parse<P: AsRef<Path>>(path: P) -> io::Result<Config> {
        let mut contents = String::new();
        let mut f = fs::File::open(&path)?;
        f.read_to_string(&mut contents)?;

        toml::from_str(&contents).map_err(|err| {
            error!(?err);
            io::Error::other("toml parse failure")
        })
    }
}

#[derive(Debug)]
pub struct TgsRecord {
    pub id: String,
    pub address: SocketAddr,
    pub key: SharedKey,
    /// Only the services registered with this TGS.
    pub services: MemoryKeyStore,
}

#[derive(Debug)]
pub struct ServerState {
    pub protocol: ProtocolConfig,
    pub address: SocketAddr,
    /// Clients and TGS principals, everything the AS needs.
    pub principals: MemoryKeyStore,
    pub tgs: Vec<TgsRecord>,
}

impl ServerState {
    pub fn tgs_ids(&self) -> Vec<String> {
        self.tgs.iter().map(|t| t.id.clone()).collect()
    }

    pub fn service_key(&self, service_id: &str) -> Option<SharedKey> {
        use simple_kerberos::keystore::KeyStore;

        self.tgs
            .iter()
            .find_map(|t| t.services.lookup(service_id).ok())
    }
}

fn parse_address(address: &str) -> Result<SocketAddr, KrbError> {
    SocketAddr::from_str(address).map_err(|err| {
        error!(?err, "Could not parse address {}", address);
        KrbError::InvalidConfiguration
    })
}

fn parse_key(id: &str, key: &[u8]) -> Result<SharedKey, KrbError> {
    SharedKey::try_from(key).map_err(|err| {
        error!(?err, "Invalid key length for principal {}", id);
        err
    })
}

impl TryFrom<&Config> for ServerState {
    type Error = KrbError;

    fn try_from(cr: &Config) -> Result<Self, Self::Error> {
        let Config {
            address,
            key_bits,
            ticket_lifetime_secs,
            freshness_window_secs,
            tgs,
            client,
            service,
        } = cr;

        let mut protocol = ProtocolConfig::default();
        if let Some(bits) = key_bits {
            protocol = protocol.with_key_size(KeySize::try_from(*bits)?);
        }
        if let Some(secs) = ticket_lifetime_secs {
            protocol = protocol.with_ticket_lifetime(Duration::from_secs(*secs));
        }
        if let Some(secs) = freshness_window_secs {
            protocol = protocol.with_freshness_window(Duration::from_secs(*secs));
        }

        let address = parse_address(address)?;

        let mut principals = MemoryKeyStore::new();
        let mut tgs_records = BTreeMap::new();

        for TgsPrincipal { id, address, key } in tgs {
            let key = parse_key(id, key)?;
            if principals.insert(id, key.clone()).is_some() {
                error!("Duplicate principal {}", id);
                return Err(KrbError::InvalidConfiguration);
            }
            tgs_records.insert(
                id.clone(),
                TgsRecord {
                    id: id.clone(),
                    address: parse_address(address)?,
                    key,
                    services: MemoryKeyStore::new(),
                },
            );
        }

        if tgs_records.is_empty() {
            error!("At least one TGS must be configured");
            return Err(KrbError::InvalidConfiguration);
        }

        for ClientPrincipal { id, password, key } in client {
            let key = match (password, key) {
                (Some(password), None) => SharedKey::from_password(password, protocol.key_size)?,
                (None, Some(key)) => SharedKey::from_hex(key)?,
                _ => {
                    error!("Client {} needs exactly one of password or key", id);
                    return Err(KrbError::InvalidConfiguration);
                }
            };
            if principals.insert(id, key).is_some() {
                error!("Duplicate principal {}", id);
                return Err(KrbError::InvalidConfiguration);
            }
        }

        for ServicePrincipal { id, tgs, key } in service {
            let key = parse_key(id, key)?;
            let Some(record) = tgs_records.get_mut(tgs) else {
                error!("Service {} registered with unknown TGS {}", id, tgs);
                return Err(KrbError::InvalidConfiguration);
            };
            if record.services.insert(id, key).is_some() {
                error!("Duplicate service {} for TGS {}", id, tgs);
                return Err(KrbError::InvalidConfiguration);
            }
        }

        Ok(ServerState {
            protocol,
            address,
            principals,
            tgs: tgs_records.into_values().collect(),
        })
    }
}

#[derive(Clone, Debug)]
pub enum TaskName {
    AuthenticationUdp,
    TicketGrantUdp(String),
}

impl Display for TaskName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::AuthenticationUdp => write!(f, "Authentication Server (UDP)"),
            TaskName::TicketGrantUdp(id) => write!(f, "Ticket Granting Server {id} (UDP)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_kerberos::keystore::KeyStore;

    const CONFIG: &str = r#"
address = "127.0.0.1:8888"
ticket_lifetime_secs = 600

[[tgs]]
id = "tgs1"
address = "127.0.0.2:8889"
key = "000102030405060708090a0b0c0d0e0f"

[[tgs]]
id = "tgs2"
address = "127.0.0.3:8889"
key = "0f0e0d0c0b0a09080706050403020100"

[[client]]
id = "alice"
password = "password"

[[client]]
id = "bob"
key = "c5e478d59288c841aa530db6845c4c8d"

[[service]]
id = "printer"
tgs = "tgs1"
key = "101112131415161718191a1b1c1d1e1f"
"#;

    #[test]
    fn test_server_state_from_config() {
        let cfg: Config = toml::from_str(CONFIG).unwrap();
        let state = ServerState::try_from(&cfg).unwrap();

        assert_eq!(state.protocol.ticket_lifetime, Duration::from_secs(600));
        assert_eq!(state.protocol.key_size, KeySize::Aes128);
        assert_eq!(state.tgs_ids(), vec!["tgs1", "tgs2"]);
        assert_eq!(
            state.tgs[1].address,
            "127.0.0.3:8889".parse::<SocketAddr>().unwrap()
        );

        // PBKDF2 of "password" gives the same key bob was registered with.
        assert_eq!(
            state.principals.lookup("alice").unwrap(),
            state.principals.lookup("bob").unwrap()
        );
        assert!(state.principals.lookup("tgs2").is_ok());
        assert!(state.principals.lookup("printer").is_err());

        assert!(state.tgs[0].services.lookup("printer").is_ok());
        assert!(state.tgs[1].services.lookup("printer").is_err());
        assert!(state.service_key("printer").is_some());
    }

    #[test]
    fn test_service_for_unknown_tgs() {
        let cfg = CONFIG.replace("tgs = \"tgs1\"", "tgs = \"tgs9\"");
        let cfg: Config = toml::from_str(&cfg).unwrap();
        assert_eq!(
            ServerState::try_from(&cfg).unwrap_err(),
            KrbError::InvalidConfiguration
        );
    }

    #[test]
    fn test_client_without_credentials() {
        let cfg = format!("{CONFIG}\n[[client]]\nid = \"carol\"\n");
        let cfg: Config = toml::from_str(&cfg).unwrap();
        assert_eq!(
            ServerState::try_from(&cfg).unwrap_err(),
            KrbError::InvalidConfiguration
        );
    }
}
