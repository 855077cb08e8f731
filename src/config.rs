use crate::constants::*;
use crate::error::KrbError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeySize {
    #[default]
    Aes128,
    Aes256,
}

impl KeySize {
    pub fn key_len(self) -> usize {
        match self {
            KeySize::Aes128 => AES_128_KEY_LEN,
            KeySize::Aes256 => AES_256_KEY_LEN,
        }
    }

    pub fn key_bits(self) -> u16 {
        match self {
            KeySize::Aes128 => 128,
            KeySize::Aes256 => 256,
        }
    }
}

impl TryFrom<u16> for KeySize {
    type Error = KrbError;

    fn try_from(bits: u16) -> Result<Self, Self::Error> {
        match bits {
            128 => Ok(KeySize::Aes128),
            256 => Ok(KeySize::Aes256),
            _ => Err(KrbError::InvalidKeyLength),
        }
    }
}

/// Deployment wide protocol parameters. Every exchange and the client agent is
/// handed its own copy at construction, there is no global configuration.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub key_size: KeySize,
    /// How long issued tickets stay valid.
    pub ticket_lifetime: Duration,
    /// Maximum age of an authenticator when it is checked.
    pub freshness_window: Duration,
    pub as_port: u16,
    pub tgs_port: u16,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            key_size: KeySize::default(),
            ticket_lifetime: DEFAULT_TICKET_LIFETIME,
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            as_port: DEFAULT_AS_PORT,
            tgs_port: DEFAULT_TGS_PORT,
        }
    }
}

impl ProtocolConfig {
    pub fn with_key_size(mut self, key_size: KeySize) -> Self {
        self.key_size = key_size;
        self
    }

    pub fn with_ticket_lifetime(mut self, lifetime: Duration) -> Self {
        self.ticket_lifetime = lifetime;
        self
    }

    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_size_from_bits() {
        assert_eq!(KeySize::try_from(128), Ok(KeySize::Aes128));
        assert_eq!(KeySize::try_from(256), Ok(KeySize::Aes256));
        assert_eq!(KeySize::try_from(192), Err(KrbError::InvalidKeyLength));
        assert_eq!(KeySize::Aes256.key_len(), 32);
    }

    #[test]
    fn test_defaults() {
        let cfg = ProtocolConfig::default();
        assert_eq!(cfg.key_size, KeySize::Aes128);
        assert_eq!(cfg.ticket_lifetime, Duration::from_secs(1800));
        assert_eq!(cfg.freshness_window, Duration::from_secs(60));
        assert_eq!(cfg.as_port, 8888);
        assert_eq!(cfg.tgs_port, 8889);
    }
}
