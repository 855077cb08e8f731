mod reply;
mod request;
mod time;
mod validity;

pub use self::reply::{Reply, ServiceReply, TicketReplyBuilder, REPLY_TAMPERED};
pub use self::request::{AsRequest, ServiceRequest, TgsRequest};
pub use self::time::{duration_millis, now_millis, unix_millis};
pub use self::validity::{Rejection, ValidityChecker};

use crate::config::KeySize;
use crate::constants::{AES_128_KEY_LEN, AES_256_KEY_LEN};
use crate::crypto::{
    decrypt_cbc_pkcs7, derive_key_from_password, encrypt_cbc_pkcs7, mac_hmac_sha256,
    random_bytes, verify_hmac_sha256,
};
use crate::error::KrbError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::IpAddr;
use tracing::{debug, error};

/// Every message and sealed structure crosses the wire as JSON. Field names
/// follow the deployed peers so that independent implementations interoperate.
pub trait WireMessage: Serialize + DeserializeOwned {
    fn to_wire(&self) -> Result<Vec<u8>, KrbError> {
        serde_json::to_vec(self).map_err(|err| {
            error!(?err, "Unable to encode message");
            KrbError::MessageEncode
        })
    }

    fn from_wire(buf: &[u8]) -> Result<Self, KrbError> {
        // This fails routinely when a wrong key was used to decrypt, so it is
        // not an error worth shouting about.
        serde_json::from_slice(buf).map_err(|err| {
            debug!(?err, "Unable to decode message");
            KrbError::MessageDecode
        })
    }
}

pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(value.as_ref()))
    }

    // Peers encode an absent byte string as null.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

/// A symmetric secret known to exactly two parties. It is never used directly,
/// only through the crypt and mac sub keys derived from it.
#[derive(Clone, PartialEq, Eq)]
pub enum SharedKey {
    Aes128 { k: [u8; AES_128_KEY_LEN] },
    Aes256 { k: [u8; AES_256_KEY_LEN] },
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKey")
            .field("key_size", &self.key_size())
            .finish_non_exhaustive()
    }
}

impl TryFrom<&[u8]> for SharedKey {
    type Error = KrbError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if let Ok(k) = <[u8; AES_128_KEY_LEN]>::try_from(value) {
            Ok(SharedKey::Aes128 { k })
        } else if let Ok(k) = <[u8; AES_256_KEY_LEN]>::try_from(value) {
            Ok(SharedKey::Aes256 { k })
        } else {
            Err(KrbError::InvalidKeyLength)
        }
    }
}

impl Serialize for SharedKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        base64_bytes::serialize(&self.as_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for SharedKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = base64_bytes::deserialize(deserializer)?;
        SharedKey::try_from(raw.as_slice())
            .map_err(|_| serde::de::Error::custom("invalid shared key length"))
    }
}

impl SharedKey {
    pub fn generate(key_size: KeySize) -> Result<Self, KrbError> {
        match key_size {
            KeySize::Aes128 => {
                let mut k = [0u8; AES_128_KEY_LEN];
                random_bytes(&mut k)?;
                Ok(SharedKey::Aes128 { k })
            }
            KeySize::Aes256 => {
                let mut k = [0u8; AES_256_KEY_LEN];
                random_bytes(&mut k)?;
                Ok(SharedKey::Aes256 { k })
            }
        }
    }

    /// Derive a client's long term key from its password.
    pub fn from_password(password: &str, key_size: KeySize) -> Result<Self, KrbError> {
        let k = derive_key_from_password(password, key_size.key_len());
        SharedKey::try_from(k.as_slice())
    }

    pub fn from_hex(encoded: &str) -> Result<Self, KrbError> {
        let raw = hex::decode(encoded.trim())?;
        SharedKey::try_from(raw.as_slice())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SharedKey::Aes128 { k } => k.as_slice(),
            SharedKey::Aes256 { k } => k.as_slice(),
        }
    }

    pub fn key_size(&self) -> KeySize {
        match self {
            SharedKey::Aes128 { .. } => KeySize::Aes128,
            SharedKey::Aes256 { .. } => KeySize::Aes256,
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KrbError> {
        encrypt_cbc_pkcs7(self.as_bytes(), plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KrbError> {
        decrypt_cbc_pkcs7(self.as_bytes(), ciphertext)
    }

    pub fn mac(&self, data: &[u8]) -> Result<Vec<u8>, KrbError> {
        mac_hmac_sha256(self.as_bytes(), data)
    }

    pub fn verify_mac(&self, data: &[u8], tag: &[u8]) -> Result<(), KrbError> {
        verify_hmac_sha256(self.as_bytes(), data, tag)
    }

    /// Encode, encrypt and MAC a structure under this key.
    pub fn seal<T: WireMessage>(&self, value: &T) -> Result<SealedData, KrbError> {
        let plaintext = value.to_wire()?;
        let ciphertext = self.encrypt(&plaintext)?;
        let mac = self.mac(&ciphertext)?;
        Ok(SealedData { ciphertext, mac })
    }

    /// Verify the MAC before anything else, then decrypt and decode.
    pub fn unseal_parts<T: WireMessage>(&self, ciphertext: &[u8], mac: &[u8]) -> Result<T, KrbError> {
        self.verify_mac(ciphertext, mac)?;
        let plaintext = self.decrypt(ciphertext)?;
        T::from_wire(&plaintext)
    }

    pub fn unseal<T: WireMessage>(&self, sealed: &SealedData) -> Result<T, KrbError> {
        self.unseal_parts(&sealed.ciphertext, &sealed.mac)
    }
}

/// A ciphertext together with the MAC computed over it under the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedData {
    pub ciphertext: Vec<u8>,
    pub mac: Vec<u8>,
}

/// The credential a target principal receives. It is sealed under the target's
/// long term key, so the client can only carry it around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    #[serde(rename = "Key")]
    pub session_key: SharedKey,
    #[serde(rename = "ClientId")]
    pub client_id: String,
    #[serde(rename = "ClientAddress")]
    pub client_address: IpAddr,
    #[serde(rename = "TargetId")]
    pub target_id: String,
    #[serde(rename = "Timestamp")]
    pub issue_time: i64,
    #[serde(rename = "Lifetime")]
    pub lifetime: i64,
}

impl WireMessage for Ticket {}

impl Ticket {
    pub fn expires_at(&self) -> i64 {
        self.issue_time.saturating_add(self.lifetime)
    }
}

/// Proof that the presenter holds a ticket's session key right now. A new one is
/// made for every presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authenticator {
    #[serde(rename = "ClientId")]
    pub client_id: String,
    #[serde(rename = "ClientAddress")]
    pub client_address: IpAddr,
    #[serde(rename = "Timestamp")]
    pub timestamp: i64,
}

impl WireMessage for Authenticator {}

impl Authenticator {
    pub fn new(client_id: &str, client_address: IpAddr, timestamp: i64) -> Self {
        Authenticator {
            client_id: client_id.to_string(),
            client_address: client_address.to_canonical(),
            timestamp,
        }
    }
}

/// What the requester of a ticket gets back: the session key and the opaque
/// ticket to present to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketData {
    #[serde(rename = "Key")]
    pub session_key: SharedKey,
    #[serde(rename = "TargetId")]
    pub target_id: String,
    #[serde(rename = "Timestamp")]
    pub issue_time: i64,
    #[serde(rename = "Lifetime")]
    pub lifetime: i64,
    #[serde(rename = "EncryptedTicket", with = "base64_bytes", default)]
    pub encrypted_ticket: Vec<u8>,
    #[serde(rename = "EncTicketMac", with = "base64_bytes", default)]
    pub ticket_mac: Vec<u8>,
}

impl WireMessage for TicketData {}

impl TicketData {
    pub fn expires_at(&self) -> i64 {
        self.issue_time.saturating_add(self.lifetime)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at() < now
    }
}
