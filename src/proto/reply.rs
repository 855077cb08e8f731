use super::validity::Rejection;
use super::{base64_bytes, SealedData, SharedKey, Ticket, TicketData, WireMessage};
use crate::config::KeySize;
use crate::constants::REPLY_OK;
use crate::error::KrbError;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::{debug, warn};

/// Reported by the client when a reply's MAC does not verify under the key it
/// holds. The reply was either altered in flight or sealed under another key.
pub const REPLY_TAMPERED: &str = "reply failed its integrity check";

/// The single reply envelope used by every exchange. Error replies carry no
/// payload and no MAC, because the server may not share a key with the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(rename = "IsError")]
    pub is_error: bool,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "EncryptedData", with = "base64_bytes", default)]
    pub encrypted_payload: Vec<u8>,
    #[serde(rename = "EncDataMac", with = "base64_bytes", default)]
    pub payload_mac: Vec<u8>,
}

impl WireMessage for Reply {}

/// The mutual authentication proof a service returns to its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReply {
    #[serde(rename = "Timestamp")]
    pub timestamp: i64,
}

impl WireMessage for ServiceReply {}

pub struct TicketReplyBuilder {
    client_id: String,
    client_address: IpAddr,
    target_id: String,
    issue_time: i64,
    lifetime: i64,
    key_size: KeySize,
}

impl Reply {
    pub fn success(message: impl Into<String>, payload: SealedData) -> Self {
        Reply {
            is_error: false,
            message: message.into(),
            encrypted_payload: payload.ciphertext,
            payload_mac: payload.mac,
        }
    }

    pub fn ok(payload: SealedData) -> Self {
        Reply::success(REPLY_OK, payload)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply {
            is_error: true,
            message: message.into(),
            encrypted_payload: Vec::new(),
            payload_mac: Vec::new(),
        }
    }

    pub fn error_unknown_client(client_id: &str) -> Self {
        Reply::error(format!("unknown client {client_id}"))
    }

    pub fn error_unknown_tgs(tgs_id: &str) -> Self {
        Reply::error(format!("unknown tgs {tgs_id}"))
    }

    pub fn error_unknown_service(service_id: &str) -> Self {
        Reply::error(format!("unknown service {service_id}"))
    }

    pub fn error_integrity(part: &str) -> Self {
        Reply::error(format!("mac check for received {part} failed"))
    }

    pub fn error_inconsistent(part: &str) -> Self {
        Reply::error(format!("inconsistent {part} received"))
    }

    pub fn error_wrong_audience(own_id: &str) -> Self {
        Reply::error(format!("ticket was not issued for {own_id}"))
    }

    pub fn error_rejected(rejection: Rejection) -> Self {
        Reply::error(rejection.reason())
    }

    pub fn error_malformed_request() -> Self {
        Reply::error("malformed request")
    }

    pub fn error_internal() -> Self {
        Reply::error("generic server error")
    }

    /// Issue a new ticket for `target_id`. The ticket is sealed under the
    /// target's key and, together with the session key, handed back sealed
    /// under the requester's key.
    pub fn ticket_builder(
        client_id: &str,
        client_address: IpAddr,
        target_id: &str,
        issue_time: i64,
        lifetime: i64,
        key_size: KeySize,
    ) -> TicketReplyBuilder {
        TicketReplyBuilder {
            client_id: client_id.to_string(),
            client_address: client_address.to_canonical(),
            target_id: target_id.to_string(),
            issue_time,
            lifetime,
            key_size,
        }
    }

    /// Open a reply with the key we expect it to be sealed under.
    pub fn open<T: WireMessage>(&self, key: &SharedKey) -> Result<T, KrbError> {
        if self.is_error {
            return Err(KrbError::ReplyError(self.message.clone()));
        }

        key.verify_mac(&self.encrypted_payload, &self.payload_mac)
            .map_err(|_| {
                warn!("Reply failed integrity check");
                KrbError::ReplyError(REPLY_TAMPERED.to_string())
            })?;

        // The MAC verified, so this key sealed the payload. Failing to open it now
        // means the key was derived from the wrong secret.
        let plaintext = key.decrypt(&self.encrypted_payload).map_err(|err| {
            debug!(?err, "Unable to decrypt reply payload");
            KrbError::PasswordError
        })?;

        T::from_wire(&plaintext).map_err(|_| KrbError::PasswordError)
    }
}

impl TicketReplyBuilder {
    pub fn build(
        self,
        target_key: &SharedKey,
        requester_key: &SharedKey,
    ) -> Result<Reply, KrbError> {
        let session_key = SharedKey::generate(self.key_size)?;

        let ticket = Ticket {
            session_key: session_key.clone(),
            client_id: self.client_id,
            client_address: self.client_address,
            target_id: self.target_id.clone(),
            issue_time: self.issue_time,
            lifetime: self.lifetime,
        };

        let sealed_ticket = target_key.seal(&ticket)?;

        let ticket_data = TicketData {
            session_key,
            target_id: self.target_id,
            issue_time: self.issue_time,
            lifetime: self.lifetime,
            encrypted_ticket: sealed_ticket.ciphertext,
            ticket_mac: sealed_ticket.mac,
        };

        requester_key.seal(&ticket_data).map(Reply::ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn keys() -> (SharedKey, SharedKey) {
        (
            SharedKey::generate(KeySize::Aes128).unwrap(),
            SharedKey::generate(KeySize::Aes128).unwrap(),
        )
    }

    #[test]
    fn test_error_reply_wire() {
        let wire = Reply::error_unknown_client("bob").to_wire().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&wire).unwrap();
        assert_eq!(value["IsError"], true);
        assert_eq!(value["Message"], "unknown client bob");
        assert_eq!(value["EncryptedData"], "");
    }

    #[test]
    fn test_reply_accepts_null_payload() {
        let wire = br#"{"IsError":true,"Message":"nope","EncryptedData":null,"EncDataMac":null}"#;
        let reply = Reply::from_wire(wire).unwrap();
        assert!(reply.is_error);
        assert!(reply.encrypted_payload.is_empty());
    }

    #[test]
    fn test_open_error_reply() {
        let (key, _) = keys();
        let reply = Reply::error_unknown_service("printer");
        assert_eq!(
            reply.open::<ServiceReply>(&key),
            Err(KrbError::ReplyError("unknown service printer".to_string()))
        );
    }

    #[test]
    fn test_ticket_builder() {
        let (target_key, requester_key) = keys();
        let reply = Reply::ticket_builder("alice", LOCAL, "tgs1", 1000, 1_800_000, KeySize::Aes128)
            .build(&target_key, &requester_key)
            .unwrap();

        assert!(!reply.is_error);
        assert_eq!(reply.message, REPLY_OK);

        let td: TicketData = reply.open(&requester_key).unwrap();
        assert_eq!(td.target_id, "tgs1");
        assert_eq!(td.issue_time, 1000);
        assert_eq!(td.lifetime, 1_800_000);

        let ticket: Ticket = target_key
            .unseal_parts(&td.encrypted_ticket, &td.ticket_mac)
            .unwrap();
        assert_eq!(ticket.session_key, td.session_key);
        assert_eq!(ticket.client_id, "alice");
        assert_eq!(ticket.client_address, LOCAL);
        assert_eq!(ticket.target_id, "tgs1");
        assert_eq!(ticket.issue_time, td.issue_time);
        assert_eq!(ticket.lifetime, td.lifetime);

        // The requester cannot open the ticket.
        assert!(requester_key
            .unseal_parts::<Ticket>(&td.encrypted_ticket, &td.ticket_mac)
            .is_err());
    }

    #[test]
    fn test_open_with_wrong_key_is_tampered() {
        let (target_key, requester_key) = keys();
        let reply = Reply::ticket_builder("alice", LOCAL, "tgs1", 1000, 1000, KeySize::Aes128)
            .build(&target_key, &requester_key)
            .unwrap();

        let err = reply.open::<TicketData>(&target_key).unwrap_err();
        assert_eq!(err, KrbError::ReplyError(REPLY_TAMPERED.to_string()));
        assert!(err.is_credential_failure());
    }

    #[test]
    fn test_open_tampered_payload() {
        let (target_key, requester_key) = keys();
        let mut reply = Reply::ticket_builder("alice", LOCAL, "tgs1", 1000, 1000, KeySize::Aes128)
            .build(&target_key, &requester_key)
            .unwrap();
        reply.encrypted_payload[17] ^= 0x80;

        assert_eq!(
            reply.open::<TicketData>(&requester_key),
            Err(KrbError::ReplyError(REPLY_TAMPERED.to_string()))
        );
    }

    #[test]
    fn test_open_authentic_but_undecodable() {
        let (key, _) = keys();
        let sealed = key.seal(&ServiceReply { timestamp: 5 }).unwrap();
        let reply = Reply::ok(sealed);

        assert_eq!(
            reply.open::<TicketData>(&key),
            Err(KrbError::PasswordError)
        );
        assert_eq!(reply.open::<ServiceReply>(&key), Ok(ServiceReply { timestamp: 5 }));
    }

    #[test]
    fn test_rejection_reply_message() {
        let reply = Reply::error_rejected(Rejection::TicketExpired);
        assert!(reply.is_error);
        assert_eq!(reply.message, "ticket expired");
    }
}
