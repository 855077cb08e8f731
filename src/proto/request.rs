use super::{base64_bytes, SealedData, TicketData, WireMessage};
use serde::{Deserialize, Serialize};

/// First step of a login. Sent in the clear, the reply is only useful to the
/// holder of the client's long term key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsRequest {
    #[serde(rename = "ClientId")]
    pub client_id: String,
    #[serde(rename = "TGSId")]
    pub tgs_id: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: i64,
}

impl WireMessage for AsRequest {}

impl AsRequest {
    pub fn new(client_id: &str, tgs_id: &str, timestamp: i64) -> Self {
        AsRequest {
            client_id: client_id.to_string(),
            tgs_id: tgs_id.to_string(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TgsRequest {
    #[serde(rename = "ServiceId")]
    pub service_id: String,
    #[serde(rename = "EncryptedTicket", with = "base64_bytes", default)]
    pub encrypted_ticket: Vec<u8>,
    #[serde(rename = "EncTicketMac", with = "base64_bytes", default)]
    pub ticket_mac: Vec<u8>,
    #[serde(rename = "EncryptedAuthenticator", with = "base64_bytes", default)]
    pub encrypted_authenticator: Vec<u8>,
    #[serde(rename = "EncAuthenticatorMac", with = "base64_bytes", default)]
    pub authenticator_mac: Vec<u8>,
}

impl WireMessage for TgsRequest {}

impl TgsRequest {
    pub fn new(service_id: &str, tgt: &TicketData, authenticator: SealedData) -> Self {
        TgsRequest {
            service_id: service_id.to_string(),
            encrypted_ticket: tgt.encrypted_ticket.clone(),
            ticket_mac: tgt.ticket_mac.clone(),
            encrypted_authenticator: authenticator.ciphertext,
            authenticator_mac: authenticator.mac,
        }
    }
}

/// Presentation of a service ticket. Same shape as a [TgsRequest], minus the
/// service name since the service knows who it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    #[serde(rename = "EncryptedTicket", with = "base64_bytes", default)]
    pub encrypted_ticket: Vec<u8>,
    #[serde(rename = "EncTicketMac", with = "base64_bytes", default)]
    pub ticket_mac: Vec<u8>,
    #[serde(rename = "EncryptedAuthenticator", with = "base64_bytes", default)]
    pub encrypted_authenticator: Vec<u8>,
    #[serde(rename = "EncAuthenticatorMac", with = "base64_bytes", default)]
    pub authenticator_mac: Vec<u8>,
}

impl WireMessage for ServiceRequest {}

impl ServiceRequest {
    pub fn new(service_ticket: &TicketData, authenticator: SealedData) -> Self {
        ServiceRequest {
            encrypted_ticket: service_ticket.encrypted_ticket.clone(),
            ticket_mac: service_ticket.ticket_mac.clone(),
            encrypted_authenticator: authenticator.ciphertext,
            authenticator_mac: authenticator.mac,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KrbError;
    use crate::proto::SharedKey;

    #[test]
    fn test_as_request_wire() {
        let wire = AsRequest::new("alice", "tgs1", 42).to_wire().unwrap();
        assert_eq!(
            std::str::from_utf8(&wire).unwrap(),
            r#"{"ClientId":"alice","TGSId":"tgs1","Timestamp":42}"#
        );
    }

    #[test]
    fn test_tgs_request_wire() {
        let tgt = TicketData {
            session_key: SharedKey::Aes128 { k: [0u8; 16] },
            target_id: "tgs1".to_string(),
            issue_time: 0,
            lifetime: 0,
            encrypted_ticket: vec![1, 2, 3],
            ticket_mac: vec![4, 5, 6],
        };
        let auth = SealedData {
            ciphertext: vec![7],
            mac: vec![8],
        };
        let req = TgsRequest::new("printer", &tgt, auth);
        let value: serde_json::Value = serde_json::from_slice(&req.to_wire().unwrap()).unwrap();

        assert_eq!(value["ServiceId"], "printer");
        assert_eq!(value["EncryptedTicket"], "AQID");
        assert_eq!(value["EncTicketMac"], "BAUG");
        assert_eq!(value["EncryptedAuthenticator"], "Bw==");
        assert_eq!(value["EncAuthenticatorMac"], "CA==");
    }

    #[test]
    fn test_service_request_decode() {
        let wire = br#"{"EncryptedTicket":"AQID","EncTicketMac":null,"EncryptedAuthenticator":"Bw=="}"#;
        let req = ServiceRequest::from_wire(wire).unwrap();
        assert_eq!(req.encrypted_ticket, vec![1, 2, 3]);
        assert!(req.ticket_mac.is_empty());
        assert!(req.authenticator_mac.is_empty());

        assert_eq!(
            ServiceRequest::from_wire(b"not json"),
            Err(KrbError::MessageDecode)
        );
    }
}
