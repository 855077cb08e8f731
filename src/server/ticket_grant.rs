use super::{decode_request, verify_presentation, DatagramHandler, Presentation};
use crate::config::ProtocolConfig;
use crate::error::KrbError;
use crate::keystore::KeyStore;
use crate::proto::{duration_millis, now_millis, Reply, SharedKey, TgsRequest, ValidityChecker};
use std::net::SocketAddr;
use tracing::{error, info, instrument, trace};

/// A ticket granting server. It owns one long term key, shared with the AS,
/// and knows the keys of the services registered with it.
pub struct TicketGrantServer<K> {
    id: String,
    key: SharedKey,
    config: ProtocolConfig,
    checker: ValidityChecker,
    services: K,
}

impl<K: KeyStore> TicketGrantServer<K> {
    pub fn new(id: &str, key: SharedKey, config: ProtocolConfig, services: K) -> Self {
        let checker = ValidityChecker::from(&config);
        TicketGrantServer {
            id: id.to_string(),
            key,
            config,
            checker,
            services,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    #[instrument(level = "info", skip_all, fields(tgs_id = %self.id))]
    pub fn process_ticket_grant(
        &self,
        tgs_req: &TgsRequest,
        source: SocketAddr,
    ) -> Result<Reply, Reply> {
        let presentation = Presentation {
            encrypted_ticket: &tgs_req.encrypted_ticket,
            ticket_mac: &tgs_req.ticket_mac,
            encrypted_authenticator: &tgs_req.encrypted_authenticator,
            authenticator_mac: &tgs_req.authenticator_mac,
        };

        let (tgt, _authenticator) =
            verify_presentation(&self.id, &self.key, &self.checker, &presentation, source)?;

        trace!(client_id = %tgt.client_id, service_id = %tgs_req.service_id);

        let service_key = self
            .services
            .lookup(&tgs_req.service_id)
            .map_err(|err| match err {
                KrbError::UnknownPrincipal => {
                    info!(service_id = %tgs_req.service_id, "Unknown service");
                    Reply::error_unknown_service(&tgs_req.service_id)
                }
                err => {
                    error!(?err, "Key store failure");
                    Reply::error_internal()
                }
            })?;

        let issue_time = now_millis().map_err(|err| {
            error!(?err, "Unable to read system time");
            Reply::error_internal()
        })?;

        Reply::ticket_builder(
            &tgt.client_id,
            tgt.client_address,
            &tgs_req.service_id,
            issue_time,
            duration_millis(self.config.ticket_lifetime),
            self.config.key_size,
        )
        .build(&service_key, &tgt.session_key)
        .map_err(|err| {
            error!(?err, "Unable to issue service ticket");
            Reply::error_internal()
        })
    }
}

impl<K: KeyStore + 'static> DatagramHandler for TicketGrantServer<K> {
    fn handle(&self, request: &[u8], source: SocketAddr) -> Reply {
        decode_request::<TgsRequest>(request)
            .and_then(|tgs_req| self.process_ticket_grant(&tgs_req, source))
            .unwrap_or_else(|reply| reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeySize;
    use crate::keystore::MemoryKeyStore;
    use crate::proto::{Rejection, Ticket, TicketData};
    use crate::server::tests::{present, SOURCE};
    use std::net::{IpAddr, Ipv4Addr};

    fn server() -> (TicketGrantServer<MemoryKeyStore>, SharedKey, SharedKey) {
        let tgs_key = SharedKey::generate(KeySize::Aes128).unwrap();
        let printer_key = SharedKey::generate(KeySize::Aes256).unwrap();
        let services = MemoryKeyStore::new().with("printer", printer_key.clone());
        let server =
            TicketGrantServer::new("tgs1", tgs_key.clone(), ProtocolConfig::default(), services);
        (server, tgs_key, printer_key)
    }

    fn request(service_id: &str, tgs_key: &SharedKey, auth_time_offset: i64) -> (TgsRequest, Ticket) {
        let now = now_millis().unwrap();
        let (t, a, ticket) = present("tgs1", tgs_key, now, now + auth_time_offset);
        let req = TgsRequest {
            service_id: service_id.to_string(),
            encrypted_ticket: t.ciphertext,
            ticket_mac: t.mac,
            encrypted_authenticator: a.ciphertext,
            authenticator_mac: a.mac,
        };
        (req, ticket)
    }

    #[test]
    fn test_issue_service_ticket() {
        let (server, tgs_key, printer_key) = server();
        let (req, tgt) = request("printer", &tgs_key, 0);

        let reply = server.process_ticket_grant(&req, SOURCE).unwrap();
        let td: TicketData = reply.open(&tgt.session_key).unwrap();
        assert_eq!(td.target_id, "printer");
        assert_ne!(td.session_key, tgt.session_key);

        let st: Ticket = printer_key
            .unseal_parts(&td.encrypted_ticket, &td.ticket_mac)
            .unwrap();
        assert_eq!(st.client_id, "alice");
        assert_eq!(st.target_id, "printer");
        assert_eq!(st.client_address, SOURCE.ip());
        assert_eq!(st.session_key, td.session_key);
    }

    #[test]
    fn test_unknown_service() {
        let (server, tgs_key, _) = server();
        let (req, _) = request("scanner", &tgs_key, 0);

        let reply = server.process_ticket_grant(&req, SOURCE).unwrap_err();
        assert!(reply.is_error);
        assert!(reply.message.contains("unknown"));
    }

    #[test]
    fn test_ticket_for_other_tgs() {
        let (server, _, _) = server();
        let other_key = SharedKey::generate(KeySize::Aes128).unwrap();
        let (req, _) = request("printer", &other_key, 0);

        let reply = server.process_ticket_grant(&req, SOURCE).unwrap_err();
        assert_eq!(reply, Reply::error_integrity("ticket"));
    }

    #[test]
    fn test_wrong_source() {
        let (server, tgs_key, _) = server();
        let (req, _) = request("printer", &tgs_key, 0);
        let source = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 5)), 40000);

        let reply = server.process_ticket_grant(&req, source).unwrap_err();
        assert_eq!(reply, Reply::error_rejected(Rejection::WrongSourceAddress));
    }

    #[test]
    fn test_future_authenticator() {
        let (server, tgs_key, _) = server();
        let (req, _) = request("printer", &tgs_key, 10_000);

        let reply = server.process_ticket_grant(&req, SOURCE).unwrap_err();
        assert_eq!(reply, Reply::error_rejected(Rejection::AuthenticatorFromFuture));
    }
}
