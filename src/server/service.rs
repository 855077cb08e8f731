use super::{decode_request, verify_presentation, DatagramHandler, Presentation};
use crate::config::ProtocolConfig;
use crate::proto::{Reply, ServiceReply, ServiceRequest, SharedKey, ValidityChecker};
use std::net::SocketAddr;
use tracing::{error, info, instrument};

/// The final hop. Accepts service tickets sealed under its own key and proves
/// itself back to the client.
pub struct ServiceServer {
    id: String,
    key: SharedKey,
    checker: ValidityChecker,
}

impl ServiceServer {
    pub fn new(id: &str, key: SharedKey, config: &ProtocolConfig) -> Self {
        ServiceServer {
            id: id.to_string(),
            key,
            checker: ValidityChecker::from(config),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    #[instrument(level = "info", skip_all, fields(service_id = %self.id))]
    pub fn process_service(
        &self,
        svc_req: &ServiceRequest,
        source: SocketAddr,
    ) -> Result<Reply, Reply> {
        let presentation = Presentation {
            encrypted_ticket: &svc_req.encrypted_ticket,
            ticket_mac: &svc_req.ticket_mac,
            encrypted_authenticator: &svc_req.encrypted_authenticator,
            authenticator_mac: &svc_req.authenticator_mac,
        };

        let (ticket, authenticator) =
            verify_presentation(&self.id, &self.key, &self.checker, &presentation, source)?;

        info!(client_id = %ticket.client_id, "Client authenticated");

        let proof = ServiceReply {
            timestamp: authenticator.timestamp.saturating_add(1),
        };

        ticket
            .session_key
            .seal(&proof)
            .map(|sealed| {
                Reply::success(format!("Hello {}: Authenticated", ticket.client_id), sealed)
            })
            .map_err(|err| {
                error!(?err, "Unable to seal service reply");
                Reply::error_internal()
            })
    }
}

impl DatagramHandler for ServiceServer {
    fn handle(&self, request: &[u8], source: SocketAddr) -> Reply {
        decode_request::<ServiceRequest>(request)
            .and_then(|svc_req| self.process_service(&svc_req, source))
            .unwrap_or_else(|reply| reply)
    }
}
