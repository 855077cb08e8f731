mod authentication;
mod service;
mod ticket_grant;

pub use self::authentication::AuthenticationServer;
pub use self::service::ServiceServer;
pub use self::ticket_grant::TicketGrantServer;

use crate::proto::{
    now_millis, Authenticator, Reply, SharedKey, Ticket, ValidityChecker, WireMessage,
};
use std::net::SocketAddr;
use tracing::{error, info, warn};

/// One inbound datagram in, exactly one reply out. Implementations hold no
/// mutable state and are invoked concurrently.
pub trait DatagramHandler: Send + Sync + 'static {
    fn handle(&self, request: &[u8], source: SocketAddr) -> Reply;
}

pub(crate) fn decode_request<T: WireMessage>(request: &[u8]) -> Result<T, Reply> {
    T::from_wire(request).map_err(|_| {
        info!("Received undecodable request");
        Reply::error_malformed_request()
    })
}

/// The encrypted halves of a ticket presentation, as found in a TGS or
/// service request.
pub(crate) struct Presentation<'a> {
    pub encrypted_ticket: &'a [u8],
    pub ticket_mac: &'a [u8],
    pub encrypted_authenticator: &'a [u8],
    pub authenticator_mac: &'a [u8],
}

/// Open and check a presented ticket and authenticator. The ticket must be
/// sealed under `own_key` and addressed to `own_id`.
pub(crate) fn verify_presentation(
    own_id: &str,
    own_key: &SharedKey,
    checker: &ValidityChecker,
    presentation: &Presentation<'_>,
    source: SocketAddr,
) -> Result<(Ticket, Authenticator), Reply> {
    own_key
        .verify_mac(presentation.encrypted_ticket, presentation.ticket_mac)
        .map_err(|_| {
            warn!(?source, "Ticket failed integrity check");
            Reply::error_integrity("ticket")
        })?;

    let ticket: Ticket = own_key
        .decrypt(presentation.encrypted_ticket)
        .and_then(|plaintext| Ticket::from_wire(&plaintext))
        .map_err(|err| {
            warn!(?err, ?source, "Unable to open authentic ticket");
            Reply::error_inconsistent("ticket")
        })?;

    if ticket.target_id != own_id {
        warn!(target_id = %ticket.target_id, "Ticket was issued for another principal");
        return Err(Reply::error_wrong_audience(own_id));
    }

    let authenticator: Authenticator = ticket
        .session_key
        .verify_mac(
            presentation.encrypted_authenticator,
            presentation.authenticator_mac,
        )
        .map_err(|_| {
            warn!(?source, "Authenticator failed integrity check");
            Reply::error_integrity("authenticator")
        })
        .and_then(|()| {
            ticket
                .session_key
                .decrypt(presentation.encrypted_authenticator)
                .and_then(|plaintext| Authenticator::from_wire(&plaintext))
                .map_err(|err| {
                    warn!(?err, ?source, "Unable to open authentic authenticator");
                    Reply::error_inconsistent("authenticator")
                })
        })?;

    let now = now_millis().map_err(|err| {
        error!(?err, "Unable to read system time");
        Reply::error_internal()
    })?;

    checker
        .check(&authenticator, &ticket, source.ip(), now)
        .map_err(|rejection| {
            info!(%rejection, client_id = %ticket.client_id, "Presentation rejected");
            Reply::error_rejected(rejection)
        })?;

    Ok((ticket, authenticator))
}
