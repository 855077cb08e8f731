use super::time::duration_millis;
use super::{Authenticator, Ticket};
use crate::config::ProtocolConfig;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Why an otherwise authentic presentation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    AuthenticatorFromFuture,
    AuthenticatorTooOld,
    TicketExpired,
    ClientMismatch,
    DeclaredAddressMismatch,
    WrongSourceAddress,
}

impl Rejection {
    pub fn reason(self) -> &'static str {
        match self {
            Rejection::AuthenticatorFromFuture => "authenticator timestamp is in the future",
            Rejection::AuthenticatorTooOld => "authenticator is too old",
            Rejection::TicketExpired => "ticket expired",
            Rejection::ClientMismatch => "authenticator and ticket client differ",
            Rejection::DeclaredAddressMismatch => "authenticator and ticket address differ",
            Rejection::WrongSourceAddress => "request sent from an address not in the ticket",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Decides whether a decrypted ticket and authenticator pair, received from a
/// given source address, may be accepted.
#[derive(Debug, Clone, Copy)]
pub struct ValidityChecker {
    freshness_window: i64,
}

impl From<&ProtocolConfig> for ValidityChecker {
    fn from(config: &ProtocolConfig) -> Self {
        ValidityChecker::new(config.freshness_window)
    }
}

impl ValidityChecker {
    pub fn new(freshness_window: Duration) -> Self {
        ValidityChecker {
            freshness_window: duration_millis(freshness_window),
        }
    }

    /// The checks run in a fixed order and the first failure is reported.
    pub fn check(
        &self,
        authenticator: &Authenticator,
        ticket: &Ticket,
        observed: IpAddr,
        now: i64,
    ) -> Result<(), Rejection> {
        if authenticator.timestamp > now {
            return Err(Rejection::AuthenticatorFromFuture);
        }

        if now.saturating_sub(authenticator.timestamp) > self.freshness_window {
            return Err(Rejection::AuthenticatorTooOld);
        }

        // Valid up to and including the last millisecond of its lifetime.
        if now > ticket.expires_at() {
            return Err(Rejection::TicketExpired);
        }

        if authenticator.client_id != ticket.client_id {
            return Err(Rejection::ClientMismatch);
        }

        if authenticator.client_address.to_canonical() != ticket.client_address.to_canonical() {
            return Err(Rejection::DeclaredAddressMismatch);
        }

        if observed.to_canonical() != ticket.client_address.to_canonical() {
            return Err(Rejection::WrongSourceAddress);
        }

        Ok(())
    }
}
