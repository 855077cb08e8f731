use super::{decode_request, DatagramHandler};
use crate::config::ProtocolConfig;
use crate::error::KrbError;
use crate::keystore::KeyStore;
use crate::proto::{duration_millis, now_millis, AsRequest, Reply, SharedKey};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use tracing::{error, info, instrument, trace};

/// Issues ticket granting tickets. The key store must know both the clients
/// and the TGS principals of the realm.
pub struct AuthenticationServer<K> {
    config: ProtocolConfig,
    tgs_list: BTreeSet<String>,
    keystore: K,
}

impl<K: KeyStore> AuthenticationServer<K> {
    pub fn new<I, S>(config: ProtocolConfig, tgs_list: I, keystore: K) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AuthenticationServer {
            config,
            tgs_list: tgs_list.into_iter().map(Into::into).collect(),
            keystore,
        }
    }

    fn lookup(&self, principal: &str, unknown: fn(&str) -> Reply) -> Result<SharedKey, Reply> {
        self.keystore.lookup(principal).map_err(|err| match err {
            KrbError::UnknownPrincipal => {
                info!(?principal, "Unknown principal");
                unknown(principal)
            }
            err => {
                error!(?err, "Key store failure");
                Reply::error_internal()
            }
        })
    }

    #[instrument(level = "info", skip_all)]
    pub fn process_authentication(
        &self,
        as_req: &AsRequest,
        source: SocketAddr,
    ) -> Result<Reply, Reply> {
        trace!(client_id = %as_req.client_id, tgs_id = %as_req.tgs_id, ?source);

        let client_key = self.lookup(&as_req.client_id, Reply::error_unknown_client)?;

        if !self.tgs_list.contains(&as_req.tgs_id) {
            info!(tgs_id = %as_req.tgs_id, "Requested TGS is not part of this realm");
            return Err(Reply::error_unknown_tgs(&as_req.tgs_id));
        }

        let tgs_key = self.lookup(&as_req.tgs_id, Reply::error_unknown_tgs)?;

        let issue_time = now_millis().map_err(|err| {
            error!(?err, "Unable to read system time");
            Reply::error_internal()
        })?;

        Reply::ticket_builder(
            &as_req.client_id,
            source.ip(),
            &as_req.tgs_id,
            issue_time,
            duration_millis(self.config.ticket_lifetime),
            self.config.key_size,
        )
        .build(&tgs_key, &client_key)
        .map_err(|err| {
            error!(?err, "Unable to issue ticket granting ticket");
            Reply::error_internal()
        })
    }
}

impl<K: KeyStore + 'static> DatagramHandler for AuthenticationServer<K> {
    fn handle(&self, request: &[u8], source: SocketAddr) -> Reply {
        decode_request::<AsRequest>(request)
            .and_then(|as_req| self.process_authentication(&as_req, source))
            .unwrap_or_else(|reply| reply)
    }
}
