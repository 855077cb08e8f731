use crate::ccache::TicketCache;
use crate::config::ProtocolConfig;
use crate::error::KrbError;
use crate::proto::{
    now_millis, AsRequest, Authenticator, Reply, ServiceReply, ServiceRequest, SharedKey,
    TgsRequest, TicketData, WireMessage, REPLY_TAMPERED,
};
use crate::transport::Transport;
use std::net::SocketAddr;
use tracing::{debug, error, info, instrument, warn};

/// Drives the AS, TGS and service exchanges for a single client principal,
/// keeping the tickets it obtains in a [TicketCache].
pub struct ClientAgent<T, C> {
    config: ProtocolConfig,
    client_id: String,
    transport: T,
    cache: C,
}

impl<T: Transport, C: TicketCache> ClientAgent<T, C> {
    pub fn new(config: ProtocolConfig, client_id: &str, transport: T, cache: C) -> Self {
        ClientAgent {
            config,
            client_id: client_id.to_string(),
            transport,
            cache,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    async fn exchange(&self, address: SocketAddr, request: &[u8]) -> Result<Reply, KrbError> {
        let buf = self.transport.send_and_await_reply(address, request).await?;
        Reply::from_wire(&buf).map_err(|err| {
            error!(?err, ?address, "Server sent an undecodable reply");
            err
        })
    }

    /// A reply that fails its integrity check was sealed under a key other than
    /// the cached session key, so that ticket is of no further use.
    fn open_or_evict<R: WireMessage>(
        &mut self,
        reply: &Reply,
        key: &SharedKey,
        used_ticket: &str,
    ) -> Result<R, KrbError> {
        let opened = reply.open(key);
        if matches!(&opened, Err(KrbError::ReplyError(msg)) if msg == REPLY_TAMPERED) {
            warn!(target_id = %used_ticket, "Evicting ticket after integrity failure");
            self.cache.delete(&self.client_id, used_ticket)?;
        }
        opened
    }

    fn check_target(ticket: &TicketData, requested: &str) -> Result<(), KrbError> {
        if ticket.target_id != requested {
            error!(issued = %ticket.target_id, %requested, "Ticket issued for wrong target");
            return Err(KrbError::ReplyError(format!(
                "ticket issued for {} instead of {}",
                ticket.target_id, requested
            )));
        }
        Ok(())
    }

    /// Return the cached ticket for `target_id`. Expired tickets are removed
    /// and reported, forcing a new exchange.
    pub fn cached_ticket(&mut self, target_id: &str) -> Result<TicketData, KrbError> {
        let Some(ticket) = self.cache.get(&self.client_id, target_id)? else {
            return Err(KrbError::TokenMissing);
        };

        if ticket.is_expired(now_millis()?) {
            info!(%target_id, "Cached ticket expired");
            self.cache.delete(&self.client_id, target_id)?;
            return Err(KrbError::TokenExpired);
        }

        Ok(ticket)
    }

    pub fn tgs_ticket(&mut self, tgs_id: &str) -> Result<TicketData, KrbError> {
        self.cached_ticket(tgs_id)
    }

    pub fn service_ticket(&mut self, service_id: &str) -> Result<TicketData, KrbError> {
        self.cached_ticket(service_id)
    }

    /// Obtain a ticket granting ticket for `tgs_id` from the AS at `as_address`.
    #[instrument(level = "info", skip_all, fields(client_id = %self.client_id))]
    pub async fn authenticate(
        &mut self,
        client_key: &SharedKey,
        tgs_id: &str,
        as_address: SocketAddr,
    ) -> Result<TicketData, KrbError> {
        let as_req = AsRequest::new(&self.client_id, tgs_id, now_millis()?);
        let reply = self.exchange(as_address, &as_req.to_wire()?).await?;

        let tgt: TicketData = reply.open(client_key)?;
        Self::check_target(&tgt, tgs_id)?;

        self.cache.put(&self.client_id, &tgt)?;
        debug!(expires_at = tgt.expires_at(), "Stored ticket granting ticket");
        Ok(tgt)
    }

    /// As [Self::authenticate], deriving the client key from a password.
    pub async fn authenticate_with_password(
        &mut self,
        password: &str,
        tgs_id: &str,
        as_address: SocketAddr,
    ) -> Result<TicketData, KrbError> {
        let client_key = SharedKey::from_password(password, self.config.key_size)?;
        self.authenticate(&client_key, tgs_id, as_address).await
    }

    /// Exchange the cached ticket granting ticket for a ticket to `service_id`.
    #[instrument(level = "info", skip_all, fields(client_id = %self.client_id))]
    pub async fn request_service_ticket(
        &mut self,
        tgs_id: &str,
        tgs_address: SocketAddr,
        service_id: &str,
    ) -> Result<TicketData, KrbError> {
        let tgt = self.tgs_ticket(tgs_id)?;

        let own_address = self.transport.source_address_for(tgs_address).await?;
        let authenticator = Authenticator::new(&self.client_id, own_address, now_millis()?);
        let sealed = tgt.session_key.seal(&authenticator)?;

        let tgs_req = TgsRequest::new(service_id, &tgt, sealed);
        let reply = self.exchange(tgs_address, &tgs_req.to_wire()?).await?;

        let service_ticket: TicketData = self.open_or_evict(&reply, &tgt.session_key, tgs_id)?;
        Self::check_target(&service_ticket, service_id)?;

        self.cache.put(&self.client_id, &service_ticket)?;
        Ok(service_ticket)
    }

    /// Present the cached ticket for `service_id` and verify the service's
    /// proof. Returns the greeting the service sent.
    #[instrument(level = "info", skip_all, fields(client_id = %self.client_id))]
    pub async fn access_service(
        &mut self,
        service_id: &str,
        service_address: SocketAddr,
    ) -> Result<String, KrbError> {
        let service_ticket = self.service_ticket(service_id)?;

        let own_address = self.transport.source_address_for(service_address).await?;
        let authenticator = Authenticator::new(&self.client_id, own_address, now_millis()?);
        let sealed = service_ticket.session_key.seal(&authenticator)?;

        let svc_req = ServiceRequest::new(&service_ticket, sealed);
        let reply = self
            .exchange(service_address, &svc_req.to_wire()?)
            .await?;

        let proof: ServiceReply =
            self.open_or_evict(&reply, &service_ticket.session_key, service_id)?;

        if proof.timestamp != authenticator.timestamp.saturating_add(1) {
            error!(
                expected = authenticator.timestamp.saturating_add(1),
                received = proof.timestamp,
                "Service failed to prove itself"
            );
            return Err(KrbError::MutualAuthenticationFailed);
        }

        Ok(reply.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccache::MemoryTicketCache;
    use crate::config::KeySize;
    use crate::keystore::MemoryKeyStore;
    use crate::server::{AuthenticationServer, ServiceServer, TicketGrantServer};
    use crate::transport::{create_udp_server, CoreAction, UdpTransport};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;

    const PASSWORD: &str = "correct horse battery staple";

    struct Realm {
        tx: broadcast::Sender<CoreAction>,
        handles: Vec<tokio::task::JoinHandle<()>>,
        as_address: SocketAddr,
        tgs_address: SocketAddr,
        service_address: SocketAddr,
    }

    impl Realm {
        async fn start(config: ProtocolConfig) -> Realm {
            let _ = tracing_subscriber::fmt::try_init();
            let (tx, _) = broadcast::channel(4);
            let any: SocketAddr = "127.0.0.1:0".parse().unwrap();

            let tgs_key = SharedKey::generate(KeySize::Aes128).unwrap();
            let service_key = SharedKey::generate(KeySize::Aes128).unwrap();

            let as_keys = MemoryKeyStore::new()
                .with(
                    "alice",
                    SharedKey::from_password(PASSWORD, config.key_size).unwrap(),
                )
                .with("tgs1", tgs_key.clone());
            let as_server = AuthenticationServer::new(config.clone(), ["tgs1"], as_keys);

            let services = MemoryKeyStore::new().with("serviceX", service_key.clone());
            let tgs_server = TicketGrantServer::new("tgs1", tgs_key, config.clone(), services);

            let service_server = ServiceServer::new("serviceX", service_key, &config);

            let (h1, as_address) = create_udp_server(any, Arc::new(as_server), tx.subscribe())
                .await
                .unwrap();
            let (h2, tgs_address) = create_udp_server(any, Arc::new(tgs_server), tx.subscribe())
                .await
                .unwrap();
            let (h3, service_address) =
                create_udp_server(any, Arc::new(service_server), tx.subscribe())
                    .await
                    .unwrap();

            Realm {
                tx,
                handles: vec![h1, h2, h3],
                as_address,
                tgs_address,
                service_address,
            }
        }

        async fn stop(self) {
            self.tx.send(CoreAction::Shutdown).unwrap();
            for h in self.handles {
                h.await.unwrap();
            }
        }
    }

    fn agent(config: ProtocolConfig) -> ClientAgent<UdpTransport, MemoryTicketCache> {
        ClientAgent::new(
            config,
            "alice",
            UdpTransport::default().with_timeout(Duration::from_secs(5)),
            MemoryTicketCache::new(),
        )
    }

    #[tokio::test]
    async fn test_authenticate() {
        let config = ProtocolConfig::default();
        let realm = Realm::start(config.clone()).await;
        let mut client = agent(config);

        let tgt = client
            .authenticate_with_password(PASSWORD, "tgs1", realm.as_address)
            .await
            .unwrap();
        assert_eq!(tgt.target_id, "tgs1");
        assert_eq!(tgt.lifetime, 1_800_000);
        assert_eq!(client.tgs_ticket("tgs1"), Ok(tgt));

        realm.stop().await;
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let config = ProtocolConfig::default();
        let realm = Realm::start(config.clone()).await;
        let mut client = agent(config);

        let err = client
            .authenticate_with_password("hunter2", "tgs1", realm.as_address)
            .await
            .unwrap_err();
        assert!(err.is_credential_failure());
        assert_eq!(client.tgs_ticket("tgs1"), Err(KrbError::TokenMissing));

        realm.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_client_and_tgs() {
        let config = ProtocolConfig::default();
        let realm = Realm::start(config.clone()).await;
        let key = SharedKey::from_password(PASSWORD, config.key_size).unwrap();

        let mut stranger = ClientAgent::new(
            config.clone(),
            "mallory",
            UdpTransport::default().with_timeout(Duration::from_secs(5)),
            MemoryTicketCache::new(),
        );
        let err = stranger
            .authenticate(&key, "tgs1", realm.as_address)
            .await
            .unwrap_err();
        assert!(
            matches!(&err, KrbError::ReplyError(msg) if msg.contains("unknown")),
            "{err:?}"
        );

        let mut client = agent(config);
        let err = client
            .authenticate(&key, "tgs9", realm.as_address)
            .await
            .unwrap_err();
        assert!(
            matches!(&err, KrbError::ReplyError(msg) if msg.contains("unknown")),
            "{err:?}"
        );

        realm.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let config = ProtocolConfig::default();
        let realm = Realm::start(config.clone()).await;
        let mut client = agent(config);

        client
            .authenticate_with_password(PASSWORD, "tgs1", realm.as_address)
            .await
            .unwrap();

        let err = client
            .request_service_ticket("tgs1", realm.tgs_address, "serviceY")
            .await
            .unwrap_err();
        assert!(
            matches!(&err, KrbError::ReplyError(msg) if msg.contains("unknown")),
            "{err:?}"
        );

        // Error replies are not integrity failures, the ticket is kept.
        assert!(client.tgs_ticket("tgs1").is_ok());

        realm.stop().await;
    }

    #[tokio::test]
    async fn test_full_chain() {
        let config = ProtocolConfig::default();
        let realm = Realm::start(config.clone()).await;
        let mut client = agent(config);

        client
            .authenticate_with_password(PASSWORD, "tgs1", realm.as_address)
            .await
            .unwrap();

        let st = client
            .request_service_ticket("tgs1", realm.tgs_address, "serviceX")
            .await
            .unwrap();
        assert_eq!(st.target_id, "serviceX");
        assert_eq!(client.service_ticket("serviceX"), Ok(st));

        let greeting = client
            .access_service("serviceX", realm.service_address)
            .await
            .unwrap();
        assert_eq!(greeting, "Hello alice: Authenticated");

        // Cached tickets are reused for further presentations.
        let greeting = client
            .access_service("serviceX", realm.service_address)
            .await
            .unwrap();
        assert_eq!(greeting, "Hello alice: Authenticated");

        realm.stop().await;
    }

    #[tokio::test]
    async fn test_missing_tickets() {
        let mut client = agent(ProtocolConfig::default());
        let nowhere: SocketAddr = "127.0.0.1:9".parse().unwrap();

        assert_eq!(
            client
                .request_service_ticket("tgs1", nowhere, "serviceX")
                .await,
            Err(KrbError::TokenMissing)
        );
        assert_eq!(
            client.access_service("serviceX", nowhere).await,
            Err(KrbError::TokenMissing)
        );
    }

    #[tokio::test]
    async fn test_expired_ticket_is_evicted() {
        let config = ProtocolConfig::default().with_ticket_lifetime(Duration::from_millis(1));
        let realm = Realm::start(config.clone()).await;
        let mut client = agent(config);

        client
            .authenticate_with_password(PASSWORD, "tgs1", realm.as_address)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            client
                .request_service_ticket("tgs1", realm.tgs_address, "serviceX")
                .await,
            Err(KrbError::TokenExpired)
        );
        assert_eq!(client.tgs_ticket("tgs1"), Err(KrbError::TokenMissing));

        realm.stop().await;
    }

    /// Claims to send from another address than the one the kernel picks.
    struct LyingTransport(UdpTransport);

    impl Transport for LyingTransport {
        async fn send_and_await_reply(
            &self,
            address: SocketAddr,
            request: &[u8],
        ) -> Result<Vec<u8>, KrbError> {
            self.0.send_and_await_reply(address, request).await
        }

        async fn source_address_for(&self, _address: SocketAddr) -> Result<IpAddr, KrbError> {
            Ok(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)))
        }
    }

    #[tokio::test]
    async fn test_declared_address_must_match_ticket() {
        let config = ProtocolConfig::default();
        let realm = Realm::start(config.clone()).await;
        let mut client = ClientAgent::new(
            config,
            "alice",
            LyingTransport(UdpTransport::default().with_timeout(Duration::from_secs(5))),
            MemoryTicketCache::new(),
        );

        client
            .authenticate_with_password(PASSWORD, "tgs1", realm.as_address)
            .await
            .unwrap();

        let err = client
            .request_service_ticket("tgs1", realm.tgs_address, "serviceX")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            KrbError::ReplyError("authenticator and ticket address differ".to_string())
        );

        realm.stop().await;
    }

    /// Flips a bit in the sealed payload of every successful reply.
    struct TamperingTransport(UdpTransport);

    impl Transport for TamperingTransport {
        async fn send_and_await_reply(
            &self,
            address: SocketAddr,
            request: &[u8],
        ) -> Result<Vec<u8>, KrbError> {
            let buf = self.0.send_and_await_reply(address, request).await?;
            let mut reply = Reply::from_wire(&buf)?;
            if let Some(byte) = reply.encrypted_payload.last_mut() {
                *byte ^= 0x01;
            }
            reply.to_wire()
        }

        async fn source_address_for(&self, address: SocketAddr) -> Result<IpAddr, KrbError> {
            self.0.source_address_for(address).await
        }
    }

    #[tokio::test]
    async fn test_tampered_reply_evicts_ticket() {
        let config = ProtocolConfig::default();
        let realm = Realm::start(config.clone()).await;

        let mut honest = agent(config.clone());
        let tgt = honest
            .authenticate_with_password(PASSWORD, "tgs1", realm.as_address)
            .await
            .unwrap();

        let mut cache = MemoryTicketCache::new();
        cache.put("alice", &tgt).unwrap();
        let mut client = ClientAgent::new(
            config,
            "alice",
            TamperingTransport(UdpTransport::default().with_timeout(Duration::from_secs(5))),
            cache,
        );

        let err = client
            .request_service_ticket("tgs1", realm.tgs_address, "serviceX")
            .await
            .unwrap_err();
        assert_eq!(err, KrbError::ReplyError(REPLY_TAMPERED.to_string()));
        assert_eq!(client.tgs_ticket("tgs1"), Err(KrbError::TokenMissing));

        realm.stop().await;
    }
}
