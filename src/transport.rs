use crate::constants::DEFAULT_IO_MAX_SIZE;
use crate::error::KrbError;
use crate::proto::WireMessage;
use crate::server::DatagramHandler;
use bytes::{Bytes, BytesMut};
use futures::{Future, SinkExt, StreamExt};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::codec::BytesCodec;
use tokio_util::udp::UdpFramed;
use tracing::{debug, error, info, trace};

/// A single request, single reply datagram exchange with a server.
pub trait Transport: Send + Sync {
    fn send_and_await_reply(
        &self,
        address: SocketAddr,
        request: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, KrbError>> + Send;

    /// The local address our datagrams to `address` originate from. Servers bind
    /// tickets to it, so it goes into every authenticator.
    fn source_address_for(
        &self,
        address: SocketAddr,
    ) -> impl Future<Output = Result<IpAddr, KrbError>> + Send;
}

#[derive(Debug, Clone)]
pub struct UdpTransport {
    max_size: usize,
    timeout: Option<Duration>,
}

impl Default for UdpTransport {
    fn default() -> Self {
        UdpTransport {
            max_size: DEFAULT_IO_MAX_SIZE,
            timeout: None,
        }
    }
}

impl UdpTransport {
    /// Give up waiting for a reply after `timeout`. Without one, a lost
    /// datagram blocks the caller forever.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn connect(&self, address: SocketAddr) -> Result<UdpSocket, KrbError> {
        let bind_address = match address {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };

        let sock = UdpSocket::bind(bind_address).await.map_err(|io_err| {
            error!(?io_err, "Unable to bind UDP socket");
            KrbError::TransportError
        })?;

        sock.connect(address).await.map_err(|io_err| {
            error!(?io_err, ?address, "Unable to connect UDP socket");
            KrbError::TransportError
        })?;

        Ok(sock)
    }
}

impl Transport for UdpTransport {
    async fn send_and_await_reply(
        &self,
        address: SocketAddr,
        request: &[u8],
    ) -> Result<Vec<u8>, KrbError> {
        let sock = self.connect(address).await?;

        sock.send(request).await.map_err(|io_err| {
            error!(?io_err, ?address, "Unable to send request");
            KrbError::TransportError
        })?;

        let mut buf = vec![0u8; self.max_size];
        let recv = sock.recv(&mut buf);

        let received = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, recv).await.map_err(|_| {
                error!(?address, ?timeout, "Timed out waiting for reply");
                KrbError::TransportError
            })?,
            None => recv.await,
        }
        .map_err(|io_err| {
            error!(?io_err, ?address, "Unable to receive reply");
            KrbError::TransportError
        })?;

        buf.truncate(received);
        trace!(?address, len = received, "Received reply");
        Ok(buf)
    }

    async fn source_address_for(&self, address: SocketAddr) -> Result<IpAddr, KrbError> {
        let sock = self.connect(address).await?;
        sock.local_addr()
            .map(|local| local.ip().to_canonical())
            .map_err(|io_err| {
                error!(?io_err, "Unable to determine local address");
                KrbError::TransportError
            })
    }
}

#[derive(Clone, Debug)]
pub enum CoreAction {
    Shutdown,
}

async fn process<H: DatagramHandler>(
    handler: Arc<H>,
    sock: Arc<UdpSocket>,
    client_address: SocketAddr,
    msg: BytesMut,
) {
    let reply = handler.handle(&msg, client_address);
    trace!(?client_address, is_error = reply.is_error, "Replying");

    let buf = match reply.to_wire() {
        Ok(buf) => buf,
        Err(err) => {
            error!(?err, "Unable to encode reply");
            return;
        }
    };

    let mut codec = UdpFramed::new(sock, BytesCodec::new());
    if let Err(e) = codec.send((Bytes::from(buf), client_address)).await {
        error!("Error sending response: {:?}", e);
    }
}

async fn udp_acceptor<H: DatagramHandler>(
    sock: UdpSocket,
    handler: Arc<H>,
    mut rx: broadcast::Receiver<CoreAction>,
) {
    let sock = Arc::new(sock);
    let mut codec = UdpFramed::new(sock.clone(), BytesCodec::new());

    loop {
        tokio::select! {
            Ok(action) = rx.recv() => {
                match action {
                    CoreAction::Shutdown => break,
                }
            }
            frame = codec.next() => {
                if let Some(frame) = frame {
                    match frame {
                        Ok((msg, addr)) => {
                            tokio::spawn(process(handler.clone(), sock.clone(), addr, msg));
                        }
                        Err(e) => {
                            error!("UDP codec error, no message: {:?}", e)
                        }
                    }
                }
            }
        }
    }

    debug!("UDP acceptor stopped");
}

/// Bind `address` and serve every datagram received on it with `handler`
/// until a [CoreAction::Shutdown] is broadcast. Returns the bound address, so
/// port 0 may be used.
pub async fn create_udp_server<H: DatagramHandler>(
    address: SocketAddr,
    handler: Arc<H>,
    rx: broadcast::Receiver<CoreAction>,
) -> Result<(JoinHandle<()>, SocketAddr), KrbError> {
    let sock = UdpSocket::bind(address).await.map_err(|e| {
        error!("Could not bind to address {} -> {:?}", address, e);
        KrbError::TransportError
    })?;

    let local = sock.local_addr().map_err(|e| {
        error!("Could not read bound address -> {:?}", e);
        KrbError::TransportError
    })?;

    info!("Listening on {}", local);

    let handle = tokio::spawn(udp_acceptor(sock, handler, rx));
    Ok((handle, local))
}
