//! Wire
//!
//! Buffered byte stream under one connection: a TCP socket, optionally
//! upgraded to TLS in place. Reads fill an input buffer that the message
//! codec decodes from; writes collect in an output buffer until [`Wire::send`].
//!
//! Any I/O error marks the wire broken for good. A broken wire is never
//! read from or written to again.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::error::{DriverError, DriverResult};

/// Anything a wire can run over.
pub trait WireStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> WireStream for T {}

/// Buffered, breakable byte stream.
pub struct Wire {
    stream: Option<Box<dyn WireStream>>,
    peer: String,
    input: BytesMut,
    output: BytesMut,
    bytes_sent: u64,
    bytes_received: u64,
    broken: bool,
    closed: bool,
}

impl Wire {
    /// Connect to `address` (`host:port`), trying each resolved address in turn.
    pub async fn open(address: &str, keep_alive: bool, timeout: Duration) -> DriverResult<Self> {
        let stream = tokio::time::timeout(timeout, connect(address, keep_alive))
            .await
            .map_err(|_| DriverError::connect_failure(address, "timed out"))??;
        debug!(peer = %address, "wire opened");
        Ok(Self::from_stream(stream, address))
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: impl WireStream + 'static, peer: impl Into<String>) -> Self {
        Self {
            stream: Some(Box::new(stream)),
            peer: peer.into(),
            input: BytesMut::with_capacity(8192),
            output: BytesMut::with_capacity(8192),
            bytes_sent: 0,
            bytes_received: 0,
            broken: false,
            closed: false,
        }
    }

    /// Upgrade to TLS in place.
    ///
    /// With `verify` off, any certificate is accepted. A failed TLS handshake
    /// leaves the wire broken.
    pub async fn secure(&mut self, verify: bool, hostname: &str) -> DriverResult<()> {
        let stream = self.take_stream()?;
        let name = rustls::pki_types::ServerName::try_from(hostname.to_string()).map_err(|e| {
            self.broken = true;
            DriverError::connect_failure(&self.peer, format!("invalid TLS server name: {}", e))
        })?;
        let config = tls_config(verify).map_err(|e| {
            self.broken = true;
            DriverError::connect_failure(&self.peer, e)
        })?;
        match TlsConnector::from(config).connect(name, stream).await {
            Ok(tls) => {
                debug!(peer = %self.peer, verify, "wire secured");
                self.stream = Some(Box::new(tls));
                Ok(())
            }
            Err(e) => {
                self.broken = true;
                Err(DriverError::connect_failure(
                    &self.peer,
                    format!("TLS handshake failed: {}", e),
                ))
            }
        }
    }

    /// Read exactly `n` bytes, waiting for them if needed.
    ///
    /// If the peer closes first, the wire breaks; a short read is never returned.
    pub async fn read(&mut self, n: usize) -> DriverResult<Bytes> {
        while self.input.len() < n {
            self.fill().await?;
        }
        Ok(self.input.split_to(n).freeze())
    }

    /// Read whatever the peer sends next into the input buffer.
    pub async fn fill(&mut self) -> DriverResult<usize> {
        let peer = self.peer.clone();
        self.usable_stream()?;
        let (stream, input) = match self.stream.as_mut() {
            Some(stream) => (stream, &mut self.input),
            None => return Err(DriverError::broken_wire(format!("wire to {} has no stream", peer))),
        };
        let result = stream.read_buf(input).await;
        match result {
            Ok(0) => Err(self.mark_broken(format!("{} closed the connection", peer))),
            Ok(n) => {
                self.bytes_received += n as u64;
                Ok(n)
            }
            Err(e) => Err(self.mark_broken(format!("read from {} failed: {}", peer, e))),
        }
    }

    /// Bytes received but not yet consumed.
    pub fn input(&self) -> &[u8] {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut BytesMut {
        &mut self.input
    }

    /// Queue bytes for the next [`send`](Self::send).
    pub fn write(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    pub fn output_mut(&mut self) -> &mut BytesMut {
        &mut self.output
    }

    /// Flush queued bytes; returns how many were sent.
    pub async fn send(&mut self) -> DriverResult<usize> {
        if self.output.is_empty() {
            return Ok(0);
        }
        let peer = self.peer.clone();
        let data = self.output.split().freeze();
        let stream = self.usable_stream()?;
        let mut result = stream.write_all(&data).await;
        if result.is_ok() {
            result = stream.flush().await;
        }
        match result {
            Ok(()) => {
                self.bytes_sent += data.len() as u64;
                Ok(data.len())
            }
            Err(e) => Err(self.mark_broken(format!("write to {} failed: {}", peer, e))),
        }
    }

    /// Shut down and drop the stream. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(peer = %self.peer, error = %e, "shutdown failed");
            }
        }
        self.closed = true;
    }

    pub fn broken(&self) -> bool {
        self.broken
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    fn take_stream(&mut self) -> DriverResult<Box<dyn WireStream>> {
        if self.broken || self.closed {
            return Err(DriverError::broken_wire(format!("wire to {} is unusable", self.peer)));
        }
        self.stream
            .take()
            .ok_or_else(|| DriverError::broken_wire(format!("wire to {} has no stream", self.peer)))
    }

    fn usable_stream(&mut self) -> DriverResult<&mut Box<dyn WireStream>> {
        if self.broken || self.closed {
            return Err(DriverError::broken_wire(format!("wire to {} is unusable", self.peer)));
        }
        let peer = &self.peer;
        self.stream
            .as_mut()
            .ok_or_else(|| DriverError::broken_wire(format!("wire to {} has no stream", peer)))
    }

    fn mark_broken(&mut self, reason: String) -> DriverError {
        warn!(peer = %self.peer, %reason, "wire broken");
        self.broken = true;
        self.stream = None;
        DriverError::broken_wire(reason)
    }
}

impl std::fmt::Debug for Wire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wire")
            .field("peer", &self.peer)
            .field("broken", &self.broken)
            .field("closed", &self.closed)
            .field("bytes_sent", &self.bytes_sent)
            .field("bytes_received", &self.bytes_received)
            .finish()
    }
}

async fn connect(address: &str, keep_alive: bool) -> DriverResult<TcpStream> {
    let addrs = lookup_host(address)
        .await
        .map_err(|e| DriverError::connect_failure(address, e))?;
    let mut last_error = None;
    for addr in addrs {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| DriverError::connect_failure(address, e))?;
        socket
            .set_keepalive(keep_alive)
            .map_err(|e| DriverError::connect_failure(address, e))?;
        match socket.connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true).ok();
                return Ok(stream);
            }
            Err(e) => {
                debug!(%addr, error = %e, "connect attempt failed");
                last_error = Some(e);
            }
        }
    }
    Err(DriverError::connect_failure(
        address,
        last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no addresses resolved".to_string()),
    ))
}

fn tls_config(verify: bool) -> Result<Arc<rustls::ClientConfig>, String> {
    let builder =
        rustls::ClientConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_safe_default_protocol_versions()
            .map_err(|e| format!("TLS protocol version error: {}", e))?;
    let config = if verify {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
            .with_no_client_auth()
    };
    Ok(Arc::new(config))
}

/// Certificate verifier for self-signed (`+ssc`) profiles.
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
