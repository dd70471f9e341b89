// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Target resolution, dialing and the live connection of a forwarder.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::debug;

use crate::errors::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Tls,
    Unix,
}

impl Protocol {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "tls" => Ok(Protocol::Tls),
            "unix" => Ok(Protocol::Unix),
            _ => Err(ConfigError::UnknownProtocol(name.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Tls => "tls",
            Protocol::Unix => "unix",
        })
    }
}

/// Where a forwarder sends its entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// `host:port`. The address is resolved again on every dial.
    Inet { address: String, host: String },
    Unix(PathBuf),
}

impl Target {
    /// Resolves the target eagerly so a bad host name or socket path fails at load time.
    pub fn resolve(protocol: Protocol, target: &str) -> Result<Self, ConfigError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ConfigError::MissingField("Target"));
        }
        let invalid = |reason: String| ConfigError::InvalidTarget {
            target: target.to_string(),
            reason,
        };
        if protocol == Protocol::Unix {
            return resolve_unix(target).map_err(invalid);
        }

        let (host, _) = target
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port".to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid("missing host".to_string()));
        }
        let mut addrs = target
            .to_socket_addrs()
            .map_err(|e| invalid(e.to_string()))?;
        if addrs.next().is_none() {
            return Err(invalid("host resolved to no addresses".to_string()));
        }
        Ok(Target::Inet {
            address: target.to_string(),
            host: host.to_string(),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Inet { address, .. } => f.write_str(address),
            Target::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(unix)]
fn resolve_unix(path: &str) -> Result<Target, String> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = std::fs::metadata(path).map_err(|e| e.to_string())?;
    if !metadata.file_type().is_socket() {
        return Err("not a unix socket".to_string());
    }
    Ok(Target::Unix(PathBuf::from(path)))
}

#[cfg(not(unix))]
fn resolve_unix(_path: &str) -> Result<Target, String> {
    Err("unix sockets are not supported on this platform".to_string())
}

/// An open connection to the target.
pub enum Connection {
    Tcp(TcpStream),
    Udp(UdpSocket),
    Tls(Box<TlsStream<TcpStream>>),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl Connection {
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Connection::Tcp(stream) => stream.write_all(buf).await,
            Connection::Udp(socket) => {
                let sent = socket.send(buf).await?;
                if sent != buf.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("short datagram write, {} of {} bytes", sent, buf.len()),
                    ));
                }
                Ok(())
            }
            Connection::Tls(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await
            }
            #[cfg(unix)]
            Connection::Unix(stream) => stream.write_all(buf).await,
        }
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Connection::Tcp(stream) => stream.shutdown().await,
            Connection::Udp(_) => Ok(()),
            Connection::Tls(stream) => stream.shutdown().await,
            #[cfg(unix)]
            Connection::Unix(stream) => stream.shutdown().await,
        }
    }
}

/// Opens connections to one target.
pub struct Dialer {
    protocol: Protocol,
    target: Target,
    timeout: Duration,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl Dialer {
    pub fn new(
        protocol: Protocol,
        target: Target,
        timeout: Duration,
        insecure_skip_verify: bool,
    ) -> Result<Self, ConfigError> {
        let tls = match (&protocol, &target) {
            (Protocol::Tls, Target::Inet { host, .. }) => {
                let server_name =
                    ServerName::try_from(host.clone()).map_err(|e| ConfigError::InvalidTarget {
                        target: target.to_string(),
                        reason: e.to_string(),
                    })?;
                let config = tls_config(insecure_skip_verify)?;
                Some((TlsConnector::from(Arc::new(config)), server_name))
            }
            _ => None,
        };
        Ok(Dialer {
            protocol,
            target,
            timeout,
            tls,
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Dials once, bounded by the configured timeout.
    pub async fn dial(&self) -> io::Result<Connection> {
        match tokio::time::timeout(self.timeout, self.connect()).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("dial {} timed out after {:?}", self.target, self.timeout),
            )),
        }
    }

    async fn connect(&self) -> io::Result<Connection> {
        match (&self.target, self.protocol) {
            #[cfg(unix)]
            (Target::Unix(path), _) => {
                Ok(Connection::Unix(tokio::net::UnixStream::connect(path).await?))
            }
            #[cfg(not(unix))]
            (Target::Unix(_), _) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
            (Target::Inet { address, .. }, Protocol::Udp) => {
                let remote = first_address(address).await?;
                let local: SocketAddr = if remote.is_ipv4() {
                    ([0u8; 4], 0).into()
                } else {
                    ([0u16; 8], 0).into()
                };
                let socket = UdpSocket::bind(local).await?;
                socket.connect(remote).await?;
                Ok(Connection::Udp(socket))
            }
            (Target::Inet { address, .. }, _) => {
                let stream = TcpStream::connect(address.as_str()).await?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {}: {}", address, e);
                }
                match &self.tls {
                    Some((connector, server_name)) => {
                        let stream = connector.connect(server_name.clone(), stream).await?;
                        Ok(Connection::Tls(Box::new(stream)))
                    }
                    None => Ok(Connection::Tcp(stream)),
                }
            }
        }
    }
}

async fn first_address(address: &str) -> io::Result<SocketAddr> {
    tokio::net::lookup_host(address).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} resolved to no addresses", address),
        )
    })
}

fn tls_config(insecure_skip_verify: bool) -> Result<ClientConfig, ConfigError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    if insecure_skip_verify {
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification(provider)))
            .with_no_client_auth());
    }

    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        debug!("Failed to load native certificate: {}", error);
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!("Loaded {} native root certificates, ignored {}", added, ignored);
    if roots.is_empty() {
        return Err(ConfigError::Tls(rustls::Error::General(
            "no valid certificates found in native root store".to_string(),
        )));
    }
    Ok(builder
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Accepts any server certificate. Signatures are still checked so the handshake
/// itself stays sound.
#[derive(Debug)]
struct NoVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
