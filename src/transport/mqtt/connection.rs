//! Connection state, parameters and TLS material for the MQTT transport
//!
//! Everything here is pure or file-loading only; network I/O lives in
//! [`super::client`].

use crate::config::{keys, AgentParameters, ConfigError, DEFAULT_BROKER_PORT};
use crate::transport::{Credentials, SecretDecryptor};
use native_tls::{Certificate, Identity};
use rumqttc::{MqttOptions, TlsConfiguration, Transport as RumqttcTransport};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Connection state for the MQTT transport
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Waiting for the broker's ConnAck
    Connecting,
    /// Acknowledged by the broker and ready for operations
    Connected,
    /// Not connected, with the reason
    Disconnected(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Minimum TLS protocol version to negotiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsProtocol {
    /// Let the TLS library choose
    #[default]
    None,
    Sslv3,
    Tlsv10,
    Tlsv11,
    Tlsv12,
}

impl TlsProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsProtocol::None => "None",
            TlsProtocol::Sslv3 => "SSLv3",
            TlsProtocol::Tlsv10 => "TLSv1_0",
            TlsProtocol::Tlsv11 => "TLSv1_1",
            TlsProtocol::Tlsv12 => "TLSv1_2",
        }
    }
}

impl fmt::Display for TlsProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TlsProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" | "None" => Ok(TlsProtocol::None),
            "1" | "SSLv3" => Ok(TlsProtocol::Sslv3),
            "2" | "TLSv1_0" => Ok(TlsProtocol::Tlsv10),
            "3" | "TLSv1_1" => Ok(TlsProtocol::Tlsv11),
            "4" | "TLSv1_2" => Ok(TlsProtocol::Tlsv12),
            other => Err(format!("Unknown TLS protocol: {other}")),
        }
    }
}

/// Everything needed to open one broker connection
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    /// Raw `Protocol` value; resolved when TLS material is loaded
    pub protocol: String,
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    /// Encrypted PKCS#12 password
    pub cert_password: String,
    pub client_id: String,
    pub username: String,
    /// Encrypted broker password
    pub password: String,
    pub keep_alive: Duration,
}

impl ConnectionParameters {
    /// Plain connection to `host:1883`, anonymous, with a generated client id
    pub fn basic(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_BROKER_PORT,
            secure: false,
            protocol: String::new(),
            ca_cert: None,
            client_cert: None,
            cert_password: String::new(),
            client_id: generate_client_id(),
            username: String::new(),
            password: String::new(),
            keep_alive: Duration::from_secs(60),
        }
    }

    /// Read the full parameter set. With `honor_anonymous`, a true
    /// `Anonymous` flag discards any configured credentials.
    pub fn from_parameters(parameters: &AgentParameters, honor_anonymous: bool) -> Self {
        let anonymous = honor_anonymous && parameters.flag(keys::ANONYMOUS, false);
        let (username, password) = if anonymous {
            (String::new(), String::new())
        } else {
            (
                parameters.text(keys::USERNAME).to_string(),
                parameters.text(keys::PASSWORD).to_string(),
            )
        };

        Self {
            host: parameters.text(keys::BROKER).trim().to_string(),
            port: parameters.port(keys::BROKER_PORT),
            secure: parameters.flag(keys::SECURE, false),
            protocol: parameters.text(keys::PROTOCOL).to_string(),
            ca_cert: parameters.non_blank(keys::CA_CERT).map(PathBuf::from),
            client_cert: parameters.non_blank(keys::CLIENT_CERT).map(PathBuf::from),
            cert_password: parameters.text(keys::CERT_PASSWORD).to_string(),
            client_id: parameters
                .non_blank(keys::CLIENT_ID)
                .map(str::to_string)
                .unwrap_or_else(generate_client_id),
            username,
            password,
            keep_alive: Duration::from_secs(60),
        }
    }

    /// Resolved TLS protocol; unparseable values mean no minimum
    pub fn tls_protocol(&self) -> TlsProtocol {
        self.protocol.parse().unwrap_or_default()
    }

    /// Load the TLS material when `secure` is set.
    ///
    /// The client certificate password is decrypted only when a client
    /// certificate is configured. Both files are parsed here so that bad
    /// material fails at build time rather than on the first connect.
    pub fn load_tls(
        &self,
        decryptor: &dyn SecretDecryptor,
    ) -> Result<Option<TlsConfiguration>, ConfigError> {
        if !self.secure {
            return Ok(None);
        }

        let ca_path = self
            .ca_cert
            .as_deref()
            .ok_or_else(|| ConfigError::MissingParameter(keys::CA_CERT.to_string()))?;
        let ca = load_ca_certificate(ca_path)?;

        let client_auth = match &self.client_cert {
            Some(path) => {
                let password = decryptor.decrypt(&self.cert_password);
                let pkcs12 = load_client_identity(path, &password)?;
                Some((pkcs12, password))
            }
            None => None,
        };

        // rumqttc builds its own connector, so the selection is resolved for
        // validation and logging only
        let protocol = self.tls_protocol();
        debug!(protocol = %protocol, client_auth = client_auth.is_some(), "Loaded TLS material");

        Ok(Some(TlsConfiguration::SimpleNative { ca, client_auth }))
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("protocol", &self.protocol)
            .field("ca_cert", &self.ca_cert)
            .field("client_cert", &self.client_cert)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

pub fn generate_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn certificate_error(which: &str, reason: impl fmt::Display) -> ConfigError {
    ConfigError::Certificate {
        which: which.to_string(),
        reason: reason.to_string(),
    }
}

/// Read a PEM CA certificate and check that it parses
pub fn load_ca_certificate(path: &Path) -> Result<Vec<u8>, ConfigError> {
    let bytes = std::fs::read(path)
        .map_err(|e| certificate_error("CA", format!("{}: {e}", path.display())))?;
    Certificate::from_pem(&bytes).map_err(|e| certificate_error("CA", e))?;
    Ok(bytes)
}

/// Read a PKCS#12 client identity and check that `password` opens it
pub fn load_client_identity(path: &Path, password: &str) -> Result<Vec<u8>, ConfigError> {
    let bytes = std::fs::read(path)
        .map_err(|e| certificate_error("client", format!("{}: {e}", path.display())))?;
    Identity::from_pkcs12(&bytes, password).map_err(|e| certificate_error("client", e))?;
    Ok(bytes)
}

/// Build rumqttc options for one connection attempt
pub fn configure_mqtt_options(
    client_id: &str,
    host: &str,
    port: u16,
    keep_alive: Duration,
    credentials: Option<&Credentials>,
    tls: Option<&TlsConfiguration>,
) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(client_id, host, port);
    mqtt_options.set_keep_alive(keep_alive);
    mqtt_options.set_clean_session(true);
    mqtt_options.set_max_packet_size(256 * 1024, 256 * 1024);

    if let Some(credentials) = credentials {
        mqtt_options.set_credentials(credentials.username.clone(), credentials.password.clone());
    }

    if let Some(tls) = tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_config(tls.clone()));
    }

    mqtt_options
}
