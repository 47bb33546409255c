use super::{Transport, TransportError, TransportResult, TransportTrace};
use async_trait::async_trait;
use lettre::{
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error};

/// Connect timeout applied to every SMTP transport
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configured encryption of the SMTP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encryption {
    #[default]
    None,
    /// Implicit TLS, usually port 465
    Ssl,
    /// STARTTLS, usually port 587
    Tls,
}

impl Encryption {
    /// Parse the stored option value, anything unknown is `None`
    pub fn from_option(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "ssl" => Encryption::Ssl,
            "tls" => Encryption::Tls,
            _ => Encryption::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encryption::None => "none",
            Encryption::Ssl => "ssl",
            Encryption::Tls => "tls",
        }
    }
}

/// How TLS is negotiated on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain text only
    None,
    /// STARTTLS when the server offers it
    Opportunistic,
    /// STARTTLS or fail
    Required,
    /// TLS from the first byte
    Wrapper,
}

/// SMTP authentication
#[derive(Clone, PartialEq, Eq)]
pub enum SmtpAuth {
    /// PLAIN or LOGIN, whichever the server offers
    Password { username: String, password: String },
    /// XOAUTH2 with a bearer token
    OAuth2 {
        username: String,
        access_token: String,
    },
}

impl fmt::Debug for SmtpAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpAuth::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            SmtpAuth::OAuth2 { username, .. } => f
                .debug_struct("OAuth2")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Everything needed to open an SMTP transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpParameters {
    pub host: String,
    pub port: u16,
    pub encryption: Encryption,
    pub autotls: bool,
    pub auth: Option<SmtpAuth>,
    pub timeout: Duration,
    /// Skip certificate verification
    pub insecure_ssl: bool,
}

impl SmtpParameters {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            encryption: Encryption::None,
            autotls: true,
            auth: None,
            timeout: CONNECT_TIMEOUT,
            insecure_ssl: false,
        }
    }

    pub fn with_encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn with_autotls(mut self, autotls: bool) -> Self {
        self.autotls = autotls;
        self
    }

    pub fn with_auth(mut self, auth: SmtpAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_insecure_ssl(mut self, insecure: bool) -> Self {
        self.insecure_ssl = insecure;
        self
    }

    /// Auto-TLS is only switched off when encryption is not STARTTLS and
    /// the operator disabled it explicitly
    pub fn tls_mode(&self) -> TlsMode {
        match self.encryption {
            Encryption::Ssl => TlsMode::Wrapper,
            Encryption::Tls => TlsMode::Required,
            Encryption::None if self.autotls => TlsMode::Opportunistic,
            Encryption::None => TlsMode::None,
        }
    }

    fn tls_parameters(&self) -> TransportResult<TlsParameters> {
        TlsParameters::builder(self.host.clone())
            .dangerous_accept_invalid_certs(self.insecure_ssl)
            .build()
            .map_err(|e| TransportError::Tls(e.to_string()))
    }

    fn build_transport(&self) -> TransportResult<AsyncSmtpTransport<Tokio1Executor>> {
        if self.host.trim().is_empty() {
            return Err(TransportError::InvalidConfig(
                "SMTP host is not configured".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(TransportError::InvalidConfig(
                "SMTP port cannot be zero".to_string(),
            ));
        }

        let tls = match self.tls_mode() {
            TlsMode::None => Tls::None,
            TlsMode::Opportunistic => Tls::Opportunistic(self.tls_parameters()?),
            TlsMode::Required => Tls::Required(self.tls_parameters()?),
            TlsMode::Wrapper => Tls::Wrapper(self.tls_parameters()?),
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
            .port(self.port)
            .timeout(Some(self.timeout))
            .tls(tls);

        builder = match &self.auth {
            Some(SmtpAuth::Password { username, password }) => builder
                .credentials(Credentials::new(username.clone(), password.clone()))
                .authentication(vec![Mechanism::Plain, Mechanism::Login]),
            Some(SmtpAuth::OAuth2 {
                username,
                access_token,
            }) => builder
                .credentials(Credentials::new(username.clone(), access_token.clone()))
                .authentication(vec![Mechanism::Xoauth2]),
            None => builder,
        };

        Ok(builder.build())
    }
}

/// Delivery to a remote SMTP server
pub struct SmtpTransport {
    host: String,
    port: u16,
    mode: TlsMode,
    authenticated: bool,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(params: &SmtpParameters) -> TransportResult<Self> {
        Ok(Self {
            host: params.host.clone(),
            port: params.port,
            mode: params.tls_mode(),
            authenticated: params.auth.is_some(),
            transport: params.build_transport()?,
        })
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn deliver(&self, message: &Message, trace: &mut TransportTrace) -> TransportResult<()> {
        trace.record(format!(
            "Connecting to {}:{} (tls: {:?}, auth: {})",
            self.host, self.port, self.mode, self.authenticated
        ));
        let recipients = message.envelope().to().len();
        trace.record(format!("Envelope recipients: {}", recipients));

        match self.transport.send(message.clone()).await {
            Ok(response) => {
                let line = response.first_line().unwrap_or_default().to_string();
                trace.record(format!("{} {}", response.code(), line));

                if response.is_positive() {
                    debug!("SMTP server {} accepted the message", self.host);
                    Ok(())
                } else {
                    Err(TransportError::Rejected(format!("{} {}", response.code(), line)))
                }
            }
            Err(e) => {
                error!("SMTP delivery to {} failed: {}", self.host, e);
                trace.record(format!("Error: {}", e));
                Err(e.into())
            }
        }
    }
}
