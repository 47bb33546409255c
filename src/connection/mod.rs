//! Connections: named configuration scopes a mailer is configured on

use crate::config::{
    ConfigResolver, ConfigResult, EnvironmentOverrides, OptionStore, SecretBox, BUILTIN_MAILER,
};
use crate::mailer::{Mailer, MailerRegistry};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Reserved id of the primary connection
pub const PRIMARY_ID: &str = "primary";

/// Connection management errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("The primary connection cannot be removed")]
    PrimaryRemoval,

    #[error("Connection '{0}' already exists")]
    Duplicate(String),

    #[error("Connection '{0}' not found")]
    NotFound(String),
}

/// A named scope owning one options view
#[derive(Debug, Clone)]
pub struct Connection {
    id: String,
    title: String,
    options: ConfigResolver,
    primary: bool,
}

impl Connection {
    /// The primary connection over the given options
    pub fn primary(options: ConfigResolver) -> Self {
        Self {
            id: PRIMARY_ID.to_string(),
            title: "Primary".to_string(),
            options,
            primary: true,
        }
    }

    /// An additional connection
    pub fn new(id: impl Into<String>, title: impl Into<String>, options: ConfigResolver) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            options,
            primary: false,
        }
    }

    /// Open an additional connection stored under `connection.<id>`
    ///
    /// Environment constants only ever apply to the primary connection.
    pub fn open(
        store: Arc<dyn OptionStore>,
        id: impl Into<String>,
        title: impl Into<String>,
        secrets: Option<SecretBox>,
    ) -> ConfigResult<Self> {
        let id = id.into();
        let options = ConfigResolver::new(
            store,
            format!("connection.{}", id),
            EnvironmentOverrides::disabled(),
            secrets,
        )?;
        Ok(Self::new(id, title, options))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn options(&self) -> &ConfigResolver {
        &self.options
    }

    /// Selected mailer slug, the builtin transport when none is set
    pub fn mailer_slug(&self) -> String {
        let slug = self.options.get_str("mail", "mailer");
        if slug.trim().is_empty() {
            BUILTIN_MAILER.to_string()
        } else {
            slug
        }
    }

    /// Instantiate this connection's mailer
    pub fn mailer(&self, registry: &MailerRegistry) -> Option<Box<dyn Mailer>> {
        registry.get_mailer(&self.mailer_slug(), self)
    }
}

/// Owns the primary connection and any additional ones
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    primary: Connection,
    others: Vec<Connection>,
}

impl ConnectionManager {
    pub fn new(primary: Connection) -> Self {
        Self {
            primary,
            others: Vec::new(),
        }
    }

    pub fn primary(&self) -> &Connection {
        &self.primary
    }

    /// Connection used for the current send
    pub fn mail_connection(&self) -> &Connection {
        &self.primary
    }

    pub fn get(&self, id: &str) -> Option<&Connection> {
        if id == PRIMARY_ID {
            return Some(&self.primary);
        }
        self.others.iter().find(|connection| connection.id == id)
    }

    pub fn add(&mut self, connection: Connection) -> Result<(), ConnectionError> {
        if connection.id == PRIMARY_ID || self.get(&connection.id).is_some() {
            return Err(ConnectionError::Duplicate(connection.id));
        }
        info!("Added connection {}", connection.id);
        self.others.push(connection);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<Connection, ConnectionError> {
        if id == PRIMARY_ID {
            return Err(ConnectionError::PrimaryRemoval);
        }
        let index = self
            .others
            .iter()
            .position(|connection| connection.id == id)
            .ok_or_else(|| ConnectionError::NotFound(id.to_string()))?;
        Ok(self.others.remove(index))
    }

    /// Primary first, then additional connections in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        std::iter::once(&self.primary).chain(self.others.iter())
    }
}
