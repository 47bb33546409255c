use super::{
    catalog, AuthHandle, BuiltinMailer, Mailer, MailerResult, OAuthAuth, OAuthProvider,
    OAuthSmtpMailer, OptionsDescriptor, RuntimeVersion,
};
use crate::config::BUILTIN_MAILER;
use crate::connection::Connection;
use crate::diagnostics::DiagnosticsSink;
use crate::processor;
use crate::transport::{LettreTransports, TransportFactory};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds the mailer for one connection
pub type MailerFactory =
    Arc<dyn Fn(&Connection) -> MailerResult<Box<dyn Mailer>> + Send + Sync>;

/// Builds the auth handle for one connection
pub type AuthFactory =
    Arc<dyn Fn(&Connection) -> MailerResult<Box<dyn AuthHandle>> + Send + Sync>;

/// A registered mailer slug
#[derive(Clone)]
pub struct ProviderEntry {
    pub descriptor: OptionsDescriptor,
    pub mailer: Option<MailerFactory>,
    pub auth: Option<AuthFactory>,
}

impl ProviderEntry {
    /// Descriptor only; lookups of its mailer return `None`
    pub fn descriptor_only(descriptor: OptionsDescriptor) -> Self {
        Self {
            descriptor,
            mailer: None,
            auth: None,
        }
    }

    pub fn with_mailer(mut self, factory: MailerFactory) -> Self {
        self.mailer = Some(factory);
        self
    }

    pub fn with_auth(mut self, factory: AuthFactory) -> Self {
        self.auth = Some(factory);
        self
    }
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("slug", &self.descriptor.slug)
            .field("has_mailer", &self.mailer.is_some())
            .field("has_auth", &self.auth.is_some())
            .finish()
    }
}

/// Maps mailer slugs to their descriptor and factories
///
/// Lookups never fail loudly: a missing or failing factory yields `None` and
/// the failure is written to the diagnostics sink.
pub struct MailerRegistry {
    entries: Vec<ProviderEntry>,
    runtime: RuntimeVersion,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl MailerRegistry {
    /// Empty registry
    pub fn new(diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            entries: Vec::new(),
            runtime: RuntimeVersion::current(),
            diagnostics,
        }
    }

    /// Full catalog with the builtin and OAuth factories backed by `lettre`
    pub fn with_defaults(diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self::with_transports(diagnostics, Arc::new(LettreTransports::new()))
    }

    /// Full catalog with factories that build transports through `transports`
    pub fn with_transports(
        diagnostics: Arc<dyn DiagnosticsSink>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        let mut registry = Self::new(diagnostics);

        for descriptor in catalog::descriptors() {
            let slug = descriptor.slug.clone();
            let entry = match slug.as_str() {
                BUILTIN_MAILER => {
                    ProviderEntry::descriptor_only(descriptor).with_mailer(builtin_factory(&transports))
                }
                catalog::SMTP_MAILER => {
                    ProviderEntry::descriptor_only(descriptor).with_mailer(smtp_factory(&transports))
                }
                slug => match OAuthProvider::find(slug) {
                    Some(provider) => ProviderEntry::descriptor_only(descriptor)
                        .with_mailer(oauth_mailer_factory(provider, &transports))
                        .with_auth(oauth_auth_factory(provider)),
                    None => ProviderEntry::descriptor_only(descriptor),
                },
            };
            registry.register(entry);
        }

        registry
    }

    /// Override the runtime version used for compatibility checks
    pub fn with_runtime(mut self, runtime: RuntimeVersion) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn runtime(&self) -> RuntimeVersion {
        self.runtime
    }

    pub fn diagnostics(&self) -> &Arc<dyn DiagnosticsSink> {
        &self.diagnostics
    }

    /// Add an entry, replacing an existing one with the same slug in place
    pub fn register(&mut self, entry: ProviderEntry) {
        match self
            .entries
            .iter_mut()
            .find(|existing| existing.descriptor.slug == entry.descriptor.slug)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Attach a mailer factory to an already registered slug
    pub fn register_mailer(&mut self, slug: &str, factory: MailerFactory) -> bool {
        match self.entry_mut(slug) {
            Some(entry) => {
                entry.mailer = Some(factory);
                true
            }
            None => false,
        }
    }

    pub fn unregister(&mut self, slug: &str) -> Option<ProviderEntry> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.descriptor.slug == slug)?;
        Some(self.entries.remove(index))
    }

    pub fn known_slugs(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|entry| entry.descriptor.slug.as_str())
            .collect()
    }

    fn entry(&self, slug: &str) -> Option<&ProviderEntry> {
        self.entries.iter().find(|entry| entry.descriptor.slug == slug)
    }

    fn entry_mut(&mut self, slug: &str) -> Option<&mut ProviderEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.descriptor.slug == slug)
    }

    pub fn get_options(&self, slug: &str) -> Option<OptionsDescriptor> {
        self.entry(slug).map(|entry| entry.descriptor.clone())
    }

    /// Instantiate the mailer for `slug` on `connection`
    pub fn get_mailer(&self, slug: &str, connection: &Connection) -> Option<Box<dyn Mailer>> {
        let Some(factory) = self.entry(slug).and_then(|entry| entry.mailer.as_ref()) else {
            debug!("No mailer implementation registered for '{}'", slug);
            return None;
        };

        match factory(connection) {
            Ok(mailer) => Some(mailer),
            Err(e) => {
                warn!("Failed to create mailer '{}': {}", slug, e);
                self.diagnostics
                    .record_debug(&format!("Mailer '{}' could not be loaded: {}", slug, e));
                None
            }
        }
    }

    /// Instantiate the auth handle for `slug` on `connection`
    pub fn get_auth(&self, slug: &str, connection: &Connection) -> Option<Box<dyn AuthHandle>> {
        let factory = self.entry(slug).and_then(|entry| entry.auth.as_ref())?;

        match factory(connection) {
            Ok(auth) => Some(auth),
            Err(e) => {
                warn!("Failed to create auth handler '{}': {}", slug, e);
                self.diagnostics
                    .record_debug(&format!("Auth for '{}' could not be loaded: {}", slug, e));
                None
            }
        }
    }

    /// Descriptors fit for listing, in registration order
    pub fn list_all_options(&self) -> Vec<OptionsDescriptor> {
        self.entries
            .iter()
            .map(|entry| &entry.descriptor)
            .filter(|descriptor| descriptor.is_listable())
            .cloned()
            .collect()
    }

    pub fn is_runtime_compatible(&self, descriptor: &OptionsDescriptor) -> bool {
        descriptor
            .min_runtime
            .map(|min| self.runtime >= min)
            .unwrap_or(true)
    }
}

impl fmt::Debug for MailerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailerRegistry")
            .field("entries", &self.entries)
            .field("runtime", &self.runtime)
            .finish()
    }
}

fn builtin_factory(transports: &Arc<dyn TransportFactory>) -> MailerFactory {
    let transports = Arc::clone(transports);
    Arc::new(move |_connection: &Connection| -> MailerResult<Box<dyn Mailer>> {
        let transport = transports.builtin()?;
        Ok(Box::new(BuiltinMailer::new(BUILTIN_MAILER, transport, true)) as Box<dyn Mailer>)
    })
}

fn smtp_factory(transports: &Arc<dyn TransportFactory>) -> MailerFactory {
    let transports = Arc::clone(transports);
    Arc::new(move |connection: &Connection| -> MailerResult<Box<dyn Mailer>> {
        let params = processor::smtp_parameters(connection.options());
        let complete = !params.host.trim().is_empty()
            && (!connection.options().get_bool("smtp", "auth") || params.auth.is_some());
        let transport = transports.smtp(&params)?;
        Ok(Box::new(BuiltinMailer::new(catalog::SMTP_MAILER, transport, complete)) as Box<dyn Mailer>)
    })
}

fn oauth_mailer_factory(
    provider: &'static OAuthProvider,
    transports: &Arc<dyn TransportFactory>,
) -> MailerFactory {
    let transports = Arc::clone(transports);
    Arc::new(move |connection: &Connection| -> MailerResult<Box<dyn Mailer>> {
        Ok(Box::new(OAuthSmtpMailer::new(
            provider,
            connection.options().clone(),
            Arc::clone(&transports),
        )) as Box<dyn Mailer>)
    })
}

fn oauth_auth_factory(provider: &'static OAuthProvider) -> AuthFactory {
    Arc::new(move |connection: &Connection| -> MailerResult<Box<dyn AuthHandle>> {
        Ok(Box::new(OAuthAuth::new(provider, connection.options().clone())) as Box<dyn AuthHandle>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigResolver, EnvironmentOverrides, MemoryStore};
    use crate::diagnostics::MemoryDiagnostics;
    use crate::mailer::MailerError;
    use serde_json::{json, Value};

    fn connection() -> Connection {
        connection_with(json!({}))
    }

    fn connection_with(values: Value) -> Connection {
        let options = ConfigResolver::new(
            Arc::new(MemoryStore::new()),
            "primary",
            EnvironmentOverrides::disabled(),
            None,
        )
        .unwrap();
        if let Value::Object(tree) = values {
            options.set(tree, false, false).unwrap();
        }
        Connection::primary(options)
    }

    #[test]
    fn test_default_table_order() {
        let registry = MailerRegistry::with_defaults(Arc::new(MemoryDiagnostics::new()));
        let slugs = registry.known_slugs();

        assert_eq!(slugs[0], "mail");
        assert_eq!(slugs[3], "sendinblue");
        assert_eq!(*slugs.last().unwrap(), "smtp");
        assert_eq!(registry.list_all_options().len(), slugs.len());
    }

    #[test]
    fn test_provider_without_factory_is_none() {
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        let registry = MailerRegistry::with_defaults(diagnostics.clone());

        assert!(registry.get_options("mailgun").is_some());
        assert!(registry.get_mailer("mailgun", &connection()).is_none());
        assert!(registry.get_mailer("unknown", &connection()).is_none());
        assert!(registry.get_auth("mailgun", &connection()).is_none());
        assert!(diagnostics.list().is_empty());
    }

    #[test]
    fn test_factory_error_is_recorded_not_propagated() {
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        let mut registry = MailerRegistry::new(diagnostics.clone());
        registry.register(
            ProviderEntry::descriptor_only(OptionsDescriptor::new("broken", "Broken")).with_mailer(
                Arc::new(|_: &Connection| -> MailerResult<Box<dyn Mailer>> {
                    Err(MailerError::Incomplete("broken".to_string()))
                }),
            ),
        );

        assert!(registry.get_mailer("broken", &connection()).is_none());
        let events = diagnostics.list();
        assert_eq!(events.len(), 1);
        assert!(events[0].message.contains("broken"));
    }

    #[test]
    fn test_listing_skips_untitled_entries() {
        let mut registry = MailerRegistry::new(Arc::new(MemoryDiagnostics::new()));
        registry.register(ProviderEntry::descriptor_only(OptionsDescriptor::new("a", "A")));
        registry.register(ProviderEntry::descriptor_only(OptionsDescriptor::new("b", "")));
        registry.register(ProviderEntry::descriptor_only(OptionsDescriptor::new("c", "C")));

        let listed: Vec<_> = registry
            .list_all_options()
            .into_iter()
            .map(|descriptor| descriptor.slug)
            .collect();
        assert_eq!(listed, vec!["a", "c"]);

        registry.register(ProviderEntry::descriptor_only(OptionsDescriptor::new("a", "A2")));
        assert_eq!(registry.known_slugs(), vec!["a", "b", "c"]);
        assert!(registry.unregister("b").is_some());
        assert!(registry.unregister("b").is_none());
    }

    #[test]
    fn test_runtime_compatibility() {
        let registry = MailerRegistry::new(Arc::new(MemoryDiagnostics::new()))
            .with_runtime(RuntimeVersion::new(1, 2, 0));

        let mut descriptor = OptionsDescriptor::new("future", "Future");
        assert!(registry.is_runtime_compatible(&descriptor));

        descriptor.min_runtime = Some(RuntimeVersion::new(1, 2, 0));
        assert!(registry.is_runtime_compatible(&descriptor));

        descriptor.min_runtime = Some(RuntimeVersion::new(2, 0, 0));
        assert!(!registry.is_runtime_compatible(&descriptor));
    }

    #[tokio::test]
    async fn test_smtp_mailer_completeness_follows_settings() {
        let registry = MailerRegistry::with_defaults(Arc::new(MemoryDiagnostics::new()));
        let complete = |values: Value| {
            registry
                .get_mailer("smtp", &connection_with(values))
                .unwrap()
                .is_mailer_complete()
        };

        assert!(!complete(json!({"smtp": {"host": ""}})));
        assert!(complete(json!({"smtp": {"host": "smtp.example.com"}})));
        assert!(!complete(json!({"smtp": {"host": "smtp.example.com", "auth": true}})));
        assert!(complete(json!({
            "smtp": {"host": "smtp.example.com", "auth": true, "user": "mailer", "pass": "secret"}
        })));
    }

    #[tokio::test]
    async fn test_builtin_mailer_is_always_complete() {
        let registry = MailerRegistry::with_defaults(Arc::new(MemoryDiagnostics::new()));
        let mailer = connection().mailer(&registry).unwrap();
        assert!(mailer.is_mailer_complete());
        assert!(mailer.debug_info().starts_with("Mailer: mail"));
    }

    #[test]
    fn test_oauth_auth_handle() {
        let registry = MailerRegistry::with_defaults(Arc::new(MemoryDiagnostics::new()));
        let auth = registry.get_auth("gmail", &connection()).unwrap();

        assert!(auth.is_auth_required());
        assert!(!auth.is_client_saved());
        assert!(auth.access_token().is_none());
    }
}
