use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::fields::{self, FIELDS};
use crate::config::{
    ConfigResolver, EnvironmentOverrides, FieldKind, OptionStore, OptionTree, SecretBox,
    TomlFileStore, ValueSource,
};
use crate::connection::{Connection, ConnectionManager, PRIMARY_ID};
use crate::diagnostics::{DiagnosticsSink, FileDiagnostics};
use crate::dispatch::{
    DispatchGate, DispatchOptions, DispatchResult, MAILER_TYPE_HEADER, SETUP_WIZARD_MARKER,
    TEST_MARKER,
};
use crate::mailer::MailerRegistry;
use crate::message::OutboundMessage;
use crate::site::SiteContext;
use crate::transport::{LettreTransports, TransportFactory};

/// Environment variable holding the passphrase for secret option fields
pub const SECRET_KEY_VAR: &str = "MAILGATE_SECRET_KEY";

const SECRET_KEY_FILE: &str = "secret.key";
const DIAGNOSTICS_DIR: &str = "diagnostics";

/// Mailgate - route outgoing mail through a configurable mailer
#[derive(Parser)]
#[command(name = "mailgate")]
#[command(about = "Outgoing mail router with layered configuration and pluggable mailers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Configuration directory path
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Public URL of the site mail is sent for
    #[arg(long, global = true, default_value = "http://localhost")]
    pub site_url: String,

    /// Display name of the site
    #[arg(long, global = true, default_value = "Mailgate")]
    pub site_name: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect or change options
    Config(ConfigArgs),

    /// List the available mailers
    Mailers,

    /// Send a test email through the configured mailer
    Test(TestArgs),

    /// Show recorded debug events
    Events(EventsArgs),
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Connection to operate on
    #[arg(long, default_value = PRIMARY_ID)]
    pub connection: String,

    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show every known option with its effective value and source
    Show {
        /// Print secret values instead of masking them
        #[arg(long)]
        reveal: bool,
    },

    /// Print one option, addressed as `group.key`
    Get { field: String },

    /// Store one option, addressed as `group.key`
    Set { field: String, value: String },
}

#[derive(Args)]
pub struct TestArgs {
    /// Recipient address
    #[arg(long)]
    pub to: String,

    /// Subject line
    #[arg(long, default_value = "Mailgate: Test Email")]
    pub subject: String,

    /// Send as the setup wizard does (still subject to the domain check)
    #[arg(long)]
    pub setup_wizard: bool,
}

#[derive(Args)]
pub struct EventsArgs {
    /// Forget the latest error
    #[arg(long)]
    pub clear: bool,

    /// Show at most this many of the newest events
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

/// Command-line interface handler
pub struct CliHandler {
    store: Arc<dyn OptionStore>,
    secrets: SecretBox,
    diagnostics: Arc<FileDiagnostics>,
    site: SiteContext,
}

impl CliHandler {
    /// Open the stores under `config_dir`, or the default configuration directory
    pub fn new(config_dir: Option<PathBuf>, site_url: &str, site_name: &str) -> Result<Self> {
        let dir = match config_dir {
            Some(dir) => dir,
            None => TomlFileStore::default_dir()?,
        };

        let store = TomlFileStore::new(&dir)
            .with_context(|| format!("Cannot open option store in {}", dir.display()))?;

        let secrets = match std::env::var(SECRET_KEY_VAR) {
            Ok(passphrase) if !passphrase.trim().is_empty() => SecretBox::from_passphrase(&passphrase),
            _ => SecretBox::load_or_create(dir.join(SECRET_KEY_FILE))?,
        };

        let diagnostics = FileDiagnostics::open(dir.join(DIAGNOSTICS_DIR))
            .with_context(|| format!("Cannot open diagnostics in {}", dir.display()))?;

        let site = SiteContext::parse(site_url, site_name)
            .with_context(|| format!("Invalid site URL: {}", site_url))?;

        Ok(Self {
            store: Arc::new(store),
            secrets,
            diagnostics: Arc::new(diagnostics),
            site,
        })
    }

    /// Handle CLI commands
    pub async fn handle_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Config(args) => self.handle_config(args),
            Commands::Mailers => self.handle_mailers(),
            Commands::Test(args) => self.handle_test(args).await,
            Commands::Events(args) => self.handle_events(args),
        }
    }

    fn connection(&self, id: &str) -> Result<Connection> {
        if id == PRIMARY_ID {
            let options = ConfigResolver::new(
                self.store.clone(),
                PRIMARY_ID,
                EnvironmentOverrides::from_env(),
                Some(self.secrets.clone()),
            )?;
            return Ok(Connection::primary(options));
        }

        Ok(Connection::open(self.store.clone(), id, id, Some(self.secrets.clone()))?)
    }

    fn handle_config(&self, args: ConfigArgs) -> Result<()> {
        let connection = self.connection(&args.connection)?;
        let options = connection.options();

        match args.action {
            ConfigAction::Show { reveal } => {
                println!("⚙️  Options for connection '{}'", connection.id());
                println!("==============================\n");

                let mut group = "";
                for spec in FIELDS {
                    if spec.group != group {
                        group = spec.group;
                        println!("[{}]", group);
                    }

                    let Some(resolved) = options.resolve(spec.group, spec.key) else {
                        continue;
                    };
                    let value = if spec.kind == FieldKind::Secret && !reveal {
                        mask(&resolved.value)
                    } else {
                        display(&resolved.value)
                    };
                    println!("  {:<24} = {}{}", spec.key, value, source_label(resolved.source));
                }
                Ok(())
            }
            ConfigAction::Get { field } => {
                let (group, key) = split_field(&field)?;
                match options.resolve(group, key) {
                    Some(resolved) => {
                        println!("{}{}", display(&resolved.value), source_label(resolved.source))
                    }
                    None => println!("(not set)"),
                }
                Ok(())
            }
            ConfigAction::Set { field, value } => {
                let (group, key) = split_field(&field)?;
                if fields::find(group, key).is_none() {
                    println!("⚠️  {} is not a known option, storing it anyway", field);
                }
                if options.is_const_defined(group, key) {
                    println!("⚠️  {} is set by an environment constant, the stored value is ignored", field);
                }

                let mut fields_tree = OptionTree::new();
                fields_tree.insert(key.to_string(), parse_value(&value));
                let mut tree = OptionTree::new();
                tree.insert(group.to_string(), Value::Object(fields_tree));

                options.set(tree, false, false)?;
                println!("✅ Saved {}", field);
                Ok(())
            }
        }
    }

    fn handle_mailers(&self) -> Result<()> {
        let diagnostics: Arc<dyn DiagnosticsSink> = self.diagnostics.clone();
        let registry = MailerRegistry::with_defaults(diagnostics);
        let connection = self.connection(PRIMARY_ID)?;
        let current = connection.mailer_slug();

        println!("📮 Available mailers (runtime {})", registry.runtime());
        println!("==============================\n");

        for descriptor in registry.list_all_options() {
            let marker = if descriptor.slug == current { "*" } else { " " };
            let mut notes = Vec::new();
            if descriptor.recommended {
                notes.push("recommended");
            }
            if descriptor.disabled {
                notes.push("disabled");
            }
            if !registry.is_runtime_compatible(&descriptor) {
                notes.push("incompatible");
            }

            let notes = if notes.is_empty() {
                String::new()
            } else {
                format!(" ({})", notes.join(", "))
            };
            println!("{} {:<14} {}{}", marker, descriptor.slug, descriptor.title, notes);
        }

        println!("\n{}", mailer_status(&connection, &registry));
        Ok(())
    }

    async fn handle_test(&self, args: TestArgs) -> Result<()> {
        let marker = if args.setup_wizard { SETUP_WIZARD_MARKER } else { TEST_MARKER };
        let message = OutboundMessage::new()
            .to_str(&args.to)?
            .subject(args.subject)
            .text(format!(
                "This is a test email sent by {} from {}.",
                self.site.name(),
                self.site.url()
            ))
            .header(MAILER_TYPE_HEADER, marker);

        let diagnostics: Arc<dyn DiagnosticsSink> = self.diagnostics.clone();
        let transports: Arc<dyn TransportFactory> = Arc::new(LettreTransports::new());
        let registry = Arc::new(MailerRegistry::with_transports(
            diagnostics.clone(),
            transports.clone(),
        ));
        let connections = ConnectionManager::new(self.connection(PRIMARY_ID)?);
        let gate = DispatchGate::new(connections, registry, transports, diagnostics, self.site.clone());

        println!("🧪 Sending test email to {}", args.to);
        let options = DispatchOptions {
            force_processing: true,
            exceptions: false,
        };

        match gate.dispatch(message, options).await? {
            DispatchResult::Sent { mailer } => {
                println!("✅ Sent via {}", mailer);
                Ok(())
            }
            DispatchResult::Blocked { reason } => {
                println!("🚫 Not sent: {}", reason);
                Ok(())
            }
            DispatchResult::SoftFailed { error, mailer } => {
                println!("❌ Sending via {} failed", mailer);
                for line in error.lines() {
                    println!("   {}", line);
                }
                Err(anyhow!("Test email was not sent"))
            }
        }
    }

    fn handle_events(&self, args: EventsArgs) -> Result<()> {
        if args.clear {
            self.diagnostics.clear();
            println!("✅ Latest error cleared");
            return Ok(());
        }

        match self.diagnostics.latest_error() {
            Some(error) => {
                println!("❌ Latest error:");
                for line in error.lines() {
                    println!("   {}", line);
                }
            }
            None => println!("✅ No pending error"),
        }

        let events = self.diagnostics.list();
        if events.is_empty() {
            println!("\nNo debug events recorded");
            return Ok(());
        }

        println!("\n📋 Debug events");
        let skip = events.len().saturating_sub(args.limit);
        for event in events.iter().skip(skip) {
            println!(
                "#{} {} [{}]",
                event.id,
                event.created_at.format("%Y-%m-%d %H:%M:%S"),
                event.kind.as_str()
            );
            for line in event.message.lines() {
                println!("   {}", line);
            }
        }
        Ok(())
    }
}

/// `group.key` -> (`group`, `key`)
/// One line describing whether the connection's mailer is ready to send
fn mailer_status(connection: &Connection, registry: &MailerRegistry) -> String {
    let slug = connection.mailer_slug();
    let title = registry
        .get_options(&slug)
        .map(|descriptor| descriptor.title)
        .unwrap_or_else(|| slug.clone());

    match connection.mailer(registry) {
        Some(mailer) if mailer.is_mailer_complete() => format!("✅ {} is fully configured", title),
        Some(_) => format!("⚠️  {} is missing required settings", title),
        None => format!("⚠️  {} has no mailer implementation installed", title),
    }
}

fn split_field(field: &str) -> Result<(&str, &str)> {
    field
        .split_once('.')
        .filter(|(group, key)| !group.is_empty() && !key.is_empty())
        .ok_or_else(|| anyhow!("Options are addressed as group.key, got '{}'", field))
}

/// JSON literals are taken as such, anything else is a string
fn parse_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if !value.is_object() => value,
        _ => Value::String(raw.to_string()),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) if text.is_empty() => "(empty)".to_string(),
        Value::String(text) => text.clone(),
        Value::Null => "(not set)".to_string(),
        other => other.to_string(),
    }
}

fn mask(value: &Value) -> String {
    match value.as_str() {
        Some(text) if !text.is_empty() => "********".to_string(),
        _ => display(value),
    }
}

fn source_label(source: ValueSource) -> &'static str {
    match source {
        ValueSource::Environment => "  [environment]",
        ValueSource::Stored => "",
        ValueSource::Default => "  [default]",
    }
}
