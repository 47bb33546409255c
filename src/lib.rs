pub mod cli;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod dispatch;
pub mod logging;
pub mod mailer;
pub mod message;
pub mod processor;
pub mod site;
pub mod transport;

pub use config::ConfigResolver;
pub use connection::{Connection, ConnectionManager};
pub use diagnostics::DiagnosticsSink;
pub use dispatch::{DispatchGate, DispatchOptions, DispatchResult};
pub use mailer::MailerRegistry;
pub use message::OutboundMessage;
pub use site::SiteContext;
