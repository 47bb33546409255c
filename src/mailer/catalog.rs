//! Static metadata for every supported mailer, in display order

use super::{AuthKind, Capability, OptionsDescriptor};
use crate::config::BUILTIN_MAILER;

/// Slug of the generic SMTP mailer
pub const SMTP_MAILER: &str = "smtp";

struct CatalogEntry {
    slug: &'static str,
    title: &'static str,
    description: &'static str,
    capabilities: &'static [Capability],
    recommended: bool,
    auth: AuthKind,
}

use Capability::*;

const ALL_FIELDS: &[Capability] = &[FromEmail, FromName, FromEmailForce, FromNameForce, ReturnPath];
const API_FIELDS: &[Capability] = &[FromEmail, FromName, FromEmailForce, FromNameForce];
const ACCOUNT_FIELDS: &[Capability] = &[FromName, FromNameForce];

const fn entry(
    slug: &'static str,
    title: &'static str,
    description: &'static str,
    capabilities: &'static [Capability],
    recommended: bool,
    auth: AuthKind,
) -> CatalogEntry {
    CatalogEntry {
        slug,
        title,
        description,
        capabilities,
        recommended,
        auth,
    }
}

static CATALOG: &[CatalogEntry] = &[
    entry(BUILTIN_MAILER, "Default (none)", "Hands messages to the local sendmail binary.", ALL_FIELDS, false, AuthKind::None),
    entry("sendlayer", "SendLayer", "Transactional delivery through the SendLayer API.", API_FIELDS, true, AuthKind::ApiKey),
    entry("smtpcom", "SMTP.com", "Delivery through the SMTP.com API using a sender channel.", API_FIELDS, true, AuthKind::ApiKey),
    entry("sendinblue", "Brevo", "Delivery through the Brevo (formerly Sendinblue) API.", API_FIELDS, false, AuthKind::ApiKey),
    entry("amazonses", "Amazon SES", "Delivery through Amazon Simple Email Service.", API_FIELDS, false, AuthKind::ApiKey),
    entry("elasticemail", "Elastic Email", "Delivery through the Elastic Email API.", API_FIELDS, false, AuthKind::ApiKey),
    entry("gmail", "Google / Gmail", "Sends as the authorized Google account over SMTP with XOAUTH2.", ACCOUNT_FIELDS, false, AuthKind::OAuth),
    entry("mailgun", "Mailgun", "Delivery through the Mailgun API.", API_FIELDS, false, AuthKind::ApiKey),
    entry("mailjet", "Mailjet", "Delivery through the Mailjet API.", API_FIELDS, false, AuthKind::ApiKey),
    entry("mandrill", "Mandrill", "Delivery through the Mailchimp Transactional (Mandrill) API.", API_FIELDS, false, AuthKind::ApiKey),
    entry("outlook", "365 / Outlook", "Sends as the authorized Microsoft account over SMTP with XOAUTH2.", ACCOUNT_FIELDS, false, AuthKind::OAuth),
    entry("postmark", "Postmark", "Delivery through the Postmark API.", API_FIELDS, false, AuthKind::ApiKey),
    entry("resend", "Resend", "Delivery through the Resend API.", API_FIELDS, false, AuthKind::ApiKey),
    entry("sendgrid", "SendGrid", "Delivery through the SendGrid API.", API_FIELDS, false, AuthKind::ApiKey),
    entry("smtp2go", "SMTP2GO", "Delivery through the SMTP2GO API.", API_FIELDS, false, AuthKind::ApiKey),
    entry("sparkpost", "SparkPost", "Delivery through the SparkPost API.", API_FIELDS, false, AuthKind::ApiKey),
    entry("zoho", "Zoho Mail", "Sends as the authorized Zoho account.", ACCOUNT_FIELDS, false, AuthKind::OAuth),
    entry(SMTP_MAILER, "Other SMTP", "Any SMTP server with optional password authentication.", ALL_FIELDS, false, AuthKind::Password),
];

impl CatalogEntry {
    fn descriptor(&self) -> OptionsDescriptor {
        OptionsDescriptor {
            slug: self.slug.to_string(),
            title: self.title.to_string(),
            description: self.description.to_string(),
            capabilities: self.capabilities.to_vec(),
            min_runtime: None,
            recommended: self.recommended,
            disabled: false,
            auth: self.auth,
        }
    }
}

/// Whether `slug` names a mailer this crate knows about
pub fn is_known_slug(slug: &str) -> bool {
    CATALOG.iter().any(|entry| entry.slug == slug)
}

/// Mailers sent through the builtin transports rather than a provider unit
pub fn is_builtin(slug: &str) -> bool {
    slug == BUILTIN_MAILER || slug == SMTP_MAILER
}

pub fn slugs() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|entry| entry.slug)
}

pub fn descriptor(slug: &str) -> Option<OptionsDescriptor> {
    CATALOG
        .iter()
        .find(|entry| entry.slug == slug)
        .map(CatalogEntry::descriptor)
}

/// Every descriptor in display order
pub fn descriptors() -> Vec<OptionsDescriptor> {
    CATALOG.iter().map(CatalogEntry::descriptor).collect()
}
