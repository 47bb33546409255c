//! Static map of known option fields
//!
//! Each field declares how its value is coerced, which environment constant
//! can override it and what the computed default is.

use serde_json::Value;

/// How a field's value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Email,
    Bool,
    Int,
    /// Encrypted at rest
    Secret,
    /// Comma separated list kept as a single string
    List,
    /// A mailer slug, coerced to the builtin transport when unknown
    Mailer,
    /// `none`, `ssl` or `tls`
    Encryption,
}

/// Computed default for a field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldDefault {
    Text(&'static str),
    Bool(bool),
    Int(i64),
}

impl FieldDefault {
    pub fn to_value(self) -> Value {
        match self {
            FieldDefault::Text(text) => Value::String(text.to_string()),
            FieldDefault::Bool(flag) => Value::Bool(flag),
            FieldDefault::Int(number) => Value::from(number),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub group: &'static str,
    pub key: &'static str,
    pub kind: FieldKind,
    pub constant: Option<&'static str>,
    pub default: FieldDefault,
}

const fn field(
    group: &'static str,
    key: &'static str,
    kind: FieldKind,
    constant: Option<&'static str>,
    default: FieldDefault,
) -> FieldSpec {
    FieldSpec {
        group,
        key,
        kind,
        constant,
        default,
    }
}

use FieldDefault as D;
use FieldKind as K;

/// Slug of the builtin local transport
pub const BUILTIN_MAILER: &str = "mail";

/// Every field the resolver knows about
pub static FIELDS: &[FieldSpec] = &[
    // mail
    field("mail", "mailer", K::Mailer, Some("MAILGATE_MAILER"), D::Text(BUILTIN_MAILER)),
    field("mail", "from_email", K::Email, Some("MAILGATE_MAIL_FROM"), D::Text("")),
    field("mail", "from_name", K::Text, Some("MAILGATE_MAIL_FROM_NAME"), D::Text("")),
    field("mail", "from_email_force", K::Bool, Some("MAILGATE_MAIL_FROM_FORCE"), D::Bool(false)),
    field("mail", "from_name_force", K::Bool, Some("MAILGATE_MAIL_FROM_NAME_FORCE"), D::Bool(false)),
    field("mail", "from_email_exclusions", K::List, None, D::Text("")),
    field("mail", "return_path", K::Bool, Some("MAILGATE_SET_RETURN_PATH"), D::Bool(false)),
    field("mail", "reply_to_email", K::Email, Some("MAILGATE_REPLY_TO"), D::Text("")),
    field("mail", "reply_to_replace_from", K::Bool, None, D::Bool(false)),
    field("mail", "bcc_emails", K::List, Some("MAILGATE_BCC"), D::Text("")),
    // smtp
    field("smtp", "host", K::Text, Some("MAILGATE_SMTP_HOST"), D::Text("")),
    field("smtp", "port", K::Int, Some("MAILGATE_SMTP_PORT"), D::Int(587)),
    field("smtp", "encryption", K::Encryption, Some("MAILGATE_SSL"), D::Text("none")),
    field("smtp", "auth", K::Bool, Some("MAILGATE_SMTP_AUTH"), D::Bool(false)),
    field("smtp", "autotls", K::Bool, Some("MAILGATE_SMTP_AUTOTLS"), D::Bool(true)),
    field("smtp", "user", K::Text, Some("MAILGATE_SMTP_USER"), D::Text("")),
    field("smtp", "pass", K::Secret, Some("MAILGATE_SMTP_PASS"), D::Text("")),
    field("smtp", "insecure_ssl", K::Bool, None, D::Bool(false)),
    // general
    field("general", "do_not_send", K::Bool, Some("MAILGATE_DO_NOT_SEND"), D::Bool(false)),
    // domain_check
    field("domain_check", "enabled", K::Bool, None, D::Bool(false)),
    field("domain_check", "allowed_domains", K::List, None, D::Text("")),
    field("domain_check", "do_not_send", K::Bool, None, D::Bool(false)),
    // debug_events
    field("debug_events", "enabled", K::Bool, Some("MAILGATE_DEBUG_EVENTS"), D::Bool(false)),
    // gmail
    field("gmail", "client_id", K::Text, Some("MAILGATE_GMAIL_CLIENT_ID"), D::Text("")),
    field("gmail", "client_secret", K::Secret, Some("MAILGATE_GMAIL_CLIENT_SECRET"), D::Text("")),
    field("gmail", "user", K::Email, None, D::Text("")),
    field("gmail", "access_token", K::Secret, None, D::Text("")),
    // outlook
    field("outlook", "client_id", K::Text, Some("MAILGATE_OUTLOOK_CLIENT_ID"), D::Text("")),
    field("outlook", "client_secret", K::Secret, Some("MAILGATE_OUTLOOK_CLIENT_SECRET"), D::Text("")),
    field("outlook", "user", K::Email, None, D::Text("")),
    field("outlook", "access_token", K::Secret, None, D::Text("")),
    // mailgun
    field("mailgun", "api_key", K::Secret, Some("MAILGATE_MAILGUN_API_KEY"), D::Text("")),
    field("mailgun", "domain", K::Text, Some("MAILGATE_MAILGUN_DOMAIN"), D::Text("")),
    field("mailgun", "region", K::Text, Some("MAILGATE_MAILGUN_REGION"), D::Text("US")),
    // sendgrid
    field("sendgrid", "api_key", K::Secret, Some("MAILGATE_SENDGRID_API_KEY"), D::Text("")),
    field("sendgrid", "domain", K::Text, Some("MAILGATE_SENDGRID_DOMAIN"), D::Text("")),
    // amazonses
    field("amazonses", "client_id", K::Text, Some("MAILGATE_AMAZONSES_CLIENT_ID"), D::Text("")),
    field("amazonses", "client_secret", K::Secret, Some("MAILGATE_AMAZONSES_CLIENT_SECRET"), D::Text("")),
    field("amazonses", "region", K::Text, Some("MAILGATE_AMAZONSES_REGION"), D::Text("us-east-1")),
    // postmark
    field("postmark", "api_key", K::Secret, Some("MAILGATE_POSTMARK_SERVER_API_TOKEN"), D::Text("")),
    field("postmark", "message_stream", K::Text, Some("MAILGATE_POSTMARK_MESSAGE_STREAM"), D::Text("")),
    // sparkpost
    field("sparkpost", "api_key", K::Secret, Some("MAILGATE_SPARKPOST_API_KEY"), D::Text("")),
    field("sparkpost", "region", K::Text, Some("MAILGATE_SPARKPOST_REGION"), D::Text("US")),
    // remaining API key providers
    field("sendinblue", "api_key", K::Secret, Some("MAILGATE_SENDINBLUE_API_KEY"), D::Text("")),
    field("sendinblue", "domain", K::Text, Some("MAILGATE_SENDINBLUE_DOMAIN"), D::Text("")),
    field("smtpcom", "api_key", K::Secret, Some("MAILGATE_SMTPCOM_API_KEY"), D::Text("")),
    field("smtpcom", "channel", K::Text, Some("MAILGATE_SMTPCOM_CHANNEL"), D::Text("")),
    field("sendlayer", "api_key", K::Secret, Some("MAILGATE_SENDLAYER_API_KEY"), D::Text("")),
    field("elasticemail", "api_key", K::Secret, Some("MAILGATE_ELASTICEMAIL_API_KEY"), D::Text("")),
    field("mailjet", "api_key", K::Secret, Some("MAILGATE_MAILJET_API_KEY"), D::Text("")),
    field("mailjet", "secret_key", K::Secret, Some("MAILGATE_MAILJET_SECRET_KEY"), D::Text("")),
    field("mandrill", "api_key", K::Secret, Some("MAILGATE_MANDRILL_API_KEY"), D::Text("")),
    field("resend", "api_key", K::Secret, Some("MAILGATE_RESEND_API_KEY"), D::Text("")),
    field("smtp2go", "api_key", K::Secret, Some("MAILGATE_SMTP2GO_API_KEY"), D::Text("")),
    field("zoho", "client_id", K::Text, Some("MAILGATE_ZOHO_CLIENT_ID"), D::Text("")),
    field("zoho", "client_secret", K::Secret, Some("MAILGATE_ZOHO_CLIENT_SECRET"), D::Text("")),
    field("zoho", "domain", K::Text, Some("MAILGATE_ZOHO_DOMAIN"), D::Text("com")),
];

/// Look up the static definition of a field
pub fn find(group: &str, key: &str) -> Option<&'static FieldSpec> {
    FIELDS
        .iter()
        .find(|spec| spec.group == group && spec.key == key)
}

/// Interpret a loosely typed value as a boolean
pub fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_i64().map(|n| n != 0).unwrap_or(false),
        Value::String(text) => parse_bool(text),
        _ => false,
    }
}

/// Truthy strings used by environment constants and form input
pub fn parse_bool(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Interpret a loosely typed value as an integer
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|f| f as i64)),
        Value::String(text) => text.trim().parse().ok(),
        Value::Bool(flag) => Some(i64::from(*flag)),
        _ => None,
    }
}

/// Normalize an encryption value to `none`, `ssl` or `tls`
pub fn coerce_encryption(value: &Value) -> &'static str {
    let text = value.as_str().unwrap_or_default().trim().to_ascii_lowercase();
    match text.as_str() {
        "ssl" => "ssl",
        "tls" => "tls",
        _ => "none",
    }
}

/// Split a comma separated list, dropping empty items
pub fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
