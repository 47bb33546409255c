use super::{MessageError, MessageResult};
use lettre::{message::Mailbox, Address};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A mailbox: address plus optional display name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub email: String,
    pub name: Option<String>,
}

impl EmailAddress {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    pub fn with_name(email: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            email: email.into(),
            name: (!name.is_empty()).then_some(name),
        }
    }

    /// Parse `user@example.com` or `Name <user@example.com>`
    pub fn parse(address: &str) -> MessageResult<Self> {
        let trimmed = address.trim();

        if trimmed.is_empty() {
            return Err(MessageError::InvalidAddress("Empty address".to_string()));
        }

        if let (Some(start), Some(end)) = (trimmed.find('<'), trimmed.rfind('>')) {
            if start < end {
                let name = trimmed[..start].trim().trim_matches('"').trim();
                let email = trimmed[start + 1..end].trim();
                if !is_valid_email(email) {
                    return Err(MessageError::InvalidAddress(email.to_string()));
                }
                return Ok(Self::with_name(email, name));
            }
        }

        if !is_valid_email(trimmed) {
            return Err(MessageError::InvalidAddress(trimmed.to_string()));
        }
        Ok(Self::new(trimmed))
    }

    /// Case-insensitive address comparison, ignoring display names
    pub fn same_address(&self, other: &str) -> bool {
        self.email.trim().eq_ignore_ascii_case(other.trim())
    }

    pub fn to_mailbox(&self) -> MessageResult<Mailbox> {
        let address = Address::from_str(self.email.trim())?;
        Ok(Mailbox::new(self.name.clone(), address))
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.email),
            None => write!(f, "{}", self.email),
        }
    }
}

/// Parse a comma-separated list of addresses
pub fn parse_address_list(addresses: &str) -> MessageResult<Vec<EmailAddress>> {
    addresses
        .split(',')
        .filter(|addr| !addr.trim().is_empty())
        .map(EmailAddress::parse)
        .collect()
}

/// Syntactic address validation
pub fn is_valid_email(email: &str) -> bool {
    static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$").unwrap()
    });

    let email = email.trim();
    email.len() > 3 && email.len() <= 254 && EMAIL_REGEX.is_match(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mailbox() {
        let plain = EmailAddress::parse("test@example.com").unwrap();
        assert_eq!(plain.email, "test@example.com");
        assert!(plain.name.is_none());

        let named = EmailAddress::parse("John Doe <john@example.com>").unwrap();
        assert_eq!(named.email, "john@example.com");
        assert_eq!(named.name.as_deref(), Some("John Doe"));

        let quoted = EmailAddress::parse("\"Jane Smith\" <jane@example.com>").unwrap();
        assert_eq!(quoted.name.as_deref(), Some("Jane Smith"));
        assert_eq!(quoted.to_string(), "Jane Smith <jane@example.com>");
    }

    #[test]
    fn test_parse_address_list() {
        let addresses =
            parse_address_list("test1@example.com, John <test2@example.com>, test3@example.com")
                .unwrap();
        assert_eq!(addresses.len(), 3);
        assert_eq!(addresses[1].email, "test2@example.com");
        assert_eq!(addresses[1].name.as_deref(), Some("John"));

        assert!(parse_address_list("ok@example.com, broken").is_err());
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("test@example.com"));
        assert!(is_valid_email("user.name+tag@domain.co.uk"));
        assert!(!is_valid_email("invalid"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("test@"));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("two@@example.com"));
    }

    #[test]
    fn test_same_address_ignores_case() {
        let address = EmailAddress::with_name("Site@Example.com", "Site");
        assert!(address.same_address("site@example.com "));
        assert!(!address.same_address("other@example.com"));
    }
}
