use crate::config::ConfigResolver;

/// Allow-list of site domains permitted to send through the configured mailer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainCheck {
    enabled: bool,
    allowed: Vec<String>,
    block_all: bool,
}

impl DomainCheck {
    pub fn new(enabled: bool, allowed: Vec<String>, block_all: bool) -> Self {
        Self {
            enabled,
            allowed: allowed.iter().map(|domain| normalize(domain)).collect(),
            block_all,
        }
    }

    pub fn from_options(options: &ConfigResolver) -> Self {
        Self::new(
            options.get_bool("domain_check", "enabled"),
            options.get_list("domain_check", "allowed_domains"),
            options.get_bool("domain_check", "do_not_send"),
        )
    }

    /// Whether sending from `site_domain` is blocked
    ///
    /// An enabled check with an empty allow-list blocks nothing.
    pub fn is_blocked(&self, site_domain: &str) -> bool {
        if !self.enabled || self.allowed.is_empty() {
            return false;
        }

        let domain = normalize(site_domain);
        !self.allowed.iter().any(|allowed| *allowed == domain)
    }

    /// Blocked messages are dropped instead of going out unmodified
    pub fn blocks_all(&self) -> bool {
        self.block_all
    }
}

/// `https://www.Example.com/path` -> `example.com`
fn normalize(domain: &str) -> String {
    let domain = domain.trim().to_ascii_lowercase();
    let domain = domain
        .split_once("://")
        .map(|(_, rest)| rest.to_string())
        .unwrap_or(domain);
    let host = domain.split(['/', ':']).next().unwrap_or_default();
    host.strip_prefix("www.").unwrap_or(host).to_string()
}
