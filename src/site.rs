//! Site identity used when computing default senders and domain checks

use url::Url;

/// The site on whose behalf mail is being sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteContext {
    url: Url,
    name: String,
}

impl SiteContext {
    /// Create a site context from its public URL and display name
    pub fn new(url: Url, name: impl Into<String>) -> Self {
        Self {
            url,
            name: name.into(),
        }
    }

    /// Parse the site URL, accepting bare host names such as `example.com`
    pub fn parse(url: &str, name: impl Into<String>) -> Result<Self, url::ParseError> {
        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{}", url))?,
            Err(e) => return Err(e),
        };

        Ok(Self::new(url, name))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host part of the site URL, lowercased, with a leading `www.` removed
    pub fn domain(&self) -> String {
        let host = self.url.host_str().unwrap_or_default().to_lowercase();
        host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
    }

    /// The address the host would use when nobody configured a sender
    pub fn default_from_email(&self) -> String {
        format!("wordpress@{}", self.domain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_strips_www() {
        let site = SiteContext::parse("https://www.Example.com/blog", "Blog").unwrap();
        assert_eq!(site.domain(), "example.com");
        assert_eq!(site.default_from_email(), "wordpress@example.com");
    }

    #[test]
    fn test_parse_bare_host() {
        let site = SiteContext::parse("shop.example.org", "Shop").unwrap();
        assert_eq!(site.domain(), "shop.example.org");
        assert_eq!(site.name(), "Shop");
    }
}
