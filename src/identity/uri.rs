//! Two-stage decomposition of `Name <scheme:user@host:port>` addresses

use once_cell::sync::Lazy;
use regex::Regex;

const DEFAULT_SIP_PORT: u16 = 5060;

const URI_SCHEMES: &[&str] = &["sip", "sips", "tel", "ring", "jami"];

/// `optional name <inner>` or a bare `inner`
static ANGLE_BRACKETS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:"?([^"<>]*?)"?\s*<)?([^<>]+?)>?\s*$"#).expect("valid angle-bracket regex")
});

/// `[scheme:][user@]host[:port][;params]`
static SCHEME_USER_HOST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:([A-Za-z][A-Za-z0-9+\-]*):)?(?:([^@:;\s]+)@)?([^:;@\s]+)(?::(\d{1,5}))?(?:;.*)?$")
        .expect("valid address regex")
});

/// Structured view of a phone number or SIP address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SipUri {
    pub display_name: Option<String>,
    pub scheme: Option<String>,
    /// Empty when the address carries no user part
    pub user: String,
    pub host: String,
    pub port: Option<u16>,
}

impl SipUri {
    /// Never fails: anything unrecognised becomes a host-only address
    pub fn parse(raw: &str) -> Self {
        let (display_name, inner) = match ANGLE_BRACKETS.captures(raw) {
            Some(caps) => (
                caps.get(1)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|n| !n.is_empty()),
                caps.get(2).map_or(raw, |m| m.as_str()).trim(),
            ),
            None => (None, raw.trim()),
        };

        let mut uri = match SCHEME_USER_HOST.captures(inner) {
            Some(caps) => {
                let scheme = caps.get(1).map(|m| m.as_str().to_string());
                let user = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
                let host = caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default();
                let port = caps.get(4).and_then(|m| m.as_str().parse::<u16>().ok());
                Self::split_host_port(scheme, user, host, port)
            }
            None => Self::host_only(inner),
        };
        uri.display_name = display_name;
        uri
    }

    fn host_only(inner: &str) -> Self {
        Self {
            host: inner.to_string(),
            ..Self::default()
        }
    }

    /// `localhost:5060` matches the scheme group; undo that when the
    /// "scheme" is not a URI scheme and nothing but digits follows.
    fn split_host_port(
        scheme: Option<String>,
        user: String,
        host: String,
        port: Option<u16>,
    ) -> Self {
        let bare_host = scheme
            .as_ref()
            .filter(|s| !URI_SCHEMES.contains(&s.to_ascii_lowercase().as_str()));
        if let Some(s) = bare_host {
            if user.is_empty() && port.is_none() && host.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(p) = host.parse::<u16>() {
                    return Self {
                        host: s.clone(),
                        port: Some(p),
                        ..Self::default()
                    };
                }
            }
        }
        Self {
            display_name: None,
            scheme,
            user,
            host,
            port,
        }
    }

    pub fn has_user(&self) -> bool {
        !self.user.is_empty()
    }

    /// `user@host` key, only for addresses with a user part
    pub fn canonical_key(&self) -> Option<String> {
        self.has_user()
            .then(|| format!("{}@{}", self.user, self.host.to_ascii_lowercase()))
    }

    fn effective_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SIP_PORT)
    }

    /// Structural equality ignoring display name and scheme
    pub fn same_address(&self, other: &SipUri) -> bool {
        self.user == other.user
            && self.host.eq_ignore_ascii_case(&other.host)
            && self.effective_port() == other.effective_port()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_sip_uri() {
        let uri = SipUri::parse("sip:alice@example.com:5070");
        assert_eq!(uri.scheme.as_deref(), Some("sip"));
        assert_eq!(uri.user, "alice");
        assert_eq!(uri.host, "example.com");
        assert_eq!(uri.port, Some(5070));
        assert_eq!(uri.display_name, None);
    }

    #[test]
    fn test_parse_display_name_and_brackets() {
        let uri = SipUri::parse("\"Alice Smith\" <sip:alice@Example.com>");
        assert_eq!(uri.display_name.as_deref(), Some("Alice Smith"));
        assert_eq!(uri.user, "alice");
        assert_eq!(uri.canonical_key().as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_brackets_without_name() {
        let uri = SipUri::parse("<sip:bob@10.0.0.1>");
        assert_eq!(uri.display_name, None);
        assert_eq!(uri.canonical_key().as_deref(), Some("bob@10.0.0.1"));
    }

    #[test]
    fn test_bare_number_is_host_only() {
        let uri = SipUri::parse("+15550001");
        assert_eq!(uri.host, "+15550001");
        assert!(uri.user.is_empty());
        assert_eq!(uri.canonical_key(), None);
    }

    #[test]
    fn test_host_and_port_without_scheme() {
        let uri = SipUri::parse("localhost:5060");
        assert_eq!(uri.scheme, None);
        assert_eq!(uri.host, "localhost");
        assert_eq!(uri.port, Some(5060));
    }

    #[test]
    fn test_short_tel_number_keeps_scheme() {
        let uri = SipUri::parse("tel:1234");
        assert_eq!(uri.scheme.as_deref(), Some("tel"));
        assert_eq!(uri.host, "1234");
        assert_eq!(uri.port, None);
    }

    #[test]
    fn test_unparsable_falls_back_to_host() {
        let uri = SipUri::parse("not a uri @@ at all");
        assert_eq!(uri.host, "not a uri @@ at all");
        assert!(uri.user.is_empty());
    }

    #[test]
    fn test_params_are_ignored() {
        let uri = SipUri::parse("sip:carol@pbx.local;transport=tcp");
        assert_eq!(uri.host, "pbx.local");
        assert_eq!(uri.port, None);
    }

    #[test]
    fn test_same_address_defaults_port() {
        let a = SipUri::parse("sip:alice@example.com");
        let b = SipUri::parse("Alice <sips:alice@EXAMPLE.com:5060>");
        let c = SipUri::parse("sip:alice@example.com:5080");
        assert!(a.same_address(&b));
        assert!(!a.same_address(&c));
    }
}
