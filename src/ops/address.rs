use regex::Regex;
use std::sync::OnceLock;

/// How a descriptor's `domain_or_ip` is reached. Decides template, scheme and TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// Dotted-quad IPv4 literal: plain HTTP, self-signed 443 redirect, no certbot.
    Ipv4,
    /// Anything else (hostnames, IPv6 literals): ACME-ready HTTP, upgraded by certbot.
    Domain,
}

fn dotted_quad() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9]{1,3})\.([0-9]{1,3})\.([0-9]{1,3})\.([0-9]{1,3})$")
            .expect("static regex")
    })
}

impl AddressKind {
    pub fn classify(address: &str) -> Self {
        let Some(caps) = dotted_quad().captures(address) else {
            return Self::Domain;
        };
        let in_range = caps
            .iter()
            .skip(1)
            .flatten()
            .all(|octet| octet.as_str().parse::<u16>().map_or(false, |v| v <= 255));
        if in_range {
            Self::Ipv4
        } else {
            Self::Domain
        }
    }

    pub fn scheme(self) -> &'static str {
        match self {
            Self::Ipv4 => "http",
            Self::Domain => "https",
        }
    }

    pub fn wants_tls(self) -> bool {
        matches!(self, Self::Domain)
    }

    pub fn public_url(self, address: &str) -> String {
        format!("{}://{}", self.scheme(), address)
    }
}

impl std::fmt::Display for AddressKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ipv4 => write!(f, "ipv4"),
            Self::Domain => write!(f, "domain"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        let cases = [
            ("203.0.113.5", AddressKind::Ipv4),
            ("0.0.0.0", AddressKind::Ipv4),
            ("255.255.255.255", AddressKind::Ipv4),
            ("10.0.0.01", AddressKind::Ipv4),
            ("256.1.1.1", AddressKind::Domain),
            ("1.2.3", AddressKind::Domain),
            ("1.2.3.4.5", AddressKind::Domain),
            ("1.2.3.4 ", AddressKind::Domain),
            ("2001:db8::1", AddressKind::Domain),
            ("::1", AddressKind::Domain),
            ("api.example.com", AddressKind::Domain),
            ("localhost", AddressKind::Domain),
            ("", AddressKind::Domain),
        ];
        for (input, expected) in cases {
            assert_eq!(AddressKind::classify(input), expected, "input {:?}", input);
        }
    }

    #[test]
    fn public_url_follows_kind() {
        assert_eq!(
            AddressKind::classify("203.0.113.5").public_url("203.0.113.5"),
            "http://203.0.113.5"
        );
        assert_eq!(
            AddressKind::classify("app.example.org").public_url("app.example.org"),
            "https://app.example.org"
        );
    }
}
