//! Turning a loosely formatted target string into something we can connect to.

use std::fmt;

use crate::error::{Error, Result};

/// The protocol spoken on the target port.
///
/// Selects both the default port and which plaintext exchange, if any, has to
/// happen before the TLS handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// HTTP over TLS.
    Https,
    /// Any protocol that starts with a TLS handshake.
    Tls,
    /// SMTP submission, upgraded with `STARTTLS`.
    Smtp,
    /// IMAP, upgraded with `STARTTLS`.
    Imap,
    /// POP3, upgraded with `STLS`.
    Pop3,
    /// Anything else. Treated as direct TLS.
    Other(String),
}

impl Scheme {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "https" => Self::Https,
            "tls" => Self::Tls,
            "smtp" => Self::Smtp,
            "imap" => Self::Imap,
            "pop3" => Self::Pop3,
            other => Self::Other(other.to_owned()),
        }
    }

    /// The port used when a `scheme://host` target names no port.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Smtp => 587,
            Self::Imap => 143,
            Self::Pop3 => 110,
            Self::Https | Self::Tls | Self::Other(_) => 443,
        }
    }

    /// Guesses the scheme of a bare `host:port` target from the port.
    ///
    /// Only the well-known STARTTLS ports are recognised, anything else is
    /// assumed to be HTTPS.
    pub fn for_port(port: u16) -> Self {
        match port {
            25 | 587 => Self::Smtp,
            143 => Self::Imap,
            110 => Self::Pop3,
            _ => Self::Https,
        }
    }

    /// Lowercase scheme name, as written before `://`.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Https => "https",
            Self::Tls => "tls",
            Self::Smtp => "smtp",
            Self::Imap => "imap",
            Self::Pop3 => "pop3",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    host: String,
    port: u16,
    scheme: Scheme,
}

impl Target {
    /// Resolves `scheme://host[:port][/path]`, `host:port` or `host`.
    pub fn resolve(raw: &str) -> Result<Self> {
        let input = raw.trim();

        let (scheme, host, port) = if let Some((scheme, rest)) = input.split_once("://") {
            if scheme.is_empty() {
                return Err(Error::target(raw, "empty scheme"));
            }
            let scheme = Scheme::parse(scheme);
            // Anything after the authority is a path we have no use for.
            let authority = rest.split('/').next().unwrap_or_default();
            let (host, port) = match split_host_port(raw, authority)? {
                (host, Some(port)) => (host, port),
                (host, None) => (host, scheme.default_port()),
            };
            (scheme, host, port)
        } else {
            match split_host_port(raw, input)? {
                (host, Some(port)) => (Scheme::for_port(port), host, port),
                (host, None) => (Scheme::Https, host, 443),
            }
        };

        if host.is_empty() {
            return Err(Error::target(raw, "empty host"));
        }

        Ok(Self {
            host: host.to_owned(),
            port,
            scheme,
        })
    }

    /// Host name or IP literal, without IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Protocol spoken on the port.
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

/// Splits `host[:port]`, accepting bracketed IPv6 literals.
fn split_host_port<'a>(raw: &str, authority: &'a str) -> Result<(&'a str, Option<u16>)> {
    if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, rest) = bracketed
            .split_once(']')
            .ok_or_else(|| Error::target(raw, "missing `]` in address"))?;
        return match rest {
            "" => Ok((host, None)),
            _ => match rest.strip_prefix(':') {
                Some(port) => Ok((host, Some(parse_port(raw, port)?))),
                None => Err(Error::target(raw, "unexpected text after `]`")),
            },
        };
    }

    match authority.split_once(':') {
        None => Ok((authority, None)),
        Some((_, port)) if port.contains(':') => {
            Err(Error::target(raw, "too many colons in address"))
        }
        Some((host, port)) => Ok((host, Some(parse_port(raw, port)?))),
    }
}

fn parse_port(raw: &str, port: &str) -> Result<u16> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(Error::target(raw, format!("invalid port `{port}`"))),
        Ok(port) => Ok(port),
    }
}
