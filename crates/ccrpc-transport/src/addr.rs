//! Address URIs.
//!
//! `thread://<name>` and `memory://<name>` use opaque endpoint names,
//! `ipc://<path>` an absolute filesystem path, `tcp://<host>:<port>` and
//! `http://<host>:<port>` network endpoints.

use std::time::Duration;

/// Transport scheme, selected purely by the address URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Thread,
    Memory,
    Ipc,
    Tcp,
    Http,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Thread => "thread",
            Scheme::Memory => "memory",
            Scheme::Ipc => "ipc",
            Scheme::Tcp => "tcp",
            Scheme::Http => "http",
        }
    }

    /// Whether the driver crosses a host boundary (and so gets the longer
    /// default call deadline).
    pub fn is_remote(self) -> bool {
        matches!(self, Scheme::Ipc | Scheme::Tcp | Scheme::Http)
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from address parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddrError {
    /// No `scheme://` separator.
    MissingScheme(String),
    /// Scheme is not one of the five drivers.
    UnsupportedScheme(String),
    /// Target part is empty or malformed for the scheme.
    BadTarget { addr: String, reason: &'static str },
}

impl std::fmt::Display for AddrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddrError::MissingScheme(addr) => write!(f, "address {addr:?} has no scheme"),
            AddrError::UnsupportedScheme(scheme) => {
                write!(f, "unsupported scheme {scheme:?}")
            }
            AddrError::BadTarget { addr, reason } => {
                write!(f, "bad address {addr:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for AddrError {}

/// A parsed transport address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    scheme: Scheme,
    target: String,
}

impl Address {
    /// Parse a `scheme://target` URI.
    pub fn parse(addr: &str) -> Result<Self, AddrError> {
        let (scheme_str, target) = addr
            .split_once("://")
            .ok_or_else(|| AddrError::MissingScheme(addr.to_owned()))?;

        let scheme = match scheme_str {
            "thread" => Scheme::Thread,
            "memory" => Scheme::Memory,
            "ipc" => Scheme::Ipc,
            "tcp" => Scheme::Tcp,
            "http" => Scheme::Http,
            other => return Err(AddrError::UnsupportedScheme(other.to_owned())),
        };

        if target.is_empty() {
            return Err(AddrError::BadTarget {
                addr: addr.to_owned(),
                reason: "empty target",
            });
        }
        match scheme {
            Scheme::Ipc if !target.starts_with('/') => {
                return Err(AddrError::BadTarget {
                    addr: addr.to_owned(),
                    reason: "ipc path must be absolute",
                });
            }
            Scheme::Tcp | Scheme::Http if !target.contains(':') => {
                return Err(AddrError::BadTarget {
                    addr: addr.to_owned(),
                    reason: "expected host:port",
                });
            }
            _ => {}
        }

        Ok(Address {
            scheme,
            target: target.to_owned(),
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The part after `scheme://`: endpoint name, socket path, or host:port.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Built-in default for the client per-call deadline on this transport.
    pub fn default_call_timeout(&self) -> Duration {
        if self.scheme.is_remote() {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(5)
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.target)
    }
}

impl std::str::FromStr for Address {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_schemes() {
        for (addr, scheme) in [
            ("thread://worker", Scheme::Thread),
            ("memory://grid", Scheme::Memory),
            ("ipc:///tmp/crm.sock", Scheme::Ipc),
            ("tcp://127.0.0.1:17011", Scheme::Tcp),
            ("http://127.0.0.1:8080", Scheme::Http),
        ] {
            let parsed = Address::parse(addr).unwrap();
            assert_eq!(parsed.scheme(), scheme);
            assert_eq!(parsed.to_string(), addr);
        }
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert_eq!(
            Address::parse("zmq://host:1"),
            Err(AddrError::UnsupportedScheme("zmq".into()))
        );
    }

    #[test]
    fn rejects_missing_scheme_and_empty_target() {
        assert!(matches!(
            Address::parse("localhost:80"),
            Err(AddrError::MissingScheme(_))
        ));
        assert!(matches!(
            Address::parse("thread://"),
            Err(AddrError::BadTarget { .. })
        ));
    }

    #[test]
    fn validates_scheme_specific_targets() {
        assert!(matches!(
            Address::parse("ipc://relative.sock"),
            Err(AddrError::BadTarget { .. })
        ));
        assert!(matches!(
            Address::parse("tcp://no-port"),
            Err(AddrError::BadTarget { .. })
        ));
    }

    #[test]
    fn call_timeout_defaults_split_by_locality() {
        assert_eq!(
            Address::parse("thread://a").unwrap().default_call_timeout(),
            Duration::from_secs(5)
        );
        assert_eq!(
            Address::parse("tcp://h:1").unwrap().default_call_timeout(),
            Duration::from_secs(30)
        );
    }
}
