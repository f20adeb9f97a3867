//! Pool address parsing.
//!
//! Pools are configured with URI-like addresses of the form
//! `<protocol>+<transport>://<host>:<port>`, optionally followed by `/`.
//! Only `stratum` over `tcp` is supported, and anything else is rejected when
//! the address is parsed rather than when it is dialed.

use std::fmt;
use std::str::FromStr;

use strum::{Display, EnumString};
use thiserror::Error;

/// Application protocol spoken with the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    Stratum,
}

/// Stream transport used to reach the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Transport {
    Tcp,
}

/// Errors parsing a pool address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address '{0}' is missing the '<protocol>+<transport>://' prefix")]
    MissingScheme(String),

    #[error("only 'stratum' protocol is supported, not '{0}'")]
    UnsupportedProtocol(String),

    #[error("only 'tcp' transport is supported, not '{0}'")]
    UnsupportedTransport(String),

    #[error("address '{0}' is missing a host")]
    MissingHost(String),

    #[error("address '{0}' is missing a port")]
    MissingPort(String),

    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

/// A parsed pool address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportAddress {
    pub protocol: Protocol,
    pub transport: Transport,
    pub host: String,
    pub port: u16,
}

impl TransportAddress {
    /// The `host:port` string handed to the dialer.
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for TransportAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| AddressError::MissingScheme(s.to_string()))?;
        let (protocol, transport) = scheme
            .split_once('+')
            .ok_or_else(|| AddressError::MissingScheme(s.to_string()))?;

        let protocol = Protocol::from_str(protocol)
            .map_err(|_| AddressError::UnsupportedProtocol(protocol.to_string()))?;
        let transport = Transport::from_str(transport)
            .map_err(|_| AddressError::UnsupportedTransport(transport.to_string()))?;

        let authority = rest.strip_suffix('/').unwrap_or(rest);
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(AddressError::MissingHost(s.to_string()));
        }
        if port.is_empty() {
            return Err(AddressError::MissingPort(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressError::InvalidPort(port.to_string()))?;

        Ok(Self {
            protocol,
            transport,
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+{}://{}",
            self.protocol,
            self.transport,
            self.socket_addr()
        )
    }
}
