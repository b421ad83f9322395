use super::error::{BrokerError, BrokerResult};
use hyper::Uri;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;

/// Everything except the SigV4 unreserved characters `A-Z a-z 0-9 - _ . ~`
pub(crate) const AWS_URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn uri_encode(value: &str) -> String {
    utf8_percent_encode(value, AWS_URI_ENCODE_SET).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// A parsed `http`/`https` target used for both the STS and storage endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: Option<u16>,
    /// Already percent-encoded, no trailing slash; empty for the root
    path: String,
}

impl Endpoint {
    pub fn parse(raw: &str) -> BrokerResult<Self> {
        let trimmed = raw.trim();
        let uri: Uri = trimmed
            .parse()
            .map_err(|e| BrokerError::invalid_request(format!("invalid endpoint '{}': {}", trimmed, e)))?;

        let scheme = match uri.scheme_str() {
            Some("http") => Scheme::Http,
            Some("https") => Scheme::Https,
            Some(other) => {
                return Err(BrokerError::invalid_request(format!(
                    "unsupported scheme '{}' in endpoint '{}'",
                    other, trimmed
                )))
            }
            None => {
                return Err(BrokerError::invalid_request(format!(
                    "endpoint '{}' is missing a scheme",
                    trimmed
                )))
            }
        };

        let host = match uri.host() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => {
                return Err(BrokerError::invalid_request(format!(
                    "endpoint '{}' is missing a host",
                    trimmed
                )))
            }
        };

        Ok(Self {
            scheme,
            host,
            port: uri.port_u16(),
            path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// TLS is on exactly when the scheme is `https`
    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// Value for the `Host` header, omitting the scheme's default port
    pub fn host_header(&self) -> String {
        match self.port {
            Some(port) if port != self.scheme.default_port() => format!("{}:{}", self.host, port),
            _ => self.host.clone(),
        }
    }

    /// Appends one path segment, percent-encoding it so it cannot escape the segment
    pub fn join_segment(&self, segment: &str) -> Endpoint {
        let mut joined = self.clone();
        joined.path = format!("{}/{}", self.path, uri_encode(segment.trim_matches('/')));
        joined
    }

    /// Full URL for an already-encoded path below this endpoint and an encoded query
    pub fn url(&self, path: &str, query: &str) -> String {
        let mut url = format!("{}://{}", self.scheme.as_str(), self.authority());
        let full_path = format!("{}{}", self.path, path);
        if full_path.is_empty() {
            url.push('/');
        } else {
            url.push_str(&full_path);
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    pub fn uri(&self, path: &str, query: &str) -> BrokerResult<Uri> {
        let url = self.url(path, query);
        url.parse()
            .map_err(|e| BrokerError::invalid_request(format!("invalid request URI '{}': {}", url, e)))
    }

    fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme.as_str(), self.authority(), self.path)
    }
}
