//! Address mapping for discovered services.
//!
//! Druid reports each service by the host and ports it sees internally.
//! When the client runs somewhere else (a laptop talking to Docker, a pod
//! outside the cluster network) those addresses must be translated before
//! they can be dialed.

use crate::consts::{PLAIN_TEXT_PROTOCOL, TLS_PROTOCOL};
use crate::error::{ClientError, Result};
use std::collections::HashMap;
use std::fmt;

/// A dialable service address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedAddress {
    /// `http` or `https`
    pub scheme: &'static str,
    pub host: String,
    pub port: u16,
}

impl MappedAddress {
    fn new(scheme: &'static str, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }

    /// The address as a base URL, e.g. `http://localhost:8081`.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl fmt::Display for MappedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Maps a service's reported address to one reachable from this client.
pub trait ServiceMapper: Send + Sync + fmt::Debug {
    /// Pick the scheme, host and port to dial.
    ///
    /// `http_port` / `tls_port` are `None` when the service does not offer
    /// that protocol. The TLS port wins when `prefer_tls` is set and one is
    /// available; otherwise plain text is used, falling back to TLS when the
    /// service has no plain-text port.
    fn url_for(
        &self,
        host: &str,
        http_port: Option<u16>,
        tls_port: Option<u16>,
        prefer_tls: bool,
    ) -> Result<MappedAddress>;
}

/// Null mapping: services are dialed at the address they report.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapper;

impl ServiceMapper for IdentityMapper {
    fn url_for(
        &self,
        host: &str,
        http_port: Option<u16>,
        tls_port: Option<u16>,
        prefer_tls: bool,
    ) -> Result<MappedAddress> {
        match (http_port, tls_port) {
            (_, Some(tls)) if prefer_tls => Ok(MappedAddress::new(TLS_PROTOCOL, host, tls)),
            (Some(http), _) => Ok(MappedAddress::new(PLAIN_TEXT_PROTOCOL, host, http)),
            (None, Some(tls)) => Ok(MappedAddress::new(TLS_PROTOCOL, host, tls)),
            (None, None) => Err(ClientError::InvalidResponse(format!(
                "service on {host} reports neither a plain-text nor a TLS port"
            ))),
        }
    }
}

/// Mapping for a cluster running in Docker.
///
/// Every service is reached through `docker_host`; ports are translated
/// through the container port mappings. Unmapped ports are used as-is.
#[derive(Debug, Clone)]
pub struct DockerMapper {
    docker_host: String,
    /// internal port -> external port
    port_map: HashMap<u16, u16>,
}

impl DockerMapper {
    /// Create a mapper from Docker-style `(external, internal)` port pairs.
    pub fn new(docker_host: impl Into<String>, port_map: &[(u16, u16)]) -> Self {
        Self {
            docker_host: docker_host.into(),
            port_map: port_map
                .iter()
                .map(|&(external, internal)| (internal, external))
                .collect(),
        }
    }

    fn local_port(&self, port: Option<u16>) -> Option<u16> {
        port.and_then(|p| self.port_map.get(&p).copied())
    }
}

impl Default for DockerMapper {
    fn default() -> Self {
        Self::new("localhost", &[])
    }
}

impl ServiceMapper for DockerMapper {
    fn url_for(
        &self,
        _host: &str,
        http_port: Option<u16>,
        tls_port: Option<u16>,
        prefer_tls: bool,
    ) -> Result<MappedAddress> {
        let local_http = self.local_port(http_port);
        if prefer_tls || local_http.is_none() {
            if let Some(port) = self.local_port(tls_port) {
                return Ok(MappedAddress::new(TLS_PROTOCOL, &self.docker_host, port));
            }
        }
        if let Some(port) = local_http {
            return Ok(MappedAddress::new(
                PLAIN_TEXT_PROTOCOL,
                &self.docker_host,
                port,
            ));
        }
        IdentityMapper.url_for(&self.docker_host, http_port, tls_port, prefer_tls)
    }
}

/// Translate a remote endpoint URL (as reported by Druid) to a local one.
pub fn map_endpoint(mapper: &dyn ServiceMapper, remote_url: &str) -> Result<String> {
    let parsed = url::Url::parse(remote_url)
        .map_err(|e| ClientError::InvalidUrl(format!("{remote_url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ClientError::InvalidUrl(format!("{remote_url}: no host")))?;
    let port = parsed.port_or_known_default();
    let (http_port, tls_port) = match parsed.scheme() {
        PLAIN_TEXT_PROTOCOL => (port, None),
        TLS_PROTOCOL => (None, port),
        other => {
            return Err(ClientError::InvalidUrl(format!(
                "{remote_url}: unsupported scheme {other}"
            )))
        }
    };
    Ok(mapper.url_for(host, http_port, tls_port, false)?.url())
}

/// Convert a `sys.servers` port column (-1 = not offered) to an option.
pub(crate) fn port_from_sys(port: i64) -> Option<u16> {
    u16::try_from(port).ok().filter(|p| *p != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_prefers_tls_when_available() {
        let addr = IdentityMapper
            .url_for("druid-broker", Some(8082), Some(8282), true)
            .unwrap();
        assert_eq!(addr.url(), "https://druid-broker:8282");
    }

    #[test]
    fn test_identity_prefer_tls_falls_back_to_plaintext() {
        let addr = IdentityMapper
            .url_for("druid-broker", Some(8080), port_from_sys(-1), true)
            .unwrap();
        assert_eq!(addr.scheme, "http");
        assert_eq!(addr.port, 8080);
    }

    #[test]
    fn test_identity_plaintext_by_default() {
        let addr = IdentityMapper
            .url_for("h", Some(8081), Some(8281), false)
            .unwrap();
        assert_eq!(addr.url(), "http://h:8081");
    }

    #[test]
    fn test_identity_falls_back_to_tls_without_plaintext() {
        let addr = IdentityMapper.url_for("h", None, Some(8281), false).unwrap();
        assert_eq!(addr.url(), "https://h:8281");
    }

    #[test]
    fn test_identity_no_ports() {
        assert!(IdentityMapper.url_for("h", None, None, true).is_err());
    }

    #[test]
    fn test_docker_translates_ports() {
        let mapper = DockerMapper::new("192.168.1.10", &[(18081, 8081), (18281, 8281)]);

        let addr = mapper
            .url_for("coordinator", Some(8081), Some(8281), false)
            .unwrap();
        assert_eq!(addr.url(), "http://192.168.1.10:18081");

        let addr = mapper
            .url_for("coordinator", Some(8081), Some(8281), true)
            .unwrap();
        assert_eq!(addr.url(), "https://192.168.1.10:18281");
    }

    #[test]
    fn test_docker_unmapped_ports_pass_through() {
        let mapper = DockerMapper::default();
        let addr = mapper.url_for("broker", Some(8082), None, false).unwrap();
        assert_eq!(addr.url(), "http://localhost:8082");
    }

    #[test]
    fn test_docker_tls_only_mapping() {
        let mapper = DockerMapper::new("docker", &[(9443, 8282)]);
        let addr = mapper.url_for("broker", Some(8082), Some(8282), false).unwrap();
        assert_eq!(addr.url(), "https://docker:9443");
    }

    #[test]
    fn test_map_endpoint() {
        let mapper = DockerMapper::new("localhost", &[(18888, 8888)]);
        assert_eq!(
            map_endpoint(&mapper, "http://router:8888").unwrap(),
            "http://localhost:18888"
        );
        assert_eq!(
            map_endpoint(&IdentityMapper, "https://router:9088").unwrap(),
            "https://router:9088"
        );
        assert!(map_endpoint(&IdentityMapper, "ftp://router:21").is_err());
    }

    #[test]
    fn test_port_from_sys() {
        assert_eq!(port_from_sys(-1), None);
        assert_eq!(port_from_sys(8081), Some(8081));
        assert_eq!(port_from_sys(70000), None);
    }
}
