use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Transport used to reach the upstream predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PredictorProtocol {
    #[default]
    RestV1,
    RestV2,
    GrpcV2,
}

impl PredictorProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictorProtocol::RestV1 => "v1",
            PredictorProtocol::RestV2 => "v2",
            PredictorProtocol::GrpcV2 => "grpc-v2",
        }
    }
}

impl fmt::Display for PredictorProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredictorProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v1" => Ok(PredictorProtocol::RestV1),
            "v2" => Ok(PredictorProtocol::RestV2),
            "grpc-v2" => Ok(PredictorProtocol::GrpcV2),
            other => Err(format!(
                "unknown predictor protocol '{other}', expected v1, v2 or grpc-v2"
            )),
        }
    }
}

pub const DEFAULT_PREDICTOR_TIMEOUT: Duration = Duration::from_secs(600);

/// Upstream predictor settings. Fixed for the lifetime of a `Dataplane`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub predictor_host: Option<String>,
    pub predictor_protocol: PredictorProtocol,
    pub predictor_use_ssl: bool,
    pub predictor_timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            predictor_host: None,
            predictor_protocol: PredictorProtocol::default(),
            predictor_use_ssl: false,
            predictor_timeout: DEFAULT_PREDICTOR_TIMEOUT,
        }
    }
}

impl ProtocolConfig {
    pub fn scheme(&self) -> &'static str {
        if self.predictor_use_ssl {
            "https"
        } else {
            "http"
        }
    }

    /// `{scheme}://{host}` of the REST predictor, without a trailing slash.
    pub fn base_url(&self) -> Option<String> {
        self.predictor_host
            .as_deref()
            .map(|host| format!("{}://{}", self.scheme(), host.trim_end_matches('/')))
    }

    /// `{scheme}://{host}:{port}` of the RPC predictor. The port defaults to
    /// 443 with TLS and 80 without.
    pub fn grpc_uri(&self) -> Option<String> {
        let host = self.predictor_host.as_deref()?.trim_end_matches('/');
        if has_port(host) {
            return Some(format!("{}://{}", self.scheme(), host));
        }
        let port = if self.predictor_use_ssl { 443 } else { 80 };
        Some(format!("{}://{}:{}", self.scheme(), host, port))
    }
}

fn has_port(host: &str) -> bool {
    // bracketed IPv6 literals keep their colons inside the brackets
    let tail = host.rsplit(']').next().unwrap_or(host);
    tail.rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str, ssl: bool) -> ProtocolConfig {
        ProtocolConfig {
            predictor_host: Some(host.to_string()),
            predictor_use_ssl: ssl,
            ..Default::default()
        }
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("grpc-v2".parse::<PredictorProtocol>(), Ok(PredictorProtocol::GrpcV2));
        assert_eq!("v1".parse::<PredictorProtocol>(), Ok(PredictorProtocol::RestV1));
        assert!("v3".parse::<PredictorProtocol>().is_err());
    }

    #[test]
    fn test_urls() {
        assert_eq!(config("pred:8080", false).base_url().unwrap(), "http://pred:8080");
        assert_eq!(config("pred", true).base_url().unwrap(), "https://pred");
        assert_eq!(ProtocolConfig::default().base_url(), None);
    }

    #[test]
    fn test_grpc_port_defaults() {
        assert_eq!(config("pred", false).grpc_uri().unwrap(), "http://pred:80");
        assert_eq!(config("pred", true).grpc_uri().unwrap(), "https://pred:443");
        assert_eq!(config("pred:9000", true).grpc_uri().unwrap(), "https://pred:9000");
        assert_eq!(config("[::1]", false).grpc_uri().unwrap(), "http://[::1]:80");
        assert_eq!(config("[::1]:81", false).grpc_uri().unwrap(), "http://[::1]:81");
    }
}
