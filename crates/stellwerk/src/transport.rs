use serde::{Deserialize, Serialize};

use crate::error::StellwerkError;

/// Transport layer for ZeroMQ connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Inter-process communication via Unix domain sockets.
    /// Fastest option for same-host communication.
    Ipc(String),

    /// TCP transport for distributed deployment.
    Tcp { host: String, port: u16 },
}

impl Transport {
    /// Create an IPC transport with the given socket name, placed under
    /// `/tmp/dirigent/`.
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(format!("/tmp/dirigent/{name}.sock"))
    }

    /// Create a TCP transport with the given host and port.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Parse an endpoint string (`tcp://host:port` or `ipc://path`).
    pub fn parse(endpoint: &str) -> Result<Self, StellwerkError> {
        if let Some(rest) = endpoint.strip_prefix("tcp://") {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| StellwerkError::Config(format!("missing port in '{endpoint}'")))?;
            let port = port
                .parse()
                .map_err(|_| StellwerkError::Config(format!("bad port in '{endpoint}'")))?;
            Ok(Self::Tcp {
                host: host.to_string(),
                port,
            })
        } else if let Some(path) = endpoint.strip_prefix("ipc://") {
            Ok(Self::Ipc(path.to_string()))
        } else {
            Err(StellwerkError::Config(format!(
                "unsupported endpoint '{endpoint}' (expected tcp:// or ipc://)"
            )))
        }
    }

    /// Generate the ZeroMQ endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(path) => format!("ipc://{path}"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_endpoint() {
        let t = Transport::ipc("control");
        assert_eq!(t.endpoint(), "ipc:///tmp/dirigent/control.sock");
    }

    #[test]
    fn tcp_endpoint() {
        let t = Transport::tcp("127.0.0.1", 5560);
        assert_eq!(t.endpoint(), "tcp://127.0.0.1:5560");
    }

    #[test]
    fn parse_roundtrips() {
        for raw in ["tcp://127.0.0.1:5560", "ipc:///tmp/dirigent/control.sock"] {
            assert_eq!(Transport::parse(raw).unwrap().endpoint(), raw);
        }
        assert!(Transport::parse("http://nope").is_err());
        assert!(Transport::parse("tcp://nohost").is_err());
    }
}
