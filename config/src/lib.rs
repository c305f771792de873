use ::serde_derive::Deserialize;
use ::std::net::SocketAddr;

/// Daemon configuration, usually loaded from `/etc/inputd.conf` (TOML).
/// Every field has a default, so an absent file is a valid configuration.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: Server,
    pub client: Client,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Server {
    /// Address the RPC server binds to.
    pub bind: SocketAddr,
    /// Device name alias filter; empty matches every device.
    pub device_name: String,
    /// Device type filter, e.g. "keyboard,mouse" or "any".
    pub device_types: String,
    /// Device bus filter, e.g. "usb,bluetooth" or "any".
    pub device_bus: String,
    /// Grab opened devices for exclusive access.
    pub exclusive: bool,
    /// Interval between keep-alive events on idle streams, in seconds.
    pub keepalive_secs: u64,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:50051".parse().unwrap(),
            device_name: String::new(),
            device_types: "any".to_owned(),
            device_bus: "any".to_owned(),
            exclusive: true,
            keepalive_secs: 45,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Client {
    /// Address of the input service. May be overridden on the command line.
    pub addr: Option<SocketAddr>,
    /// Deadline for establishing the connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-call timeout for unary calls, in milliseconds. 0 means none.
    pub call_timeout_ms: u64,
}

impl Default for Client {
    fn default() -> Self {
        Self {
            addr: None,
            connect_timeout_ms: 100,
            call_timeout_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Config = ::toml::from_str("").unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:50051".parse().unwrap());
        assert_eq!(cfg.server.device_types, "any");
        assert!(cfg.server.exclusive);
        assert_eq!(cfg.client.connect_timeout_ms, 100);
        assert_eq!(cfg.client.addr, None);
    }

    #[test]
    fn partial_config_overrides() {
        let cfg: Config = ::toml::from_str(
            r#"
            [server]
            bind = "127.0.0.1:9000"
            device_types = "keyboard"
            exclusive = false

            [client]
            addr = "10.0.0.2:50051"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.server.device_types, "keyboard");
        assert!(!cfg.server.exclusive);
        assert_eq!(cfg.server.device_name, "");
        assert_eq!(cfg.client.addr, Some("10.0.0.2:50051".parse().unwrap()));
    }
}
