//! Optional operator configuration, overlaid on the built-in chain specs.
//!
//! ```toml
//! [networks."Litecoin-MAIN"]
//! extra_servers = ["ssl://electrum-ltc.example:50002"]
//!
//! [networks."PirateChain-MAIN"]
//! birthday_height = 2000000
//! ```

use std::collections::HashMap;

use serde::Deserialize;

use crate::provider::Server;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub networks: HashMap<String, NetworkSettings>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct NetworkSettings {
    /// Servers to use in addition to the built-in bootstrap list, as
    /// `tcp://host:port` or `ssl://host:port`.
    #[serde(default)]
    pub extra_servers: Vec<String>,
    /// First block height worth scanning, for backends that require a
    /// bounded block range.
    pub birthday_height: Option<u32>,
}

impl Settings {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Parsed extra servers for a network; entries that don't parse are
    /// dropped with a warning rather than failing startup.
    pub fn extra_servers(&self, net_id: &str) -> Vec<Server> {
        let Some(network) = self.networks.get(net_id) else {
            return Vec::new();
        };

        network
            .extra_servers
            .iter()
            .filter_map(|entry| match Server::parse(entry) {
                Some(server) => Some(server),
                None => {
                    tracing::warn!(net_id, entry, "ignoring unparseable server entry");
                    None
                }
            })
            .collect()
    }

    pub fn birthday_height(&self, net_id: &str) -> Option<u32> {
        self.networks.get(net_id)?.birthday_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ConnectionType;

    #[test]
    fn parses_network_overlays() {
        let settings = Settings::from_toml_str(
            r#"
            [networks."Litecoin-MAIN"]
            extra_servers = ["ssl://ltc.example:50002", "not a url"]

            [networks."PirateChain-MAIN"]
            birthday_height = 2000000
            "#,
        )
        .unwrap();

        let servers = settings.extra_servers("Litecoin-MAIN");
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].connection_type, ConnectionType::Ssl);
        assert_eq!(servers[0].port, 50002);

        assert_eq!(settings.birthday_height("PirateChain-MAIN"), Some(2_000_000));
        assert_eq!(settings.birthday_height("Bitcoin-MAIN"), None);
    }

    #[test]
    fn empty_settings_are_valid() {
        let settings = Settings::from_toml_str("").unwrap();
        assert!(settings.extra_servers("Bitcoin-MAIN").is_empty());
    }
}
