use anyhow::Result;
use blob_store::BlobStoreConfig;
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MirrorMode {
    /// Every call goes straight to the database.
    #[default]
    Off,
    /// In-memory cache, persistent writes complete before calls return.
    Sync,
    /// In-memory cache, persistent writes flushed by a background worker.
    Async,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub mode: MirrorMode,
    /// How long `close()` waits for the async worker to drain its queue
    /// before abandoning pending operations.
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
}

fn default_drain_grace_ms() -> u64 {
    5 * 60 * 1000
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            mode: MirrorMode::default(),
            drain_grace_ms: default_drain_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_sub_index_prefix")]
    pub prefix: String,
    /// Number of sub-indexes. Static: changing it requires a full
    /// reindex, previously-routed documents are not rebalanced.
    #[serde(default = "default_sub_index_count")]
    pub sub_index_count: usize,
    /// Optional alias allow-list; when set, resources with any other
    /// alias fail to route.
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
}

fn default_sub_index_prefix() -> String {
    "index".to_string()
}

fn default_sub_index_count() -> usize {
    1
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            prefix: default_sub_index_prefix(),
            sub_index_count: default_sub_index_count(),
            aliases: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub database: BlobStoreConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
}

impl StoreConfig {
    pub fn from_path(path: &str) -> Result<StoreConfig> {
        let config_str = std::fs::read_to_string(path)?;
        let config: StoreConfig = Figment::new().merge(Yaml::string(&config_str)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        if self.routing.sub_index_count == 0 {
            return Err(anyhow::anyhow!("sub_index_count must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.routing.sub_index_count, 1);
        assert_eq!(config.mirror.drain_grace_ms, 300_000);
        assert_eq!(config.mirror.mode, MirrorMode::Off);
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r#"
database:
  kind: sqlite
  connection_url: "sqlite::memory:"
  lock_timeout_ms: 2000
mirror:
  mode: async
  drain_grace_ms: 0
routing:
  prefix: shard
  sub_index_count: 4
  aliases: ["a", "b"]
"#;
        let config: StoreConfig = Figment::new()
            .merge(Yaml::string(yaml))
            .extract()
            .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.mirror.mode, MirrorMode::Async);
        assert_eq!(config.mirror.drain_grace_ms, 0);
        assert_eq!(config.routing.prefix, "shard");
        assert_eq!(config.routing.sub_index_count, 4);
        assert_eq!(config.database.lock_timeout_ms, 2000);
    }

    #[test]
    fn test_zero_sub_indexes_rejected() {
        let config = StoreConfig {
            routing: RoutingConfig {
                sub_index_count: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
