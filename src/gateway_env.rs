//! Process environment, read once at startup (spec.md §6).

use std::time::Duration;

/// Process-wide settings read from the environment (spec.md §6 table).
#[derive(Debug, Clone)]
pub struct GatewayEnv {
    pub region: String,
    pub staging_bucket: String,
    pub metadata_table_prefix: String,
    pub metadata_primary_key: String,
    pub config_sidecar_url: String,
    pub bind_addr: String,
}

impl GatewayEnv {
    pub fn from_env() -> Self {
        Self {
            region: std::env::var("GATEWAY_REGION").unwrap_or_else(|_| "us-east-1".into()),
            staging_bucket: std::env::var("GATEWAY_STAGING_BUCKET").unwrap_or_default(),
            metadata_table_prefix: std::env::var("GATEWAY_METADATA_TABLE_PREFIX").unwrap_or_default(),
            metadata_primary_key: std::env::var("GATEWAY_METADATA_PRIMARY_KEY")
                .unwrap_or_else(|_| "itemId".into()),
            config_sidecar_url: std::env::var("GATEWAY_CONFIG_SIDECAR_URL")
                .unwrap_or_else(|_| "http://localhost:2772".into()),
            bind_addr: std::env::var("GATEWAY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
        }
    }

    /// Name of the key-value table backing a namespace's metadata decorator.
    pub fn kv_table_name(&self, namespace: &str) -> String {
        format!("{}{namespace}", self.metadata_table_prefix)
    }
}

/// TTL applied to the cached configuration document.
pub const CONFIG_TTL: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_table_name_prepends_prefix() {
        let mut env = GatewayEnv::from_env();
        env.metadata_table_prefix = "personalize-metadata-".into();
        assert_eq!(env.kv_table_name("ns1"), "personalize-metadata-ns1");
    }
}
