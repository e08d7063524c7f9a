use super::EtlConfig;
use std::path::PathBuf;

/// Apply environment variable overrides on top of file/default config.
pub fn apply_env_overrides(config: &mut EtlConfig) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary key lookup. Unparseable values are ignored.
pub fn apply_overrides<F>(config: &mut EtlConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("CRATE_URL") {
        config.source.url = v;
    }
    if let Some(v) = lookup("ORION_URL") {
        config.broker.url = v;
    }
    if let Some(v) = lookup("ETL_SINK_PATH") {
        config.sink.path = PathBuf::from(v);
    }
    if let Some(v) = lookup("ETL_API_PORT") {
        if let Ok(port) = v.parse::<u16>() {
            config.api.port = port;
        }
    }
    if let Some(v) = lookup("GATEWAY_TOKEN") {
        if !v.is_empty() {
            config.gateway.token = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides_replace_urls() {
        let mut config = EtlConfig::default();
        apply_overrides(
            &mut config,
            lookup_from(&[
                ("CRATE_URL", "http://localhost:4200"),
                ("ORION_URL", "http://localhost:1026"),
                ("ETL_SINK_PATH", "/data/docs.db"),
            ]),
        );
        assert_eq!(config.source.url, "http://localhost:4200");
        assert_eq!(config.broker.url, "http://localhost:1026");
        assert_eq!(config.sink.path, PathBuf::from("/data/docs.db"));
    }

    #[test]
    fn test_invalid_port_is_ignored() {
        let mut config = EtlConfig::default();
        apply_overrides(&mut config, lookup_from(&[("ETL_API_PORT", "eighty")]));
        assert_eq!(config.api.port, 8080);
    }

    #[test]
    fn test_empty_gateway_token_keeps_gateway_disabled() {
        let mut config = EtlConfig::default();
        apply_overrides(&mut config, lookup_from(&[("GATEWAY_TOKEN", "")]));
        assert!(config.gateway.token.is_none());

        apply_overrides(&mut config, lookup_from(&[("GATEWAY_TOKEN", "secreto")]));
        assert_eq!(config.gateway.token.as_deref(), Some("secreto"));
    }
}
