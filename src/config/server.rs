//! Listener settings read from environment variables.
//!
//! Environment values win over config.toml so a deployment can move the service
//! without editing the file.

use super::settings::ServerConfig;

/// Resolves the address to bind, preferring `BIND_ADDRESS` over the config file.
#[must_use]
pub fn resolve_bind_address(server: &ServerConfig) -> String {
    bind_address_from(std::env::var("BIND_ADDRESS").ok(), server)
}

fn bind_address_from(env_value: Option<String>, server: &ServerConfig) -> String {
    env_value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| server.bind_address.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_value_overrides_config() {
        let server = ServerConfig::default();
        let addr = bind_address_from(Some("127.0.0.1:3000".to_string()), &server);
        assert_eq!(addr, "127.0.0.1:3000");
    }

    #[test]
    fn test_blank_env_value_falls_back_to_config() {
        let server = ServerConfig {
            bind_address: "127.0.0.1:8081".to_string(),
        };
        assert_eq!(bind_address_from(Some("  ".to_string()), &server), "127.0.0.1:8081");
        assert_eq!(bind_address_from(None, &server), "127.0.0.1:8081");
    }
}
