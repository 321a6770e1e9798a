use anyhow::{anyhow, Context};
use std::net::SocketAddr;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_SITE_URL: &str = "http://localhost:5173";
pub const DEFAULT_BUCKET: &str = "doclink";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub supabase_url: String,
    pub anon_key: String,
    pub service_role_key: Option<String>,
    pub database_url: String,
    pub max_connections: u32,
    pub bind: SocketAddr,
    /// Public origin of the web client, used for email redirect links.
    pub site_url: String,
    pub bucket: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| anyhow!("`{}` must be set", key));

        let bind = get("DOCLINK_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("`DATABASE_MAX_CONNECTIONS` is not a number: {}", raw))?,
            None => 5,
        };

        Ok(Self {
            supabase_url: require("SUPABASE_URL")?.trim_end_matches('/').to_string(),
            anon_key: require("SUPABASE_ANON_KEY")?,
            service_role_key: get("SUPABASE_SERVICE_ROLE_KEY"),
            database_url: require("DATABASE_URL")?,
            max_connections,
            bind: bind
                .parse()
                .with_context(|| format!("`DOCLINK_BIND` is not a socket address: {}", bind))?,
            site_url: get("DOCLINK_SITE_URL")
                .unwrap_or_else(|| DEFAULT_SITE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            bucket: get("DOCLINK_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
        })
    }

    pub fn reset_password_redirect(&self) -> String {
        format!("{}/reset-password", self.site_url)
    }

    pub fn email_callback_redirect(&self) -> String {
        format!("{}/auth/callback", self.site_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("SUPABASE_URL", "https://project.example.co/"),
        ("SUPABASE_ANON_KEY", "anon"),
        ("DATABASE_URL", "postgres://localhost/doclink"),
    ];

    #[test]
    fn defaults_fill_the_optional_values() {
        let config = Config::from_lookup(env(&REQUIRED)).unwrap();
        assert_eq!(config.supabase_url, "https://project.example.co");
        assert_eq!(config.bind, DEFAULT_BIND.parse().unwrap());
        assert_eq!(config.bucket, "doclink");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.service_role_key, None);
        assert_eq!(
            config.reset_password_redirect(),
            "http://localhost:5173/reset-password"
        );
    }

    #[test]
    fn missing_required_value_is_named() {
        let err = Config::from_lookup(env(&REQUIRED[..2])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SUPABASE_SERVICE_ROLE_KEY", "  "));
        let config = Config::from_lookup(env(&pairs)).unwrap();
        assert_eq!(config.service_role_key, None);
    }

    #[test]
    fn bad_bind_address_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("DOCLINK_BIND", "localhost"));
        assert!(Config::from_lookup(env(&pairs)).is_err());
    }
}
