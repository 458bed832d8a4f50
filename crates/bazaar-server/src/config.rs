use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub media_dir: PathBuf,
    pub jwt_secret: String,
    pub access_token_minutes: i64,
    pub refresh_token_hours: i64,
    pub cache_ttl: Duration,
    pub public_url: Option<String>,
    /// `(username, password)` of a staff account ensured at startup.
    pub bootstrap_admin: Option<(String, String)>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("BAZAAR_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("BAZAAR_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let bootstrap_admin = match get("BAZAAR_BOOTSTRAP_ADMIN").filter(|v| !v.is_empty()) {
            Some(value) => {
                let (user, pass) = value
                    .split_once(':')
                    .filter(|(u, p)| !u.is_empty() && !p.is_empty())
                    .context("BAZAAR_BOOTSTRAP_ADMIN must look like username:password")?;
                Some((user.to_string(), pass.to_string()))
            }
            None => None,
        };

        Ok(Self {
            host: get("BAZAAR_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "BAZAAR_PORT", 8000)?,
            db_path: get("BAZAAR_DB_PATH").unwrap_or_else(|| "bazaar.db".into()).into(),
            media_dir: get("BAZAAR_MEDIA_DIR").unwrap_or_else(|| "./media".into()).into(),
            jwt_secret,
            access_token_minutes: parse_or(&get, "BAZAAR_ACCESS_TOKEN_MINUTES", 5)?,
            refresh_token_hours: parse_or(&get, "BAZAAR_REFRESH_TOKEN_HOURS", 24)?,
            cache_ttl: Duration::from_secs(parse_or(&get, "BAZAAR_CACHE_TTL_SECS", 60)?),
            public_url: get("BAZAAR_PUBLIC_URL").filter(|v| !v.is_empty()),
            bootstrap_admin,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw.parse().with_context(|| format!("invalid value for {}", key)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("BAZAAR_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.db_path, PathBuf::from("bazaar.db"));
        assert_eq!(config.access_token_minutes, 5);
        assert_eq!(config.refresh_token_hours, 24);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert!(config.public_url.is_none());
        assert!(config.bootstrap_admin.is_none());
    }

    #[test]
    fn placeholder_secret_is_refused() {
        assert!(load(&[]).is_err());
        assert!(load(&[("BAZAAR_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn bad_numbers_are_errors() {
        assert!(load(&[("BAZAAR_JWT_SECRET", "x1"), ("BAZAAR_PORT", "http")]).is_err());
    }

    #[test]
    fn bootstrap_admin_is_parsed() {
        let config = load(&[
            ("BAZAAR_JWT_SECRET", "x1"),
            ("BAZAAR_BOOTSTRAP_ADMIN", "root:pa:ss"),
        ])
        .unwrap();
        assert_eq!(config.bootstrap_admin, Some(("root".into(), "pa:ss".into())));

        assert!(load(&[("BAZAAR_JWT_SECRET", "x1"), ("BAZAAR_BOOTSTRAP_ADMIN", "root")]).is_err());
    }
}
