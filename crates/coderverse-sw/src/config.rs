//! Agent configuration.
//!
//! Everything that used to be a module-level constant in a service worker
//! script (cache name, precache list, trusted origins) lives here and is
//! handed to the agent at construction, so two deployments can run side by
//! side in one process.

use std::path::Path;

use coderverse_net::{same_origin, Url};
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SwError};
use crate::notification::NotificationDefaults;

const DEFAULT_ORIGIN: &str = "https://coderverse.app/";

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Name of the current cache generation.
    pub version: String,

    /// Origin the agent is served from.
    pub origin: Url,

    /// External origins whose requests are intercepted too (CDNs).
    pub allowed_origins: Vec<Url>,

    /// Paths or absolute URLs precached on install, in order.
    pub manifest: Vec<String>,

    /// Same-origin path prefixes whose responses are cached at runtime.
    pub api_prefixes: Vec<String>,

    /// Offline fallback pages for navigations, tried in order.
    pub offline_pages: Vec<String>,

    /// Web app manifest fetched by update checks.
    pub manifest_url: String,

    /// Endpoint fetched by the `content-sync` periodic sync.
    pub content_sync_url: String,

    /// Notification fallbacks for push payloads.
    pub notification: NotificationDefaults,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            version: "coderverse-v1.0.0".to_string(),
            origin: Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid URL"),
            allowed_origins: vec![
                Url::parse("https://cdnjs.cloudflare.com/").expect("CDN origin is a valid URL")
            ],
            manifest: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                "/coderverse.png".to_string(),
                "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css"
                    .to_string(),
                "https://cdnjs.cloudflare.com/ajax/libs/tailwindcss/2.2.19/tailwind.min.css"
                    .to_string(),
            ],
            api_prefixes: vec!["/api/".to_string()],
            offline_pages: vec![
                "/offline.html".to_string(),
                "/index.html".to_string(),
                "/".to_string(),
            ],
            manifest_url: "/manifest.json".to_string(),
            content_sync_url: "/api/sync".to_string(),
            notification: NotificationDefaults::default(),
        }
    }
}

impl AgentConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(SwError::Config("version must not be empty".to_string()));
        }
        if !matches!(self.origin.scheme(), "http" | "https") || !self.origin.has_host() {
            return Err(SwError::Config(format!(
                "origin must be an http(s) URL, got {}",
                self.origin
            )));
        }
        self.manifest_urls()?;
        for page in &self.offline_pages {
            self.resolve(page)?;
        }
        self.resolve(&self.manifest_url)?;
        self.resolve(&self.content_sync_url)?;
        Ok(())
    }

    /// Resolve a path or absolute URL against the agent origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.origin
            .join(path)
            .map_err(|e| SwError::Config(format!("cannot resolve '{path}': {e}")))
    }

    /// Manifest entries as URLs, duplicates removed, order kept.
    pub fn manifest_urls(&self) -> Result<Vec<Url>> {
        let mut seen = HashSet::new();
        let mut urls = Vec::with_capacity(self.manifest.len());
        for entry in &self.manifest {
            let url = self.resolve(entry)?;
            if seen.insert(url.clone()) {
                urls.push(url);
            }
        }
        Ok(urls)
    }

    /// Whether requests to `url` are handled by the agent at all.
    pub fn is_allowed_origin(&self, url: &Url) -> bool {
        same_origin(url, &self.origin)
            || self
                .allowed_origins
                .iter()
                .any(|allowed| same_origin(url, allowed))
    }

    /// Whether `url` is a same-origin API path.
    pub fn is_api_path(&self, url: &Url) -> bool {
        same_origin(url, &self.origin)
            && self
                .api_prefixes
                .iter()
                .any(|prefix| url.path().starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.version, "coderverse-v1.0.0");
    }

    #[test]
    fn test_manifest_urls_dedup_and_resolve() {
        let config = AgentConfig {
            manifest: vec![
                "/".into(),
                "/coderverse.png".into(),
                "/coderverse.png".into(),
                "https://cdnjs.cloudflare.com/x.css".into(),
            ],
            ..Default::default()
        };

        let urls = config.manifest_urls().unwrap();
        let urls: Vec<&str> = urls.iter().map(|u| u.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://coderverse.app/",
                "https://coderverse.app/coderverse.png",
                "https://cdnjs.cloudflare.com/x.css",
            ]
        );
    }

    #[test]
    fn test_allowed_origins() {
        let config = AgentConfig::default();
        let own = Url::parse("https://coderverse.app/lessons/1").unwrap();
        let cdn = Url::parse("https://cdnjs.cloudflare.com/ajax/libs/x.js").unwrap();
        let other = Url::parse("https://analytics.example.com/collect").unwrap();

        assert!(config.is_allowed_origin(&own));
        assert!(config.is_allowed_origin(&cdn));
        assert!(!config.is_allowed_origin(&other));
    }

    #[test]
    fn test_api_path() {
        let config = AgentConfig::default();
        assert!(config.is_api_path(&Url::parse("https://coderverse.app/api/progress").unwrap()));
        assert!(!config.is_api_path(&Url::parse("https://coderverse.app/apiary").unwrap()));
        assert!(!config.is_api_path(&Url::parse("https://cdnjs.cloudflare.com/api/x").unwrap()));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = AgentConfig::from_json_str(
            r#"{"version":"coderverse-v2.0.0","origin":"https://staging.coderverse.app/"}"#,
        )
        .unwrap();

        assert_eq!(config.version, "coderverse-v2.0.0");
        assert_eq!(config.origin.as_str(), "https://staging.coderverse.app/");
        assert_eq!(config.manifest_url, "/manifest.json");
        assert_eq!(config.notification.title, "CoderVerse");
    }

    #[test]
    fn test_empty_version_is_rejected() {
        assert!(matches!(
            AgentConfig::from_json_str(r#"{"version":"  "}"#),
            Err(SwError::Config(_))
        ));
    }

    #[test]
    fn test_non_http_origin_is_rejected() {
        assert!(matches!(
            AgentConfig::from_json_str(r#"{"origin":"file:///tmp/app/"}"#),
            Err(SwError::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            AgentConfig::load("/nonexistent/coderverse-sw.json"),
            Err(SwError::Io(_))
        ));
    }
}
