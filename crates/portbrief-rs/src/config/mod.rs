use std::{env, fs, path::PathBuf, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerBackend {
    Nmap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerBackend {
    Gemini,
}

impl std::str::FromStr for ScannerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nmap" => Ok(Self::Nmap),
            other => anyhow::bail!("unsupported scanner backend: {other}"),
        }
    }
}

impl std::str::FromStr for AnalyzerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            other => anyhow::bail!("unsupported analyzer backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Root directory of the PDF object store.
    pub object_store_root: PathBuf,
    /// Where metadata records land when the database is unreachable.
    pub fallback_dir: PathBuf,
    pub freshness_window_hours: i64,
    pub scope_allowlist: Vec<String>,

    pub scanner: ScannerBackend,
    pub nmap_path: String,
    pub nmap_ports: String,

    pub analyzer: AnalyzerBackend,
    pub gemini_endpoint: String,
    pub gemini_model: String,
    pub gemini_api_key: String,
    pub analyzer_timeout_secs: u64,

    pub wkhtmltopdf_path: String,

    pub sendmail_path: String,
    pub email_from: String,
    pub email_sender_name: String,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = env::var("PORTBRIEF_CONFIG").unwrap_or_else(|_| "config.json".to_string());
        let file_cfg: Option<AppConfig> = fs::read_to_string(&path)
            .ok()
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .with_context(|| format!("failed to parse {path}"))?;

        let mut cfg = file_cfg.unwrap_or_default();
        cfg.apply_env(|key| env::var(key).ok())?;
        cfg.freshness_window()?;
        Ok(cfg)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = var("PB_HOST") {
            self.host = v;
        }
        if let Some(v) = var("PB_PORT") {
            self.port = v.parse().unwrap_or(self.port);
        }
        if let Some(v) = var("PB_DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = var("PB_OBJECT_STORE_ROOT") {
            self.object_store_root = v.into();
        }
        if let Some(v) = var("PB_FALLBACK_DIR") {
            self.fallback_dir = v.into();
        }
        if let Some(v) = var("PB_FRESHNESS_WINDOW_HOURS") {
            self.freshness_window_hours = v.parse().unwrap_or(self.freshness_window_hours);
        }
        if let Some(v) = var("PB_SCOPE_ALLOWLIST") {
            self.scope_allowlist = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = var("PB_SCANNER") {
            self.scanner = v.parse()?;
        }
        if let Some(v) = var("PB_NMAP_PATH") {
            self.nmap_path = v;
        }
        if let Some(v) = var("PB_NMAP_PORTS") {
            self.nmap_ports = v;
        }
        if let Some(v) = var("PB_ANALYZER") {
            self.analyzer = v.parse()?;
        }
        if let Some(v) = var("PB_GEMINI_ENDPOINT") {
            self.gemini_endpoint = v;
        }
        if let Some(v) = var("PB_GEMINI_MODEL") {
            self.gemini_model = v;
        }
        if let Some(v) = var("GEMINI_API_KEY").or_else(|| var("PB_GEMINI_API_KEY")) {
            self.gemini_api_key = v;
        }
        if let Some(v) = var("PB_ANALYZER_TIMEOUT_SECS") {
            self.analyzer_timeout_secs = v.parse().unwrap_or(self.analyzer_timeout_secs);
        }
        if let Some(v) = var("PB_WKHTMLTOPDF_PATH") {
            self.wkhtmltopdf_path = v;
        }
        if let Some(v) = var("PB_SENDMAIL_PATH") {
            self.sendmail_path = v;
        }
        if let Some(v) = var("PB_EMAIL_FROM") {
            self.email_from = v;
        }
        if let Some(v) = var("PB_EMAIL_SENDER_NAME") {
            self.email_sender_name = v;
        }
        Ok(())
    }

    pub fn freshness_window(&self) -> anyhow::Result<chrono::Duration> {
        if self.freshness_window_hours < 0 {
            anyhow::bail!(
                "freshness window must not be negative: {}h",
                self.freshness_window_hours
            );
        }
        chrono::Duration::try_hours(self.freshness_window_hours).with_context(|| {
            format!(
                "freshness window out of range: {}h",
                self.freshness_window_hours
            )
        })
    }

    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs(self.analyzer_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database_url: "sqlite://portbrief.db".to_string(),
            object_store_root: PathBuf::from("storage"),
            fallback_dir: PathBuf::from("reports"),
            freshness_window_hours: 24,
            scope_allowlist: vec![],
            scanner: ScannerBackend::Nmap,
            nmap_path: "nmap".to_string(),
            nmap_ports: "1-1024".to_string(),
            analyzer: AnalyzerBackend::Gemini,
            gemini_endpoint: "https://generativelanguage.googleapis.com".to_string(),
            gemini_model: "gemini-2.0-flash".to_string(),
            gemini_api_key: String::new(),
            analyzer_timeout_secs: 400,
            wkhtmltopdf_path: "wkhtmltopdf".to_string(),
            sendmail_path: "/usr/sbin/sendmail".to_string(),
            email_from: "noreply@portbrief.local".to_string(),
            email_sender_name: "PortBrief".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: AppConfig = serde_json::from_str(r#"{"port": 9000, "scanner": "nmap"}"#).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.freshness_window_hours, 24);
        assert_eq!(cfg.nmap_ports, "1-1024");
    }

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PB_PORT", "9100"),
            ("PB_FRESHNESS_WINDOW_HOURS", "6"),
            ("PB_SCOPE_ALLOWLIST", "example.com, *.corp.test,"),
            ("GEMINI_API_KEY", "secret"),
        ]);
        let mut cfg = AppConfig::default();
        cfg.apply_env(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.freshness_window().unwrap(), chrono::Duration::hours(6));
        assert_eq!(cfg.scope_allowlist, vec!["example.com", "*.corp.test"]);
        assert_eq!(cfg.gemini_api_key, "secret");
    }

    #[test]
    fn out_of_range_freshness_window_is_an_error() {
        for hours in [i64::MAX, -1] {
            let cfg = AppConfig {
                freshness_window_hours: hours,
                ..AppConfig::default()
            };
            assert!(cfg.freshness_window().is_err(), "{hours}");
        }
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut cfg = AppConfig::default();
        let err = cfg
            .apply_env(|k| (k == "PB_ANALYZER").then(|| "openai".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("unsupported analyzer backend"));
    }
}
