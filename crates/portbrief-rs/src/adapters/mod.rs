use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::{
    config::{AppConfig, ScannerBackend},
    models::RawScanResult,
    parser::parse_nmap_xml,
    security::{run_command_allowlisted, ALLOWED_TOOLS},
};

/// Port-scan capability. One implementation per scanning tool.
#[async_trait::async_trait]
pub trait Scanner: Send + Sync {
    fn name(&self) -> &'static str;
    async fn scan(&self, domain: &str) -> anyhow::Result<RawScanResult>;
}

pub struct NmapScanner {
    binary: String,
    ports: String,
}

impl NmapScanner {
    pub fn new(binary: impl Into<String>, ports: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            ports: ports.into(),
        }
    }

    fn args(&self, domain: &str) -> Vec<String> {
        vec![
            "-sV".to_string(),
            "-p".to_string(),
            self.ports.clone(),
            "-oX".to_string(),
            "-".to_string(),
            domain.to_string(),
        ]
    }
}

#[async_trait::async_trait]
impl Scanner for NmapScanner {
    fn name(&self) -> &'static str {
        "nmap"
    }

    async fn scan(&self, domain: &str) -> anyhow::Result<RawScanResult> {
        info!(domain, ports = %self.ports, "starting port scan");
        let stdout =
            run_command_allowlisted(&self.binary, &self.args(domain), ALLOWED_TOOLS, None, None)
                .await?;
        let xml = String::from_utf8_lossy(&stdout);
        let result = parse_nmap_xml(&xml).context("unreadable nmap output")?;
        info!(domain, hosts = result.hosts.len(), open = result.open_ports(), "port scan finished");
        Ok(result)
    }
}

pub fn build_scanner(cfg: &AppConfig) -> Arc<dyn Scanner> {
    match cfg.scanner {
        ScannerBackend::Nmap => Arc::new(NmapScanner::new(&cfg.nmap_path, &cfg.nmap_ports)),
    }
}
