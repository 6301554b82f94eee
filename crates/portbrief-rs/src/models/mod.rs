use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub domain: String,
    #[serde(rename = "email")]
    pub contact_email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortState {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "closed")]
    Closed,
    #[serde(rename = "filtered")]
    Filtered,
    #[serde(rename = "unfiltered")]
    Unfiltered,
    #[serde(rename = "open|filtered")]
    OpenFiltered,
    #[serde(rename = "closed|filtered")]
    ClosedFiltered,
    #[serde(rename = "unknown")]
    Unknown,
}

impl PortState {
    pub fn from_nmap(state: &str) -> Self {
        match state {
            "open" => Self::Open,
            "closed" => Self::Closed,
            "filtered" => Self::Filtered,
            "unfiltered" => Self::Unfiltered,
            "open|filtered" => Self::OpenFiltered,
            "closed|filtered" => Self::ClosedFiltered,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Filtered => "filtered",
            Self::Unfiltered => "unfiltered",
            Self::OpenFiltered => "open|filtered",
            Self::ClosedFiltered => "closed|filtered",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortFinding {
    pub port: u16,
    pub state: PortState,
    #[serde(rename = "service")]
    pub service_name: String,
    pub product: String,
    pub version: String,
}

/// Port-scan output keyed by host address. Hosts iterate in address order,
/// ports ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawScanResult {
    pub hosts: BTreeMap<String, Vec<PortFinding>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RawScanResult {
    pub fn open_ports(&self) -> usize {
        self.hosts
            .values()
            .flatten()
            .filter(|p| p.state == PortState::Open)
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodologyStep {
    pub title: String,
    pub description: String,
    pub evidence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub cve_id: String,
    pub severity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenetrationFinding {
    pub vulnerability_exploited: String,
    pub system_vulnerable: String,
    pub description: String,
    pub severity: String,
    pub proof_of_concept: String,
}

/// Canonical report produced by the normalizer. Every field is always
/// present, whatever shape the model output had.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeReport {
    pub domain: String,
    pub generated_at: DateTime<Utc>,
    pub summary: String,
    pub objective: String,
    pub requirements: Vec<String>,
    pub recommendations: Vec<String>,
    pub methodology: Vec<MethodologyStep>,
    pub vulnerabilities: Vec<Vulnerability>,
    pub penetration: Vec<PenetrationFinding>,
    pub table_of_contents: Vec<String>,
    pub high_level_summary: String,
    pub maintaining_access: String,
    pub house_cleaning: String,
    pub additional_notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredArtifact {
    pub domain: String,
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
}

impl StoredArtifact {
    pub fn filename(&self) -> &str {
        self.storage_key
            .rsplit('/')
            .next()
            .unwrap_or(&self.storage_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReportMetadataRecord {
    pub domain: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub domain: String,
    pub email: String,
    pub reused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_result: Option<RawScanResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_report: Option<NarrativeReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_state_round_trips_nmap_spelling() {
        for raw in ["open", "closed", "filtered", "open|filtered"] {
            assert_eq!(PortState::from_nmap(raw).as_str(), raw);
        }
        assert_eq!(PortState::from_nmap("weird"), PortState::Unknown);
    }

    #[test]
    fn artifact_filename_is_last_key_segment() {
        let artifact = StoredArtifact {
            domain: "example.com".into(),
            storage_key: "reports/example.com/report_example.com_20240101000000.pdf".into(),
            created_at: Utc::now(),
        };
        assert_eq!(artifact.filename(), "report_example.com_20240101000000.pdf");
    }

    #[test]
    fn outcome_omits_absent_payloads() {
        let outcome = ScanOutcome {
            domain: "example.com".into(),
            email: "a@example.com".into(),
            reused: true,
            scan_result: None,
            security_report: None,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"domain": "example.com", "email": "a@example.com", "reused": true})
        );
    }
}
