use askama::Template;
use chrono::NaiveDate;
use tracing::info;

use crate::{
    models::{NarrativeReport, RawScanResult},
    security::{run_command_allowlisted, ALLOWED_TOOLS},
};

/// Everything a report template can reference.
#[derive(Debug, Clone)]
pub struct ReportVariables<'a> {
    pub contact_email: &'a str,
    pub report_id: String,
    pub report_date: NaiveDate,
    pub scan: &'a RawScanResult,
    pub report: &'a NarrativeReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportTemplate {
    SecurityReport,
}

#[derive(Template)]
#[template(path = "report.html")]
struct SecurityReportHtml<'a> {
    report_id: &'a str,
    contact_email: &'a str,
    report_date: String,
    generated_at: String,
    scan: &'a RawScanResult,
    report: &'a NarrativeReport,
}

impl ReportTemplate {
    pub fn name(self) -> &'static str {
        match self {
            Self::SecurityReport => "report.html",
        }
    }

    pub fn to_html(self, vars: &ReportVariables<'_>) -> anyhow::Result<String> {
        match self {
            Self::SecurityReport => Ok(SecurityReportHtml {
                report_id: &vars.report_id,
                contact_email: vars.contact_email,
                report_date: vars.report_date.format("%Y-%m-%d").to_string(),
                generated_at: vars
                    .report
                    .generated_at
                    .format("%Y-%m-%d %H:%M:%S UTC")
                    .to_string(),
                scan: vars.scan,
                report: vars.report,
            }
            .render()?),
        }
    }
}

/// HTML to PDF conversion. An empty result counts as a failed render.
#[async_trait::async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(
        &self,
        template: ReportTemplate,
        vars: &ReportVariables<'_>,
    ) -> anyhow::Result<Vec<u8>>;
}

pub struct WkhtmltopdfRenderer {
    binary: String,
}

impl WkhtmltopdfRenderer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait::async_trait]
impl PdfRenderer for WkhtmltopdfRenderer {
    async fn render(
        &self,
        template: ReportTemplate,
        vars: &ReportVariables<'_>,
    ) -> anyhow::Result<Vec<u8>> {
        let html = template.to_html(vars)?;
        info!(template = template.name(), html_bytes = html.len(), "converting report to PDF");
        let args = vec![
            "--quiet".to_string(),
            "--encoding".to_string(),
            "utf-8".to_string(),
            "-".to_string(),
            "-".to_string(),
        ];
        let pdf =
            run_command_allowlisted(&self.binary, &args, ALLOWED_TOOLS, Some(html.into_bytes()), None)
                .await?;
        info!(pdf_bytes = pdf.len(), "PDF rendered");
        Ok(pdf)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        models::{PortFinding, PortState},
        normalizer::normalize_at,
    };

    #[test]
    fn report_html_contains_sections_and_escapes_model_text() {
        let report = normalize_at(
            r#"{"summary":"<script>alert(1)</script>","vulnerabilities":[{"cve_id":"CVE-2024-1","severity":"High"}]}"#,
            "example.com",
            Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap(),
        );
        let scan = RawScanResult {
            hosts: BTreeMap::from([(
                "93.184.216.34".to_string(),
                vec![PortFinding {
                    port: 443,
                    state: PortState::Open,
                    service_name: "https".into(),
                    product: "nginx".into(),
                    version: "1.25.3".into(),
                }],
            )]),
            error: None,
        };
        let vars = ReportVariables {
            contact_email: "admin@example.com",
            report_id: "PB-20240610120000".into(),
            report_date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            scan: &scan,
            report: &report,
        };

        let html = ReportTemplate::SecurityReport.to_html(&vars).unwrap();
        assert!(html.contains("Security report: example.com"));
        assert!(html.contains("PB-20240610120000"));
        assert!(html.contains("<td>443</td><td>open</td>"));
        assert!(html.contains("CVE-2024-1"));
        assert!(html.contains("No detailed exploitation provided."));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[tokio::test]
    async fn renderer_refuses_unknown_binary() {
        let report = normalize_at("{}", "example.com", Utc::now());
        let scan = RawScanResult::default();
        let vars = ReportVariables {
            contact_email: "admin@example.com",
            report_id: "PB-1".into(),
            report_date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            scan: &scan,
            report: &report,
        };
        let renderer = WkhtmltopdfRenderer::new("/usr/bin/chromium");
        assert!(renderer
            .render(ReportTemplate::SecurityReport, &vars)
            .await
            .is_err());
    }
}
