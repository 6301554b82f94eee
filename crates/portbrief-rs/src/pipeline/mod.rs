//! Scan-report delivery pipeline.
//!
//! One call to [`ScanPipeline::perform_scan`] walks
//! `Start -> CacheCheck -> (Reuse | Generate) -> Delivered`, dropping into
//! `Error` from any state. Steps run strictly in order and the email is
//! attempted at most once.

use std::{fmt, path::PathBuf, sync::Arc};

use chrono::{DateTime, SubsecRound, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    adapters::Scanner,
    analyzer::NarrativeAnalyzer,
    freshness::{report_key, FreshnessCache},
    mail::{compose_report_email, Mailer, OutgoingEmail, ReportNotice},
    models::{
        NarrativeReport, RawScanResult, ReportMetadataRecord, ScanOutcome, ScanRequest,
        StoredArtifact,
    },
    normalizer::normalize,
    render::{PdfRenderer, ReportTemplate, ReportVariables},
    store::{write_local_record, MetadataStore, ObjectStore, StoreAvailability},
};

/// Closed set of failures a caller can observe.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("scan failed: {0}")]
    Scan(String),
    #[error("analysis failed: {0}")]
    Analysis(String),
    #[error("report generation failed: {0}")]
    Report(String),
    #[error("email delivery failed: {0}")]
    Email(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scan(_) => "scan_error",
            Self::Analysis(_) => "analysis_error",
            Self::Report(_) => "report_error",
            Self::Email(_) => "email_error",
        }
    }

    fn unexpected(err: anyhow::Error) -> Self {
        Self::Report(format!("unexpected failure: {err:#}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    CacheCheck,
    Reuse,
    Generate,
    Delivered,
    Error,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::CacheCheck => "cache_check",
            Self::Reuse => "reuse",
            Self::Generate => "generate",
            Self::Delivered => "delivered",
            Self::Error => "error",
        })
    }
}

struct StateTracker<'a> {
    domain: &'a str,
    current: PipelineState,
}

impl<'a> StateTracker<'a> {
    fn new(domain: &'a str) -> Self {
        Self {
            domain,
            current: PipelineState::Start,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        info!(domain = self.domain, from = %self.current, to = %next, "pipeline transition");
        self.current = next;
    }
}

/// The collaborators the pipeline drives.
#[derive(Clone)]
pub struct PipelineDeps {
    pub scanner: Arc<dyn Scanner>,
    pub analyzer: Arc<dyn NarrativeAnalyzer>,
    pub objects: Arc<dyn ObjectStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub renderer: Arc<dyn PdfRenderer>,
    pub mailer: Arc<dyn Mailer>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub freshness_window: chrono::Duration,
    pub fallback_dir: PathBuf,
}

pub struct ScanPipeline {
    deps: PipelineDeps,
    cache: FreshnessCache,
    availability: StoreAvailability,
    settings: PipelineSettings,
}

impl ScanPipeline {
    pub fn new(
        deps: PipelineDeps,
        availability: StoreAvailability,
        settings: PipelineSettings,
    ) -> Self {
        let cache = FreshnessCache::new(deps.objects.clone(), availability);
        Self {
            deps,
            cache,
            availability,
            settings,
        }
    }

    pub async fn perform_scan(&self, request: &ScanRequest) -> Result<ScanOutcome, PipelineError> {
        let mut state = StateTracker::new(&request.domain);
        let result = self.run(request, &mut state).await;
        match &result {
            Ok(outcome) => {
                state.advance(PipelineState::Delivered);
                info!(domain = %request.domain, reused = outcome.reused, "scan request completed");
            }
            Err(e) => {
                let failed_in = state.current;
                state.advance(PipelineState::Error);
                error!(
                    domain = %request.domain,
                    kind = e.kind(),
                    state = %failed_in,
                    error = %e,
                    "scan request failed"
                );
            }
        }
        result
    }

    async fn run(
        &self,
        request: &ScanRequest,
        state: &mut StateTracker<'_>,
    ) -> Result<ScanOutcome, PipelineError> {
        state.advance(PipelineState::CacheCheck);
        let fresh = self
            .cache
            .find_recent(&request.domain, self.settings.freshness_window)
            .await;

        match fresh {
            Some(artifact) => {
                state.advance(PipelineState::Reuse);
                self.reuse(request, &artifact).await
            }
            None => {
                state.advance(PipelineState::Generate);
                self.generate(request).await
            }
        }
    }

    async fn reuse(
        &self,
        request: &ScanRequest,
        artifact: &StoredArtifact,
    ) -> Result<ScanOutcome, PipelineError> {
        info!(domain = %request.domain, key = %artifact.storage_key, "reusing stored report");
        let pdf = self
            .deps
            .objects
            .get(&artifact.storage_key)
            .await
            .map_err(PipelineError::unexpected)?;

        let email = compose_report_email(
            ReportNotice::Reused,
            &request.domain,
            &request.contact_email,
            pdf,
            artifact.filename(),
        )
        .map_err(PipelineError::unexpected)?;
        self.deliver(&email).await?;

        Ok(ScanOutcome {
            domain: request.domain.clone(),
            email: request.contact_email.clone(),
            reused: true,
            scan_result: None,
            security_report: None,
        })
    }

    async fn generate(&self, request: &ScanRequest) -> Result<ScanOutcome, PipelineError> {
        let domain = request.domain.as_str();

        let scan = self.scan(domain).await?;

        let raw_text = self
            .deps
            .analyzer
            .analyze(domain, &scan)
            .await
            .map_err(|e| PipelineError::Analysis(format!("{e:#}")))?;
        let report = normalize(&raw_text, domain);

        let generated_at = report.generated_at;
        self.record_metadata(request, generated_at).await;

        let pdf = self.render(request, &scan, &report).await?;

        let key = report_key(domain, generated_at);
        self.store_pdf(&key, &pdf).await;

        let filename = key.rsplit('/').next().unwrap_or(&key).to_string();
        let email = compose_report_email(
            ReportNotice::Fresh { generated_at },
            domain,
            &request.contact_email,
            pdf,
            &filename,
        )
        .map_err(PipelineError::unexpected)?;
        self.deliver(&email).await?;

        Ok(ScanOutcome {
            domain: request.domain.clone(),
            email: request.contact_email.clone(),
            reused: false,
            scan_result: Some(scan),
            security_report: Some(report),
        })
    }

    async fn scan(&self, domain: &str) -> Result<RawScanResult, PipelineError> {
        let scan = self
            .deps
            .scanner
            .scan(domain)
            .await
            .map_err(|e| PipelineError::Scan(format!("{e:#}")))?;
        if let Some(reason) = &scan.error {
            return Err(PipelineError::Scan(reason.clone()));
        }
        Ok(scan)
    }

    /// Best effort: metadata trouble never fails the request.
    async fn record_metadata(&self, request: &ScanRequest, created_at: DateTime<Utc>) {
        let record = ReportMetadataRecord {
            domain: request.domain.clone(),
            email: request.contact_email.clone(),
            created_at: created_at.trunc_subsecs(0),
        };

        if self.availability.is_available() {
            match self.deps.metadata.put_item(&record).await {
                Ok(()) => {
                    info!(domain = %record.domain, "report metadata stored");
                    return;
                }
                Err(e) => {
                    error!(domain = %record.domain, error = %e, "metadata store failed, using local fallback");
                }
            }
        }

        match write_local_record(&self.settings.fallback_dir, &record).await {
            Ok(path) => info!(path = %path.display(), "report metadata written locally"),
            Err(e) => error!(domain = %record.domain, error = %e, "local metadata fallback failed"),
        }
    }

    async fn render(
        &self,
        request: &ScanRequest,
        scan: &RawScanResult,
        report: &NarrativeReport,
    ) -> Result<Vec<u8>, PipelineError> {
        let vars = ReportVariables {
            contact_email: &request.contact_email,
            report_id: format!("PB-{}", report.generated_at.format("%Y%m%d%H%M%S")),
            report_date: report.generated_at.date_naive(),
            scan,
            report,
        };
        let pdf = self
            .deps
            .renderer
            .render(ReportTemplate::SecurityReport, &vars)
            .await
            .map_err(|e| PipelineError::Report(format!("PDF rendering failed: {e:#}")))?;
        if pdf.is_empty() {
            return Err(PipelineError::Report("renderer produced no output".into()));
        }
        Ok(pdf)
    }

    /// Best effort: the in-memory PDF is still delivered when storing fails.
    async fn store_pdf(&self, key: &str, pdf: &[u8]) {
        if !self.availability.is_available() {
            warn!(key, "store unavailable, report not persisted");
            return;
        }
        match self.deps.objects.put(key, pdf, "application/pdf").await {
            Ok(()) => info!(key, "report stored"),
            Err(e) => error!(key, error = %e, "failed to store report"),
        }
    }

    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), PipelineError> {
        self.deps
            .mailer
            .send(email)
            .await
            .map_err(|e| PipelineError::Email(format!("could not email {}: {e:#}", email.recipient)))
    }
}
