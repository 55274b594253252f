//! Shared data types for the ingestion core (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared file kind at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Pdf,
    Doc,
    Docx,
    Xls,
    Xlsx,
    Csv,
    Jpg,
    Jpeg,
    Png,
    Tiff,
    Bmp,
}

impl Kind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "doc" => Some(Self::Doc),
            "docx" => Some(Self::Docx),
            "xls" => Some(Self::Xls),
            "xlsx" => Some(Self::Xlsx),
            "csv" => Some(Self::Csv),
            "jpg" => Some(Self::Jpg),
            "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "tiff" => Some(Self::Tiff),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    pub fn is_image(self) -> bool {
        matches!(
            self,
            Self::Jpg | Self::Jpeg | Self::Png | Self::Tiff | Self::Bmp
        )
    }
}

/// Content-addressed, immutable reference to an uploaded blob (spec §3, §9).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    /// Hex-encoded BLAKE3 digest of the blob content.
    pub content_hash: String,
    /// Opaque storage locator (e.g. a relative path under the blob root).
    pub locator: String,
}

/// Lifecycle state of a Job (spec §3, invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Dead)
    }
}

/// A durable job record (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub tenant_id: String,
    pub blob: BlobRef,
    pub kind: Kind,
    pub priority: i32,
    pub state: JobState,
    pub progress: u8,
    pub stage: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub submitted_at: DateTime<Utc>,
    pub first_started_at: Option<DateTime<Utc>>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub result: Option<CanonicalRecord>,
    pub error: Option<JobError>,
}

/// Error payload attached to a terminally-failed or dead job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

/// Output of a single Parser invocation (spec §3, §4.1).
#[derive(Debug, Clone)]
pub struct ParserOutput {
    pub raw_text: String,
    pub fragments: Vec<Fragment>,
    /// Parser-reported confidence in [0, 1].
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct Fragment {
    pub name: String,
    pub text: String,
    pub confidence: f32,
}

/// Canonical record produced by the Field-extract stage (spec §4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub property: Property,
    pub inspector: Inspector,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Property {
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub property_type: Option<String>,
    pub size_sqft: Option<u32>,
    pub year_built: Option<u32>,
    pub beds: Option<u32>,
    pub baths: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inspector {
    pub name: Option<String>,
    pub license: Option<String>,
    pub company: Option<String>,
    pub contact: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    Informational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Electrical,
    Plumbing,
    Structural,
    Hvac,
    Roofing,
    Interior,
    Exterior,
    Safety,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub category: Category,
    pub severity: Severity,
    pub description: String,
    pub location: Option<String>,
    pub recommendation: Option<String>,
    pub estimated_cost: Option<f64>,
}

/// Summary returned by the job-state-query interface (spec §6, SPEC_FULL
/// "Supplemented features").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub findings_count: usize,
    pub by_severity: SeverityBreakdown,
    pub estimated_cost_sum: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeverityBreakdown {
    pub critical: usize,
    pub major: usize,
    pub minor: usize,
    pub informational: usize,
}

impl ResultSummary {
    pub fn from_record(record: &CanonicalRecord) -> Self {
        let mut by_severity = SeverityBreakdown::default();
        let mut estimated_cost_sum = 0.0;
        for finding in &record.findings {
            match finding.severity {
                Severity::Critical => by_severity.critical += 1,
                Severity::Major => by_severity.major += 1,
                Severity::Minor => by_severity.minor += 1,
                Severity::Informational => by_severity.informational += 1,
            }
            estimated_cost_sum += finding.estimated_cost.unwrap_or(0.0);
        }
        Self {
            findings_count: record.findings.len(),
            by_severity,
            estimated_cost_sum,
        }
    }
}

/// Subscriber tier, determines Rate Limiter quotas (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

/// Rate limiter bucket names (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Api,
    Files,
    Webhook,
    Admin,
}
