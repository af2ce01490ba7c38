//! Export types

use serde::{Deserialize, Serialize};

/// Output format of an export bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// ZIP archive of raw EML files
    Eml,
    /// ZIP archive of EML files plus Outlook import instructions
    Pst,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "eml" => Some(Self::Eml),
            "pst" => Some(Self::Pst),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eml => "eml",
            Self::Pst => "pst",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ExportStatus {
    pub fn from_str(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportRequest {
    pub user_id: String,
    pub format: ExportFormat,
    /// Inclusive RFC 3339 lower bound on message date
    pub start_date: Option<String>,
    /// Inclusive RFC 3339 upper bound on message date
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportJob {
    pub id: String,
    pub user_id: String,
    pub filename: String,
    pub format: ExportFormat,
    pub status: ExportStatus,
    pub progress: i64,
    pub total_messages: i64,
    pub exported_messages: i64,
    pub file_size: Option<i64>,
    pub error: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
    /// Rough duration estimate derived from the message count
    pub estimated_minutes: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportStats {
    pub total_jobs: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub messages_exported: i64,
    pub bytes_exported: i64,
}
