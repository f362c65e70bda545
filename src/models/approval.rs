use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an approval request.
///
/// `Pending` is the only non-terminal state. Once a request leaves `Pending`
/// it never transitions again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            "timeout" => Ok(ApprovalStatus::Timeout),
            other => Err(format!("unknown approval status '{}'", other)),
        }
    }
}

/// Terminal decision applied to a pending request.
///
/// Distinct from [`ApprovalStatus`] so a resolve call can never name
/// `pending` as its target state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Approved,
    Rejected,
    Timeout,
}

impl Outcome {
    pub fn status(&self) -> ApprovalStatus {
        match self {
            Outcome::Approved => ApprovalStatus::Approved,
            Outcome::Rejected => ApprovalStatus::Rejected,
            Outcome::Timeout => ApprovalStatus::Timeout,
        }
    }

    /// Parse a human-supplied decision string ("approved"/"approve"/...).
    /// Timeouts are system-only and never parse.
    pub fn parse_decision(s: &str) -> Option<Outcome> {
        match s.to_lowercase().as_str() {
            "approved" | "approve" => Some(Outcome::Approved),
            "rejected" | "reject" => Some(Outcome::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.status().as_str())
    }
}

/// Who made a terminal decision, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub operator: String,
    pub operator_role: Option<String>,
    pub comment: Option<String>,
}

impl Decision {
    /// Decision stamped on timer-driven transitions.
    pub fn system(comment: &str) -> Self {
        Self {
            operator: "system".to_string(),
            operator_role: Some("system".to_string()),
            comment: Some(comment.to_string()),
        }
    }
}

/// A deployment awaiting (or past) a gate decision.
///
/// Descriptive metadata is immutable after creation; only `status`,
/// `updated_at` and the decision fields (`approver`, `approver_role`,
/// `comment`) change, exactly once, on the transition out of `pending`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApprovalRequest {
    pub request_id: String,
    pub project: String,
    pub env: String,
    pub build: String,
    pub job: String,
    pub version: String,
    pub description: String,
    pub action: String,
    pub timeout_seconds: i64,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approver: Option<String>,
    pub approver_role: Option<String>,
    pub comment: Option<String>,
}

impl ApprovalRequest {
    /// Moment at which an unresolved request times out.
    pub fn deadline(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.timeout_seconds)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now > self.deadline()
    }
}

/// Caller-supplied fields for a new approval request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApprovalSpec {
    /// Optional explicit id; derived as `{job}-{build}-{env}` when absent.
    pub request_id: Option<String>,
    pub project: String,
    pub env: String,
    pub build: String,
    pub job: String,
    pub version: String,
    pub description: Option<String>,
    pub action: Option<String>,
    pub timeout_seconds: Option<i64>,
}

/// One immutable audit fact about a request's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApprovalHistoryEntry {
    pub id: i64,
    pub request_id: String,
    pub action: HistoryAction,
    pub operator: String,
    pub operator_role: Option<String>,
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum HistoryAction {
    Created,
    Approved,
    Rejected,
    Timeout,
}

impl From<Outcome> for HistoryAction {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Approved => HistoryAction::Approved,
            Outcome::Rejected => HistoryAction::Rejected,
            Outcome::Timeout => HistoryAction::Timeout,
        }
    }
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::Approved => "approved",
            HistoryAction::Rejected => "rejected",
            HistoryAction::Timeout => "timeout",
        }
    }
}

/// Optional predicates for listing requests. All present fields must match.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApprovalFilter {
    pub project: Option<String>,
    pub env: Option<String>,
    pub status: Option<ApprovalStatus>,
}

impl ApprovalFilter {
    pub fn matches(&self, request: &ApprovalRequest) -> bool {
        self.project.as_deref().map_or(true, |p| p == request.project)
            && self.env.as_deref().map_or(true, |e| e == request.env)
            && self.status.map_or(true, |s| s == request.status)
    }
}

/// Request counts bucketed by status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub timeout: usize,
}

impl ApprovalStats {
    pub fn tally<'a>(requests: impl IntoIterator<Item = &'a ApprovalRequest>) -> Self {
        let mut stats = ApprovalStats::default();
        for request in requests {
            stats.total += 1;
            match request.status {
                ApprovalStatus::Pending => stats.pending += 1,
                ApprovalStatus::Approved => stats.approved += 1,
                ApprovalStatus::Rejected => stats.rejected += 1,
                ApprovalStatus::Timeout => stats.timeout += 1,
            }
        }
        stats
    }
}
