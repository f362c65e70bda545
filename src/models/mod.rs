pub mod approval;

pub use approval::{
    ApprovalFilter, ApprovalHistoryEntry, ApprovalRequest, ApprovalSpec, ApprovalStats,
    ApprovalStatus, Decision, HistoryAction, Outcome,
};
