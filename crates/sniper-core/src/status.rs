//! The opportunity lifecycle.
//!
//! Only the initial screening edge is automatic; everything after
//! `AnalysisPending` requires an explicit trigger (decision link, admin
//! upload, fulfillment completion). The single backward move is the explicit
//! reset-for-reanalysis operation, which also clears the stale analysis.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpportunityStatus {
    AnalysisPending,
    AutoRejected,
    WaitingClientDecision,
    Approved,
    Rejected,
    ApprovedByClient,
    DceRequested,
    Extracted,
    Ready,
    DceReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal status transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: OpportunityStatus,
    pub to: OpportunityStatus,
}

impl OpportunityStatus {
    pub const ALL: [OpportunityStatus; 10] = [
        OpportunityStatus::AnalysisPending,
        OpportunityStatus::AutoRejected,
        OpportunityStatus::WaitingClientDecision,
        OpportunityStatus::Approved,
        OpportunityStatus::Rejected,
        OpportunityStatus::ApprovedByClient,
        OpportunityStatus::DceRequested,
        OpportunityStatus::Extracted,
        OpportunityStatus::Ready,
        OpportunityStatus::DceReady,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OpportunityStatus::AnalysisPending => "ANALYSIS_PENDING",
            OpportunityStatus::AutoRejected => "AUTO_REJECTED",
            OpportunityStatus::WaitingClientDecision => "WAITING_CLIENT_DECISION",
            OpportunityStatus::Approved => "APPROVED",
            OpportunityStatus::Rejected => "REJECTED",
            OpportunityStatus::ApprovedByClient => "APPROVED_BY_CLIENT",
            OpportunityStatus::DceRequested => "DCE_REQUESTED",
            OpportunityStatus::Extracted => "EXTRACTED",
            OpportunityStatus::Ready => "READY",
            OpportunityStatus::DceReady => "DCE_READY",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// Declared edges of the lifecycle graph. Reset-for-reanalysis is not an
    /// edge; it is its own operation (`is_reset_target`).
    pub fn can_transition(self, to: OpportunityStatus) -> bool {
        use OpportunityStatus::*;
        matches!(
            (self, to),
            (AnalysisPending, AutoRejected)
                | (AnalysisPending, WaitingClientDecision)
                | (WaitingClientDecision, Approved)
                | (WaitingClientDecision, Rejected)
                | (WaitingClientDecision, ApprovedByClient)
                | (Approved, DceRequested)
                | (ApprovedByClient, DceReady)
                | (DceRequested, Extracted)
                | (Extracted, Ready)
        )
    }

    pub fn check_transition(self, to: OpportunityStatus) -> Result<(), TransitionError> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(TransitionError { from: self, to })
        }
    }

    pub fn is_terminal(self) -> bool {
        use OpportunityStatus::*;
        matches!(self, AutoRejected | Rejected | Ready | DceReady)
    }
}

#[cfg(test)]
mod tests {
    use super::OpportunityStatus::*;
    use super::*;

    #[test]
    fn screening_edges_leave_analysis_pending() {
        assert!(AnalysisPending.can_transition(AutoRejected));
        assert!(AnalysisPending.can_transition(WaitingClientDecision));
        assert!(!AnalysisPending.can_transition(Approved));
        assert!(!AnalysisPending.can_transition(Ready));
    }

    #[test]
    fn client_decision_edges() {
        assert!(WaitingClientDecision.can_transition(Approved));
        assert!(WaitingClientDecision.can_transition(Rejected));
        assert!(WaitingClientDecision.can_transition(ApprovedByClient));
        assert!(!WaitingClientDecision.can_transition(Extracted));
    }

    #[test]
    fn fulfillment_chain_cannot_skip_steps() {
        assert!(Approved.can_transition(DceRequested));
        assert!(DceRequested.can_transition(Extracted));
        assert!(Extracted.can_transition(Ready));
        assert!(!Approved.can_transition(Extracted));
        assert!(!DceRequested.can_transition(Ready));
    }

    #[test]
    fn fast_track_short_circuits_to_dce_ready() {
        assert!(ApprovedByClient.can_transition(DceReady));
        assert!(!ApprovedByClient.can_transition(DceRequested));
    }

    #[test]
    fn terminals_have_no_outgoing_edges() {
        for terminal in [AutoRejected, Rejected, Ready, DceReady] {
            assert!(terminal.is_terminal());
            for to in OpportunityStatus::ALL {
                assert!(!terminal.can_transition(to), "{terminal:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn no_backward_edges_exist() {
        // Walking the graph from any state must never revisit AnalysisPending.
        for from in OpportunityStatus::ALL {
            assert!(!from.can_transition(AnalysisPending));
        }
    }

    #[test]
    fn check_transition_reports_both_ends() {
        let err = Ready.check_transition(Extracted).unwrap_err();
        assert_eq!(err.from, Ready);
        assert_eq!(err.to, Extracted);
    }

    #[test]
    fn wire_names_round_trip() {
        for status in OpportunityStatus::ALL {
            assert_eq!(OpportunityStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OpportunityStatus::parse("PROCESSING_MANUAL"), None);
    }
}
