//! Screening phase: run the oldest pending opportunities through AI
//! screening, apply the automatic lifecycle edge and alert on validation.
//!
//! A screening failure leaves the opportunity in `AnalysisPending`: it is
//! counted and retried on the next cycle, never silently validated or
//! rejected.

use serde::Serialize;
use sniper_core::{Opportunity, OpportunityStatus, ScreeningDecision, ScreeningOutcome};
use tracing::{info, warn};

use crate::Pipeline;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScreeningStats {
    pub screened: usize,
    pub validated: usize,
    pub auto_rejected: usize,
    pub notifications: usize,
    pub errors: usize,
}

/// The automatic edge a screening outcome maps to.
pub fn screening_status_for(outcome: &ScreeningOutcome) -> OpportunityStatus {
    match outcome.decision {
        ScreeningDecision::Validated => OpportunityStatus::WaitingClientDecision,
        ScreeningDecision::Rejected => OpportunityStatus::AutoRejected,
    }
}

impl Pipeline {
    pub async fn run_screening(&self) -> ScreeningStats {
        let mut stats = ScreeningStats::default();

        let pending = match self
            .opportunities
            .pending_batch(self.config.screening_batch_size)
            .await
        {
            Ok(pending) => pending,
            Err(err) => {
                warn!(error = %err, "loading screening backlog failed");
                stats.errors += 1;
                return stats;
            }
        };
        info!(count = pending.len(), "screening backlog slice loaded");

        for opportunity in pending {
            match self.screen_one(&opportunity, &mut stats).await {
                Ok(()) => stats.screened += 1,
                Err(err) => {
                    warn!(
                        opportunity = %opportunity.id,
                        error = %err,
                        "screening failed, left pending for next cycle"
                    );
                    stats.errors += 1;
                }
            }
        }

        info!(?stats, "screening phase complete");
        stats
    }

    async fn screen_one(
        &self,
        opportunity: &Opportunity,
        stats: &mut ScreeningStats,
    ) -> anyhow::Result<()> {
        let tender = self
            .tenders
            .get(opportunity.tender_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("tender {} missing", opportunity.tender_id))?;
        let client = self
            .clients
            .get(opportunity.client_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("client {} missing", opportunity.client_id))?;

        let outcome = self
            .screening
            .analyze_tender(&tender.summary, &client.rules)
            .await?;
        let to = screening_status_for(&outcome);
        let analysis = serde_json::to_value(&outcome)?;
        self.opportunities
            .record_screening(opportunity.id, to, outcome.score, &analysis)
            .await?;
        info!(
            opportunity = %opportunity.id,
            decision = ?outcome.decision,
            score = outcome.score,
            "screening recorded"
        );

        match to {
            OpportunityStatus::WaitingClientDecision => {
                stats.validated += 1;
                self.notify_validated(opportunity, &client.name, client.email.as_deref(),
                    &tender.title, &outcome, stats)
                    .await?;
            }
            _ => stats.auto_rejected += 1,
        }
        Ok(())
    }

    /// Token issue + alerts for a validated opportunity. Alert failures are
    /// logged and dropped; they never undo the screening result.
    async fn notify_validated(
        &self,
        opportunity: &Opportunity,
        client_name: &str,
        client_email: Option<&str>,
        tender_title: &str,
        outcome: &ScreeningOutcome,
        stats: &mut ScreeningStats,
    ) -> anyhow::Result<()> {
        let token = self.opportunities.ensure_decision_token(opportunity.id).await?;

        if let Some(email) = client_email {
            stats.notifications += 1;
            if let Err(err) = self
                .notifier
                .send_client_alert(email, tender_title, outcome, token)
                .await
            {
                warn!(opportunity = %opportunity.id, error = %err, "client alert failed");
            }
        }

        let alert =
            sniper_adapters::notify::admin_validation_alert(client_name, tender_title, outcome.score);
        if let Err(err) = self.notifier.send_admin_alert(&alert).await {
            warn!(opportunity = %opportunity.id, error = %err, "admin alert failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(decision: ScreeningDecision) -> ScreeningOutcome {
        ScreeningOutcome {
            decision,
            reasoning: "test".to_string(),
            score: 70.0,
            client_summary: None,
        }
    }

    #[test]
    fn validated_outcomes_wait_for_the_client() {
        assert_eq!(
            screening_status_for(&outcome(ScreeningDecision::Validated)),
            OpportunityStatus::WaitingClientDecision
        );
    }

    #[test]
    fn rejected_outcomes_terminate_automatically() {
        assert_eq!(
            screening_status_for(&outcome(ScreeningDecision::Rejected)),
            OpportunityStatus::AutoRejected
        );
    }

    #[test]
    fn both_screening_targets_are_legal_automatic_edges() {
        for decision in [ScreeningDecision::Validated, ScreeningDecision::Rejected] {
            let to = screening_status_for(&outcome(decision));
            assert!(OpportunityStatus::AnalysisPending.can_transition(to));
        }
    }
}
