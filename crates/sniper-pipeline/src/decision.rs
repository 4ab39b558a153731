//! Client go/no-go decisions, shared by the decision link and the inbound
//! webhook. Tokens are consume-then-clear: once a choice lands, the same
//! token (or a stale emailed link after a webhook reply) matches nothing.

use sniper_core::{Client, Opportunity, OpportunityStatus};
use sniper_storage::StoreError;
use tracing::info;
use uuid::Uuid;

use crate::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionChoice {
    Accept,
    Reject,
}

impl DecisionChoice {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "accept" => Some(DecisionChoice::Accept),
            "reject" => Some(DecisionChoice::Reject),
            _ => None,
        }
    }
}

/// Fixed reply vocabulary for the inbound webhook channel. Anything outside
/// it yields `None`: prompt for clarification, change nothing.
pub fn interpret_reply(message: &str) -> Option<DecisionChoice> {
    const AFFIRMATIVE: [&str; 6] = ["oui", "go", "ok", "yes", "valider", "1"];
    const NEGATIVE: [&str; 6] = ["non", "no", "stop", "refuser", "rejeter", "2"];

    let normalized = message.trim().to_lowercase();
    if AFFIRMATIVE.contains(&normalized.as_str()) {
        Some(DecisionChoice::Accept)
    } else if NEGATIVE.contains(&normalized.as_str()) {
        Some(DecisionChoice::Reject)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub opportunity: Opportunity,
    pub status: OpportunityStatus,
}

impl Pipeline {
    /// Decision-link path. `None` means the token is unknown or already
    /// consumed; the web layer renders that as not-found.
    pub async fn apply_decision_by_token(
        &self,
        token: Uuid,
        choice: DecisionChoice,
    ) -> Result<Option<DecisionOutcome>, StoreError> {
        let Some(opportunity) = self.opportunities.find_by_token(token).await? else {
            return Ok(None);
        };
        let Some(client) = self.clients.get(opportunity.client_id).await? else {
            return Ok(None);
        };

        let target = decision_target(choice, &client);
        let Some(consumed) = self
            .opportunities
            .consume_decision_token(token, target)
            .await?
        else {
            return Ok(None);
        };
        self.after_decision(&consumed, &client, choice, target).await
    }

    /// Webhook path: the opportunity was resolved from the sender, not from
    /// a token.
    pub async fn apply_decision_for_client(
        &self,
        client: &Client,
        choice: DecisionChoice,
    ) -> Result<Option<DecisionOutcome>, StoreError> {
        let Some(waiting) = self.opportunities.latest_waiting_for_client(client.id).await? else {
            return Ok(None);
        };
        let target = decision_target(choice, client);
        let Some(decided) = self.opportunities.decide(waiting.id, target).await? else {
            return Ok(None);
        };
        self.after_decision(&decided, client, choice, target).await
    }

    async fn after_decision(
        &self,
        opportunity: &Opportunity,
        client: &Client,
        choice: DecisionChoice,
        target: OpportunityStatus,
    ) -> Result<Option<DecisionOutcome>, StoreError> {
        info!(
            opportunity = %opportunity.id,
            client = %client.name,
            ?choice,
            status = target.as_str(),
            "client decision applied"
        );

        let final_status = match target {
            OpportunityStatus::Approved => {
                // The acceptance is the explicit trigger for fulfillment:
                // open the ticket, advance, and wake the admin.
                self.fulfillments.open(opportunity.id).await?;
                self.opportunities
                    .transition(
                        opportunity.id,
                        OpportunityStatus::Approved,
                        OpportunityStatus::DceRequested,
                    )
                    .await?;
                self.alert_admin_dce_requested(&client.name, opportunity).await;
                OpportunityStatus::DceRequested
            }
            OpportunityStatus::ApprovedByClient => {
                // Fast-track client: skip the admin loop entirely.
                self.opportunities
                    .transition(
                        opportunity.id,
                        OpportunityStatus::ApprovedByClient,
                        OpportunityStatus::DceReady,
                    )
                    .await?;
                OpportunityStatus::DceReady
            }
            other => other,
        };

        Ok(Some(DecisionOutcome {
            opportunity: opportunity.clone(),
            status: final_status,
        }))
    }
}

fn decision_target(choice: DecisionChoice, client: &Client) -> OpportunityStatus {
    match choice {
        DecisionChoice::Reject => OpportunityStatus::Rejected,
        DecisionChoice::Accept if client.auto_fulfill_on_accept => {
            OpportunityStatus::ApprovedByClient
        }
        DecisionChoice::Accept => OpportunityStatus::Approved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sniper_core::SniperRules;

    fn client(auto_fulfill: bool) -> Client {
        Client {
            id: Uuid::new_v4(),
            name: "Apoem Nettoyage".to_string(),
            email: Some("contact@apoem.fr".to_string()),
            active: true,
            keywords: vec!["nettoyage".to_string()],
            regions: vec![],
            rules: SniperRules::default(),
            auto_fulfill_on_accept: auto_fulfill,
            last_sourced_at: None,
        }
    }

    #[test]
    fn choice_parsing_only_knows_accept_and_reject() {
        assert_eq!(DecisionChoice::parse("accept"), Some(DecisionChoice::Accept));
        assert_eq!(DecisionChoice::parse("reject"), Some(DecisionChoice::Reject));
        assert_eq!(DecisionChoice::parse("maybe"), None);
        assert_eq!(DecisionChoice::parse("ACCEPT"), None);
    }

    #[test]
    fn reply_vocabulary_covers_french_and_english_forms() {
        assert_eq!(interpret_reply("Oui"), Some(DecisionChoice::Accept));
        assert_eq!(interpret_reply(" go "), Some(DecisionChoice::Accept));
        assert_eq!(interpret_reply("NON"), Some(DecisionChoice::Reject));
        assert_eq!(interpret_reply("stop"), Some(DecisionChoice::Reject));
    }

    #[test]
    fn unrecognised_replies_change_nothing() {
        assert_eq!(interpret_reply("peut-être la semaine prochaine"), None);
        assert_eq!(interpret_reply(""), None);
    }

    #[test]
    fn accept_routes_through_the_auto_fulfill_flag() {
        assert_eq!(
            decision_target(DecisionChoice::Accept, &client(false)),
            OpportunityStatus::Approved
        );
        assert_eq!(
            decision_target(DecisionChoice::Accept, &client(true)),
            OpportunityStatus::ApprovedByClient
        );
        assert_eq!(
            decision_target(DecisionChoice::Reject, &client(true)),
            OpportunityStatus::Rejected
        );
    }
}
