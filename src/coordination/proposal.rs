//! Swap proposals
//!
//! An initiator can offer swap terms to one named counterparty before any
//! asset is locked. Accepting the offer opens the swap in `INITIATED` with
//! the counterparty reserved as its only possible participant; the swap then
//! follows the ordinary hash-timelock lifecycle.

use super::swap::{AtomicSwap, SwapTerms};
use super::Transition;
use crate::error::{SettlementError, SettlementResult};
use crate::types::{require_non_empty, EventCursor};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Open,
    Accepted,
}

impl ProposalStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ProposalStatus::Open => "OPEN",
            ProposalStatus::Accepted => "ACCEPTED",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapProposal {
    pub proposal_id: String,
    pub terms: SwapTerms,
    /// Counterparty the offer is addressed to
    pub participant: String,
    pub status: ProposalStatus,
    pub created_at: u64,
    /// Swap opened by the acceptance
    pub swap_id: Option<String>,
    pub accepted_at: Option<u64>,
    #[serde(default)]
    pub cursor: EventCursor,
}

impl SwapProposal {
    /// Record an open offer from `proposer`, who must be the terms' initiator
    pub fn create(
        proposal_id: String,
        proposer: &str,
        terms: SwapTerms,
        participant: &str,
        now: u64,
    ) -> SettlementResult<SwapProposal> {
        require_non_empty("proposer", proposer)?;
        require_non_empty("participant", participant)?;
        if !proposer.eq_ignore_ascii_case(&terms.initiator) {
            return Err(SettlementError::Unauthorized {
                caller: proposer.to_string(),
                action: format!("propose a swap initiated by {}", terms.initiator),
            });
        }
        if participant.eq_ignore_ascii_case(&terms.initiator) {
            return Err(SettlementError::Validation(
                "a swap cannot be proposed to its own initiator".to_string(),
            ));
        }
        // Shape checks of the swap the terms would open; expiry is resolved on acceptance
        AtomicSwap::initiate(proposal_id.clone(), terms.clone(), now, u64::MAX)?;

        Ok(SwapProposal {
            proposal_id,
            terms,
            participant: participant.to_string(),
            status: ProposalStatus::Open,
            created_at: now,
            swap_id: None,
            accepted_at: None,
            cursor: EventCursor::default(),
        })
    }

    /// The addressed counterparty accepts: open the swap it describes
    ///
    /// Returns the accepted proposal and the swap's opening transition.
    pub fn accept(
        &self,
        accepter: &str,
        swap_id: String,
        now: u64,
        expires_at: u64,
    ) -> SettlementResult<(SwapProposal, Transition<AtomicSwap>)> {
        if !accepter.eq_ignore_ascii_case(&self.participant) {
            return Err(SettlementError::Unauthorized {
                caller: accepter.to_string(),
                action: format!("accept proposal {}", self.proposal_id),
            });
        }
        if self.status != ProposalStatus::Open {
            return Err(SettlementError::StateConflict {
                state: self.status.to_string(),
                action: "accept".to_string(),
            });
        }

        let mut opened = AtomicSwap::initiate(swap_id, self.terms.clone(), now, expires_at)?;
        opened.next.reserved_participant = Some(self.participant.clone());

        let mut accepted = self.clone();
        accepted.status = ProposalStatus::Accepted;
        accepted.swap_id = Some(opened.next.swap_id.clone());
        accepted.accepted_at = Some(now);

        Ok((accepted, opened))
    }
}
