//! Intake guard: claim-then-process idempotency for inbound messages.
//!
//! Each inbound message is claimed under the worker's label before any
//! other state is touched. The claim is advisory (no compare-and-swap
//! underneath), so duplicate suppression is best effort; the fully
//! processed marker is what makes reprocessing a hard no-op.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::InboundSms;
use crate::store::{ClaimState, RecordStore};

pub struct IntakeGuard {
    store: Arc<dyn RecordStore>,
    claimed_by: String,
    stale_timeout: Duration,
}

impl IntakeGuard {
    pub fn new(store: Arc<dyn RecordStore>, claimed_by: String, stale_timeout: Duration) -> Self {
        Self {
            store,
            claimed_by,
            stale_timeout,
        }
    }

    /// Try to take ownership of an inbound message.
    ///
    /// Returns true when this worker should process it now. Fresh
    /// claims by other workers and already-processed messages both
    /// return false.
    pub async fn claim(&self, sms: &InboundSms, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let state = self
            .store
            .claim_inbound(sms, &self.claimed_by, now, self.stale_timeout)
            .await?;

        match state {
            ClaimState::Claimed => {
                debug!(message_id = %sms.message_id, "Claimed inbound message");
                Ok(true)
            }
            ClaimState::Reclaimed => {
                info!(message_id = %sms.message_id, "Reclaimed stale inbound message");
                Ok(true)
            }
            ClaimState::AlreadyClaimed => {
                debug!(message_id = %sms.message_id, "Inbound message claimed elsewhere; skipping");
                Ok(false)
            }
            ClaimState::AlreadyProcessed => {
                debug!(message_id = %sms.message_id, "Inbound message already processed; skipping");
                Ok(false)
            }
        }
    }
}
