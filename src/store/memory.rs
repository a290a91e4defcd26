//! In-memory `RecordStore` for tests.
//!
//! Mirrors the libSQL backend's semantics, including phone-tail contact
//! matching and the claim lifecycle, without touching disk.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    Contact, ContactKind, ContactPatch, ConversationEvent, DeferredEntry, DeferredStatus,
    Direction, InboundSms, Stage, last_10_digits,
};
use crate::store::traits::{ClaimState, RecordStore};

#[derive(Default)]
struct Inner {
    /// Keyed by last ten phone digits.
    contacts: HashMap<String, Contact>,
    /// Keyed by provider message id.
    events: HashMap<String, ConversationEvent>,
    deferred: HashMap<Uuid, DeferredEntry>,
}

/// In-memory backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a contact by id, for test assertions.
    pub async fn contact_by_id(&self, id: Uuid) -> Option<Contact> {
        let inner = self.inner.lock().await;
        inner.contacts.values().find(|c| c.id == id).cloned()
    }

    /// All outbound events, for test assertions.
    pub async fn outbound_events(&self) -> Vec<ConversationEvent> {
        let inner = self.inner.lock().await;
        inner
            .events
            .values()
            .filter(|e| e.direction == Direction::Outbound)
            .cloned()
            .collect()
    }

    /// All deferred entries, for test assertions.
    pub async fn deferred_entries(&self) -> Vec<DeferredEntry> {
        let inner = self.inner.lock().await;
        inner.deferred.values().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, StoreError> {
        let Some(tail) = last_10_digits(phone) else {
            return Ok(None);
        };
        let inner = self.inner.lock().await;
        Ok(inner.contacts.get(&tail).cloned())
    }

    async fn create_prospect(&self, contact: &Contact) -> Result<(), StoreError> {
        let tail = last_10_digits(&contact.phone).unwrap_or_else(|| contact.phone.clone());
        let mut inner = self.inner.lock().await;
        if inner.contacts.contains_key(&tail) {
            return Err(StoreError::Query(format!(
                "contact already exists for {tail}"
            )));
        }
        inner.contacts.insert(tail, contact.clone());
        Ok(())
    }

    async fn update_contact(&self, id: Uuid, patch: &ContactPatch) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let contact = inner
            .contacts
            .values_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "contact".into(),
                id: id.to_string(),
            })?;

        if let Some(kind) = patch.kind {
            contact.kind = kind;
        }
        if let Some(stage) = patch.stage {
            contact.stage = stage;
        }
        if let Some(price) = patch.asking_price {
            contact.asking_price = Some(price);
        }
        if let Some(ref notes) = patch.condition_notes {
            contact.condition_notes = notes.clone();
        }
        if let Some(ref timeline) = patch.timeline {
            contact.timeline = Some(timeline.clone());
        }
        if let Some(urgency) = patch.urgency {
            contact.urgency = Some(urgency);
        }
        if let Some(quality) = patch.quality_score {
            contact.quality_score = Some(quality);
        }
        if let Some(verified) = patch.ownership_verified {
            contact.ownership_verified = verified;
        }
        if let Some(opted_out) = patch.opted_out {
            contact.opted_out = opted_out;
        }
        if let Some(t) = patch.last_inbound_at {
            contact.last_inbound_at = Some(t);
        }
        if let Some(t) = patch.last_outbound_at {
            contact.last_outbound_at = Some(t);
        }
        if let Some(t) = patch.last_activity_at {
            contact.last_activity_at = Some(t);
        }
        if patch.increment_reply_count {
            contact.reply_count += 1;
        }
        if patch.increment_send_count {
            contact.send_count += 1;
        }
        Ok(())
    }

    async fn claim_inbound(
        &self,
        sms: &InboundSms,
        claimed_by: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<ClaimState, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.events.get_mut(&sms.message_id) {
            None => {
                inner.events.insert(
                    sms.message_id.clone(),
                    ConversationEvent {
                        id: Uuid::new_v4(),
                        message_id: sms.message_id.clone(),
                        direction: Direction::Inbound,
                        from_phone: sms.from_phone.clone(),
                        to_phone: sms.to_phone.clone(),
                        body: sms.body.clone(),
                        intent: None,
                        stage: Stage::OwnershipConfirmation,
                        contact_id: Uuid::nil(),
                        contact_kind: ContactKind::Prospect,
                        received_at: sms.received_at,
                        processed_at: None,
                        sent_at: None,
                        summary: None,
                        claimed_by: Some(claimed_by.to_string()),
                        claimed_at: Some(now),
                    },
                );
                Ok(ClaimState::Claimed)
            }
            Some(event) => {
                if event.processed_at.is_some() {
                    return Ok(ClaimState::AlreadyProcessed);
                }
                let stale = chrono::Duration::from_std(stale_after)
                    .unwrap_or_else(|_| chrono::Duration::seconds(900));
                match event.claimed_at {
                    Some(at) if now - at < stale => Ok(ClaimState::AlreadyClaimed),
                    _ => {
                        event.claimed_by = Some(claimed_by.to_string());
                        event.claimed_at = Some(now);
                        Ok(ClaimState::Reclaimed)
                    }
                }
            }
        }
    }

    async fn mark_event_processed(
        &self,
        message_id: &str,
        intent: &str,
        stage: Stage,
        contact_id: Uuid,
        contact_kind: ContactKind,
        summary: Option<&str>,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(event) = inner.events.get_mut(message_id) {
            if event.processed_at.is_none() {
                event.intent = Some(intent.to_string());
                event.stage = stage;
                event.contact_id = contact_id;
                event.contact_kind = contact_kind;
                event.summary = summary.map(String::from);
                event.processed_at = Some(processed_at);
            }
        }
        Ok(())
    }

    async fn get_event(&self, message_id: &str) -> Result<Option<ConversationEvent>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.events.get(message_id).cloned())
    }

    async fn record_outbound(&self, event: &ConversationEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .events
            .entry(event.message_id.clone())
            .or_insert_with(|| event.clone());
        Ok(())
    }

    async fn unprocessed_inbound(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<Vec<InboundSms>, StoreError> {
        let stale = chrono::Duration::from_std(stale_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(900));
        let inner = self.inner.lock().await;
        let mut pending: Vec<&ConversationEvent> = inner
            .events
            .values()
            .filter(|e| e.direction == Direction::Inbound && e.processed_at.is_none())
            .filter(|e| match e.claimed_at {
                Some(at) => now - at >= stale,
                None => true,
            })
            .collect();
        pending.sort_by_key(|e| e.received_at);
        Ok(pending
            .into_iter()
            .take(limit)
            .map(|e| InboundSms {
                message_id: e.message_id.clone(),
                from_phone: e.from_phone.clone(),
                to_phone: e.to_phone.clone(),
                body: e.body.clone(),
                received_at: e.received_at,
            })
            .collect())
    }

    async fn create_deferred_entry(&self, entry: &DeferredEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.deferred.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn due_deferred_entries(
        &self,
        cutoff: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<DeferredEntry>, StoreError> {
        let inner = self.inner.lock().await;
        let mut due: Vec<DeferredEntry> = inner
            .deferred
            .values()
            .filter(|e| e.status == DeferredStatus::Queued && e.scheduled_for <= cutoff)
            .cloned()
            .collect();
        due.sort_by_key(|e| e.scheduled_for);
        due.truncate(limit);
        Ok(due)
    }

    async fn update_deferred_status(
        &self,
        id: Uuid,
        status: DeferredStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .deferred
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "deferred".into(),
                id: id.to_string(),
            })?;
        entry.status = status;
        Ok(())
    }
}
