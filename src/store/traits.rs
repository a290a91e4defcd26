//! `RecordStore` — the abstract record interface the engine is written
//! against.
//!
//! Every call is individually atomic but calls do NOT compose into a
//! transaction, and there is no compare-and-swap: updates are
//! last-writer-wins. The engine therefore writes targeted patches and
//! keeps all downstream writes idempotent on the provider message id.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    Contact, ContactKind, ContactPatch, ConversationEvent, DeferredEntry, DeferredStatus,
    InboundSms, Stage,
};

/// Result of attempting to claim an inbound message for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    /// First sight of this message id; claim recorded.
    Claimed,
    /// A previous claim existed but was older than the stale timeout;
    /// the abandoned work is being retried.
    Reclaimed,
    /// Another worker holds a fresh claim.
    AlreadyClaimed,
    /// The message was fully processed before; reprocessing is a no-op.
    AlreadyProcessed,
}

/// Backend-agnostic store covering contacts, conversation events, and
/// the deferred-delivery queue.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Run pending schema migrations (no-op where not applicable).
    async fn run_migrations(&self) -> Result<(), StoreError>;

    // ── Contacts ────────────────────────────────────────────────────

    /// Look up a contact (prospect or lead) by any phone format; the
    /// backend matches on the last ten digits.
    async fn find_contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, StoreError>;

    /// Persist a freshly created prospect.
    async fn create_prospect(&self, contact: &Contact) -> Result<(), StoreError>;

    /// Apply a targeted patch. Fields left `None` are not written.
    async fn update_contact(&self, id: Uuid, patch: &ContactPatch) -> Result<(), StoreError>;

    // ── Conversation events ─────────────────────────────────────────

    /// Claim the inbound message keyed by its provider id, creating the
    /// event row on first sight. Claims older than `stale_after` are
    /// treated as abandoned. Best-effort only — no CAS underneath.
    async fn claim_inbound(
        &self,
        sms: &InboundSms,
        claimed_by: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<ClaimState, StoreError>;

    /// Mark the inbound event processed and link it to its contact.
    /// Idempotent on `message_id`.
    #[allow(clippy::too_many_arguments)]
    async fn mark_event_processed(
        &self,
        message_id: &str,
        intent: &str,
        stage: Stage,
        contact_id: Uuid,
        contact_kind: ContactKind,
        summary: Option<&str>,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Fetch an event by provider message id.
    async fn get_event(&self, message_id: &str) -> Result<Option<ConversationEvent>, StoreError>;

    /// Record an outbound event (a sent reply).
    async fn record_outbound(&self, event: &ConversationEvent) -> Result<(), StoreError>;

    /// Inbound events not yet processed and not freshly claimed, oldest
    /// first, up to `limit`. This is the worker poll source.
    async fn unprocessed_inbound(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<Vec<InboundSms>, StoreError>;

    // ── Deferred delivery ───────────────────────────────────────────

    /// Queue a deferred reply.
    async fn create_deferred_entry(&self, entry: &DeferredEntry) -> Result<(), StoreError>;

    /// Queued entries whose business-local schedule is at or before
    /// `cutoff`, oldest first.
    async fn due_deferred_entries(
        &self,
        cutoff: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<DeferredEntry>, StoreError>;

    /// Update a deferred entry's status.
    async fn update_deferred_status(
        &self,
        id: Uuid,
        status: DeferredStatus,
    ) -> Result<(), StoreError>;
}
