//! Conversation engine — orchestrates one inbound message end to end.
//!
//! Flow:
//! 1. Validate and normalize the inbound payload
//! 2. Claim the message (idempotent intake)
//! 3. Find or create the contact
//! 4. Classify → stage transition → targeted contact patch
//! 5. Promotion check (prospect → lead, at most once)
//! 6. Collision guard, compose, quiet-hours gate, send or defer
//!
//! Every contact write is a patch of only the fields this message
//! touched, and every downstream side effect is keyed on the provider
//! message id, so replaying a message is a no-op.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::{Classification, Classifier, Intent};
use crate::compose::Composer;
use crate::config::{EngineConfig, Lexicons};
use crate::error::{Error, ValidationError};
use crate::intake::IntakeGuard;
use crate::model::{
    Contact, ContactPatch, ConversationEvent, DeferredEntry, DeferredStatus, Direction,
    InboundSms, Stage,
};
use crate::promote;
use crate::quiet::{Disposition, QuietHours};
use crate::score;
use crate::stage::{Action, TemplateKey, transition};
use crate::store::RecordStore;
use crate::transport::SmsTransport;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Payload failed validation; nothing was written.
    Rejected(ValidationError),
    /// Already claimed or already processed; side-effect no-op.
    Duplicate,
    /// Processed to completion.
    Processed {
        intent: Intent,
        stage: Stage,
        /// What happened to the reply: `replied`, `deferred`,
        /// `dropped`, `follow_up_queued`, `suppressed`, or `none`.
        disposition: &'static str,
    },
}

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn RecordStore>,
    transport: Arc<dyn SmsTransport>,
    classifier: Classifier,
    composer: Composer,
    intake: IntakeGuard,
    quiet: QuietHours,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        lexicons: &Lexicons,
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn SmsTransport>,
    ) -> Self {
        let intake = IntakeGuard::new(
            store.clone(),
            config.processed_by.clone(),
            config.stale_claim_timeout,
        );
        let quiet = QuietHours {
            enabled: config.quiet_hours_enabled,
            start_hour: config.quiet_start_hour,
            end_hour: config.quiet_end_hour,
            timezone: config.business_timezone,
            deferral_available: config.deferred_delivery_enabled,
        };
        Self {
            config,
            store,
            transport,
            classifier: Classifier::new(lexicons),
            composer: Composer::default(),
            intake,
            quiet,
        }
    }

    /// Replace the built-in template pools.
    pub fn with_composer(mut self, composer: Composer) -> Self {
        self.composer = composer;
        self
    }

    /// Process a single inbound message.
    pub async fn handle_inbound(
        &self,
        sms: InboundSms,
        now: DateTime<Utc>,
    ) -> Result<Outcome, Error> {
        let sms = match sms.validated() {
            Ok(sms) => sms,
            Err(e) => {
                warn!(error = %e, "Rejected inbound payload");
                return Ok(Outcome::Rejected(e));
            }
        };

        if !self.intake.claim(&sms, now).await? {
            return Ok(Outcome::Duplicate);
        }

        let contact = match self.store.find_contact_by_phone(&sms.from_phone).await? {
            Some(contact) => contact,
            None => {
                let contact = Contact::new_prospect(&sms.from_phone, now);
                self.store.create_prospect(&contact).await?;
                info!(contact_id = %contact.id, phone = %contact.phone, "New prospect from inbound");
                contact
            }
        };

        if contact.opted_out {
            self.store
                .mark_event_processed(
                    &sms.message_id,
                    Intent::Noop.label(),
                    contact.stage,
                    contact.id,
                    contact.kind,
                    Some("contact opted out; suppressed"),
                    now,
                )
                .await?;
            debug!(contact_id = %contact.id, "Contact opted out; suppressing all activity");
            return Ok(Outcome::Processed {
                intent: Intent::Noop,
                stage: contact.stage,
                disposition: "suppressed",
            });
        }

        let classification = self.classifier.classify(&sms.body);
        let t = transition(contact.stage, classification.intent);

        info!(
            contact_id = %contact.id,
            intent = classification.intent.label(),
            from_stage = contact.stage.label(),
            to_stage = t.next.label(),
            "Classified inbound message"
        );

        let patch = build_patch(&contact, &sms.body, &classification, &t, now);
        self.store.update_contact(contact.id, &patch).await?;

        let final_kind = patch.kind.unwrap_or(contact.kind);
        if patch.kind.is_some() {
            info!(
                contact_id = %contact.id,
                stage = t.next.label(),
                intent = classification.intent.label(),
                "Prospect promoted to lead"
            );
        }

        let summary = format!(
            "{}: {} -> {}",
            classification.intent.label(),
            contact.stage.label(),
            t.next.label()
        );
        self.store
            .mark_event_processed(
                &sms.message_id,
                classification.intent.label(),
                t.next,
                contact.id,
                final_kind,
                Some(&summary),
                now,
            )
            .await?;

        let disposition = self
            .perform_action(&contact, &sms, t.action, t.next, now)
            .await?;

        Ok(Outcome::Processed {
            intent: classification.intent,
            stage: t.next,
            disposition,
        })
    }

    /// Execute the transition's action: reply now, queue a follow-up,
    /// or nothing.
    async fn perform_action(
        &self,
        contact: &Contact,
        sms: &InboundSms,
        action: Action,
        stage: Stage,
        now: DateTime<Utc>,
    ) -> Result<&'static str, Error> {
        match action {
            Action::None => Ok("none"),
            Action::Reply(key) => {
                // Collision guard reads the pre-message snapshot, so a
                // human agent's recent activity suppresses the bot.
                if let Some(last) = contact.last_activity_at {
                    let cooldown = chrono::Duration::from_std(self.config.collision_cooldown)
                        .unwrap_or_else(|_| chrono::Duration::minutes(30));
                    if now - last < cooldown {
                        info!(
                            contact_id = %contact.id,
                            last_activity = %last,
                            "Recent conversation activity; suppressing automated reply"
                        );
                        return Ok("suppressed");
                    }
                }

                let body = self.composer.render(key, contact);
                match self.quiet.evaluate(now) {
                    Disposition::SendNow => {
                        self.send_and_record(contact, sms, &body, stage, now).await?;
                        Ok("replied")
                    }
                    Disposition::Defer { scheduled_for } => {
                        self.store
                            .create_deferred_entry(&DeferredEntry {
                                id: Uuid::new_v4(),
                                contact_id: contact.id,
                                to_phone: sms.from_phone.clone(),
                                from_phone: sms.to_phone.clone(),
                                body,
                                scheduled_for,
                                status: DeferredStatus::Queued,
                                created_at: now,
                            })
                            .await?;
                        Ok("deferred")
                    }
                    Disposition::DropSilent => Ok("dropped"),
                }
            }
            Action::FollowUp30d => {
                self.queue_follow_up(contact, sms, TemplateKey::FollowUp30d, self.config.follow_up_days, now)
                    .await?;
                Ok("follow_up_queued")
            }
            Action::FollowUpWeek => {
                self.queue_follow_up(
                    contact,
                    sms,
                    TemplateKey::FollowUpWeek,
                    self.config.delay_follow_up_days,
                    now,
                )
                .await?;
                Ok("follow_up_queued")
            }
        }
    }

    async fn queue_follow_up(
        &self,
        contact: &Contact,
        sms: &InboundSms,
        key: TemplateKey,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let scheduled_for = self.quiet.local_now(now) + chrono::Duration::days(days);
        let body = self.composer.render(key, contact);
        self.store
            .create_deferred_entry(&DeferredEntry {
                id: Uuid::new_v4(),
                contact_id: contact.id,
                to_phone: sms.from_phone.clone(),
                from_phone: sms.to_phone.clone(),
                body,
                scheduled_for,
                status: DeferredStatus::Queued,
                created_at: now,
            })
            .await?;
        info!(
            contact_id = %contact.id,
            days,
            scheduled_for = %scheduled_for,
            "Queued re-engagement follow-up"
        );
        Ok(())
    }

    async fn send_and_record(
        &self,
        contact: &Contact,
        sms: &InboundSms,
        body: &str,
        stage: Stage,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let receipt = self
            .transport
            .send(&sms.to_phone, &sms.from_phone, body)
            .await?;

        self.store
            .record_outbound(&ConversationEvent {
                id: Uuid::new_v4(),
                message_id: receipt.message_id,
                direction: Direction::Outbound,
                from_phone: sms.to_phone.clone(),
                to_phone: sms.from_phone.clone(),
                body: body.to_string(),
                intent: None,
                stage,
                contact_id: contact.id,
                contact_kind: contact.kind,
                received_at: now,
                processed_at: None,
                sent_at: Some(now),
                summary: None,
                claimed_by: None,
                claimed_at: None,
            })
            .await?;

        self.store
            .update_contact(
                contact.id,
                &ContactPatch {
                    last_outbound_at: Some(now),
                    last_activity_at: Some(now),
                    increment_send_count: true,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Deliver queued deferred entries that are now due. Returns the
    /// number sent.
    pub async fn flush_deferred(&self, now: DateTime<Utc>) -> Result<usize, Error> {
        // Follow-ups scheduled N days out can land back inside the
        // quiet window; hold the whole flush until it opens.
        if self.quiet.is_quiet(now) {
            debug!("Deferred flush held for quiet hours");
            return Ok(0);
        }

        let cutoff = self.quiet.local_now(now);
        let due = self
            .store
            .due_deferred_entries(cutoff, self.config.batch_limit)
            .await?;

        let mut sent = 0;
        for entry in due {
            // Opt-outs and wrong numbers between queue and flush cancel
            // the send.
            let contact = self.store.find_contact_by_phone(&entry.to_phone).await?;
            let blocked = contact
                .as_ref()
                .map(|c| c.opted_out || c.stage.is_terminal())
                .unwrap_or(false);
            if blocked {
                self.store
                    .update_deferred_status(entry.id, DeferredStatus::Dropped)
                    .await?;
                info!(entry_id = %entry.id, "Deferred send dropped; contact no longer reachable");
                continue;
            }

            match self
                .transport
                .send(&entry.from_phone, &entry.to_phone, &entry.body)
                .await
            {
                Ok(receipt) => {
                    self.store
                        .record_outbound(&ConversationEvent {
                            id: Uuid::new_v4(),
                            message_id: receipt.message_id,
                            direction: Direction::Outbound,
                            from_phone: entry.from_phone.clone(),
                            to_phone: entry.to_phone.clone(),
                            body: entry.body.clone(),
                            intent: None,
                            stage: contact
                                .as_ref()
                                .map(|c| c.stage)
                                .unwrap_or(Stage::OwnershipConfirmation),
                            contact_id: entry.contact_id,
                            contact_kind: contact
                                .as_ref()
                                .map(|c| c.kind)
                                .unwrap_or(crate::model::ContactKind::Prospect),
                            received_at: now,
                            processed_at: None,
                            sent_at: Some(now),
                            summary: None,
                            claimed_by: None,
                            claimed_at: None,
                        })
                        .await?;
                    self.store
                        .update_deferred_status(entry.id, DeferredStatus::Sent)
                        .await?;
                    if let Some(c) = &contact {
                        self.store
                            .update_contact(
                                c.id,
                                &ContactPatch {
                                    last_outbound_at: Some(now),
                                    last_activity_at: Some(now),
                                    increment_send_count: true,
                                    ..Default::default()
                                },
                            )
                            .await?;
                    }
                    sent += 1;
                }
                Err(e) => {
                    // Left queued; the next flush retries.
                    warn!(entry_id = %entry.id, error = %e, "Deferred send failed");
                }
            }
        }
        if sent > 0 {
            info!(sent, "Flushed deferred sends");
        }
        Ok(sent)
    }

    /// Pull a batch of unclaimed inbound messages and process them.
    /// Individual failures are logged and do not abort the batch.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<usize, Error> {
        let pending = self
            .store
            .unprocessed_inbound(self.config.batch_limit, now, self.config.stale_claim_timeout)
            .await?;

        let mut processed = 0;
        for sms in pending {
            let message_id = sms.message_id.clone();
            match self.handle_inbound(sms, now).await {
                Ok(Outcome::Processed { .. }) => processed += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(message_id = %message_id, error = %e, "Failed to process inbound message");
                }
            }
        }
        Ok(processed)
    }
}

/// Fold classification and transition results into a targeted patch.
fn build_patch(
    contact: &Contact,
    body: &str,
    classification: &Classification,
    t: &crate::stage::Transition,
    now: DateTime<Utc>,
) -> ContactPatch {
    let mut patch = ContactPatch {
        last_inbound_at: Some(now),
        last_activity_at: Some(now),
        increment_reply_count: true,
        ..Default::default()
    };

    if t.next != contact.stage {
        patch.stage = Some(t.next);
    }
    if t.verifies_ownership && !contact.ownership_verified {
        patch.ownership_verified = Some(true);
    }
    if classification.intent == Intent::OptOut {
        patch.opted_out = Some(true);
    }
    if let Some(price) = classification.price {
        patch.asking_price = Some(price);
    }
    if !classification.condition_notes.is_empty() {
        let mut notes = contact.condition_notes.clone();
        for note in &classification.condition_notes {
            if !notes.contains(note) {
                notes.push(note.clone());
            }
        }
        patch.condition_notes = Some(notes);
    }
    if let Some(ref timeline) = classification.timeline {
        if contact.timeline.is_none() {
            patch.timeline = Some(timeline.clone());
        }
    }

    // Urgency only ratchets up; quality is recomputed over merged facts.
    let urgency = score::assess_urgency(body, classification.intent)
        .max(contact.urgency.unwrap_or(0));
    if contact.urgency != Some(urgency) {
        patch.urgency = Some(urgency);
    }
    let notes = patch
        .condition_notes
        .as_deref()
        .unwrap_or(&contact.condition_notes);
    let quality = score::lead_quality(
        classification.intent,
        patch.asking_price.or(contact.asking_price),
        notes,
        patch.timeline.as_deref().or(contact.timeline.as_deref()),
        urgency,
    );
    if contact.quality_score != Some(quality) {
        patch.quality_score = Some(quality);
    }

    patch.kind = promote::next_kind(contact.kind, contact.stage, classification.intent);
    patch
}
