//! End-to-end engine scenarios against the in-memory store and a mock
//! transport.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use sms_autopilot::classify::Intent;
use sms_autopilot::config::{EngineConfig, Lexicons};
use sms_autopilot::engine::{Engine, Outcome};
use sms_autopilot::model::{Contact, ContactKind, DeferredStatus, InboundSms, Stage};
use sms_autopilot::store::{MemoryStore, RecordStore};
use sms_autopilot::transport::MockTransport;

const SELLER: &str = "+15125550100";
const DID: &str = "+15125550999";

/// Midday in America/Chicago, well outside the 21-9 quiet window.
fn midday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 18, 0, 0).unwrap()
}

/// 21:30 America/Chicago (03:30 UTC next day), inside the quiet window.
fn late_evening() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 3, 30, 0).unwrap()
}

fn sms(message_id: &str, body: &str, at: DateTime<Utc>) -> InboundSms {
    InboundSms {
        message_id: message_id.into(),
        from_phone: SELLER.into(),
        to_phone: DID.into(),
        body: body.into(),
        received_at: at,
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    transport: Arc<MockTransport>,
    engine: Engine,
}

fn fixture(config: EngineConfig) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::new());
    let engine = Engine::new(
        config,
        &Lexicons::default(),
        store.clone() as Arc<dyn RecordStore>,
        transport.clone(),
    );
    Fixture {
        store,
        transport,
        engine,
    }
}

async fn seed_contact(store: &MemoryStore, stage: Stage) -> Contact {
    let mut contact = Contact::new_prospect(SELLER, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    contact.stage = stage;
    store.create_prospect(&contact).await.unwrap();
    contact
}

#[tokio::test]
async fn first_inbound_creates_prospect_and_advances_on_yes() {
    let f = fixture(EngineConfig::default());

    let outcome = f
        .engine
        .handle_inbound(sms("SM1", "Yes that's me", midday()), midday())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::Processed {
            intent: Intent::Affirm,
            stage: Stage::InterestFeeler,
            disposition: "replied",
        }
    );

    let contact = f.store.find_contact_by_phone(SELLER).await.unwrap().unwrap();
    assert_eq!(contact.stage, Stage::InterestFeeler);
    assert!(contact.ownership_verified);
    // Confirming ownership is not interest; still a prospect.
    assert_eq!(contact.kind, ContactKind::Prospect);
    assert_eq!(contact.reply_count, 1);
    assert_eq!(f.transport.sent_count().await, 1);
}

#[tokio::test]
async fn interest_yes_promotes_to_lead_once() {
    let f = fixture(EngineConfig::default());
    seed_contact(&f.store, Stage::InterestFeeler).await;

    f.engine
        .handle_inbound(sms("SM1", "yes definitely open to it", midday()), midday())
        .await
        .unwrap();

    let contact = f.store.find_contact_by_phone(SELLER).await.unwrap().unwrap();
    assert_eq!(contact.kind, ContactKind::Lead);
    assert_eq!(contact.stage, Stage::PriceQualification);

    // A later qualifying message on an existing lead changes nothing.
    let later = midday() + chrono::Duration::hours(1);
    f.engine
        .handle_inbound(sms("SM2", "what would you offer?", later), later)
        .await
        .unwrap();
    let contact = f.store.find_contact_by_phone(SELLER).await.unwrap().unwrap();
    assert_eq!(contact.kind, ContactKind::Lead);
}

#[tokio::test]
async fn price_reply_extracts_amount_and_moves_to_condition() {
    let f = fixture(EngineConfig::default());
    seed_contact(&f.store, Stage::PriceQualification).await;

    let outcome = f
        .engine
        .handle_inbound(sms("SM1", "I'd want $245k for it", midday()), midday())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::Processed {
            intent: Intent::PriceProvided,
            stage: Stage::PropertyCondition,
            disposition: "replied",
        }
    );
    let contact = f.store.find_contact_by_phone(SELLER).await.unwrap().unwrap();
    assert_eq!(contact.asking_price, Some(245_000));
    assert_eq!(contact.kind, ContactKind::Lead);
    assert_eq!(contact.urgency, Some(2));
    assert!(contact.quality_score.is_some_and(|q| q >= 65));
}

#[tokio::test]
async fn duplicate_message_id_replies_exactly_once() {
    let f = fixture(EngineConfig::default());

    let first = f
        .engine
        .handle_inbound(sms("SM1", "yes", midday()), midday())
        .await
        .unwrap();
    assert!(matches!(first, Outcome::Processed { .. }));

    let second = f
        .engine
        .handle_inbound(sms("SM1", "yes", midday()), midday())
        .await
        .unwrap();
    assert_eq!(second, Outcome::Duplicate);

    assert_eq!(f.transport.sent_count().await, 1);
    let contact = f.store.find_contact_by_phone(SELLER).await.unwrap().unwrap();
    assert_eq!(contact.reply_count, 1);
}

#[tokio::test]
async fn stop_halts_all_automation() {
    let f = fixture(EngineConfig::default());
    seed_contact(&f.store, Stage::InterestFeeler).await;

    let outcome = f
        .engine
        .handle_inbound(sms("SM1", "STOP", midday()), midday())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Processed {
            intent: Intent::OptOut,
            stage: Stage::OptOut,
            disposition: "none",
        }
    );

    let contact = f.store.find_contact_by_phone(SELLER).await.unwrap().unwrap();
    assert!(contact.opted_out);
    assert_eq!(contact.stage, Stage::OptOut);
    assert_eq!(f.transport.sent_count().await, 0);

    // Anything after the opt-out is suppressed without classification.
    let later = midday() + chrono::Duration::hours(2);
    let outcome = f
        .engine
        .handle_inbound(sms("SM2", "yes actually", later), later)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Processed {
            intent: Intent::Noop,
            stage: Stage::OptOut,
            disposition: "suppressed",
        }
    );
    assert_eq!(f.transport.sent_count().await, 0);
}

#[tokio::test]
async fn quiet_hours_defer_then_flush_in_the_morning() {
    let f = fixture(EngineConfig::default());

    let outcome = f
        .engine
        .handle_inbound(sms("SM1", "yep", late_evening()), late_evening())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Processed {
            intent: Intent::Affirm,
            stage: Stage::InterestFeeler,
            disposition: "deferred",
        }
    );
    assert_eq!(f.transport.sent_count().await, 0);

    let queued = f.store.deferred_entries().await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].status, DeferredStatus::Queued);

    // Still queued before the window opens.
    let predawn = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(); // 06:00 local
    assert_eq!(f.engine.flush_deferred(predawn).await.unwrap(), 0);

    // 09:30 local: due.
    let morning = Utc.with_ymd_and_hms(2026, 1, 15, 15, 30, 0).unwrap();
    assert_eq!(f.engine.flush_deferred(morning).await.unwrap(), 1);
    assert_eq!(f.transport.sent_count().await, 1);
    let entries = f.store.deferred_entries().await;
    assert_eq!(entries[0].status, DeferredStatus::Sent);
}

#[tokio::test]
async fn quiet_hours_drop_when_deferral_unavailable() {
    let config = EngineConfig {
        deferred_delivery_enabled: false,
        ..Default::default()
    };
    let f = fixture(config);

    let outcome = f
        .engine
        .handle_inbound(sms("SM1", "yep", late_evening()), late_evening())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Processed {
            intent: Intent::Affirm,
            stage: Stage::InterestFeeler,
            disposition: "dropped",
        }
    );
    assert_eq!(f.transport.sent_count().await, 0);
    assert!(f.store.deferred_entries().await.is_empty());
}

#[tokio::test]
async fn deferred_send_is_cancelled_after_opt_out() {
    let f = fixture(EngineConfig::default());

    f.engine
        .handle_inbound(sms("SM1", "yep", late_evening()), late_evening())
        .await
        .unwrap();
    assert_eq!(f.store.deferred_entries().await.len(), 1);

    // Opt out before the deferred send goes out.
    let predawn = Utc.with_ymd_and_hms(2026, 1, 15, 13, 0, 0).unwrap();
    f.engine
        .handle_inbound(sms("SM2", "STOP", predawn), predawn)
        .await
        .unwrap();

    let morning = Utc.with_ymd_and_hms(2026, 1, 15, 15, 30, 0).unwrap();
    assert_eq!(f.engine.flush_deferred(morning).await.unwrap(), 0);
    assert_eq!(f.transport.sent_count().await, 0);
    let entries = f.store.deferred_entries().await;
    assert_eq!(entries[0].status, DeferredStatus::Dropped);
}

#[tokio::test]
async fn recent_activity_suppresses_automated_reply() {
    let f = fixture(EngineConfig::default());
    let contact = seed_contact(&f.store, Stage::OwnershipConfirmation).await;

    // A human agent texted ten minutes ago.
    let patch = sms_autopilot::model::ContactPatch {
        last_activity_at: Some(midday() - chrono::Duration::minutes(10)),
        ..Default::default()
    };
    f.store.update_contact(contact.id, &patch).await.unwrap();

    let outcome = f
        .engine
        .handle_inbound(sms("SM1", "yes", midday()), midday())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Processed {
            intent: Intent::Affirm,
            stage: Stage::InterestFeeler,
            disposition: "suppressed",
        }
    );
    assert_eq!(f.transport.sent_count().await, 0);

    // The stage still advanced; only the reply was held back.
    let contact = f.store.find_contact_by_phone(SELLER).await.unwrap().unwrap();
    assert_eq!(contact.stage, Stage::InterestFeeler);
}

#[tokio::test]
async fn not_interested_verifies_ownership_and_queues_follow_up() {
    let f = fixture(EngineConfig::default());

    let outcome = f
        .engine
        .handle_inbound(sms("SM1", "no, not interested", midday()), midday())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Processed {
            intent: Intent::Deny,
            stage: Stage::InterestFeeler,
            disposition: "follow_up_queued",
        }
    );
    assert_eq!(f.transport.sent_count().await, 0);

    let contact = f.store.find_contact_by_phone(SELLER).await.unwrap().unwrap();
    assert!(contact.ownership_verified);
    assert_eq!(contact.kind, ContactKind::Prospect);

    let entries = f.store.deferred_entries().await;
    assert_eq!(entries.len(), 1);
    // Roughly thirty days out in business-local time.
    let days_out = entries[0].scheduled_for.date() - chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
    assert_eq!(days_out.num_days(), 30);
}

#[tokio::test]
async fn wrong_number_goes_to_dnc_silently() {
    let f = fixture(EngineConfig::default());
    seed_contact(&f.store, Stage::InterestFeeler).await;

    let outcome = f
        .engine
        .handle_inbound(sms("SM1", "you have the wrong number", midday()), midday())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Processed {
            intent: Intent::WrongNumber,
            stage: Stage::Dnc,
            disposition: "none",
        }
    );
    assert_eq!(f.transport.sent_count().await, 0);
    let contact = f.store.find_contact_by_phone(SELLER).await.unwrap().unwrap();
    assert_eq!(contact.stage, Stage::Dnc);
}

#[tokio::test]
async fn invalid_payload_is_rejected_without_side_effects() {
    let f = fixture(EngineConfig::default());

    let outcome = f
        .engine
        .handle_inbound(sms("SM1", "   ", midday()), midday())
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Rejected(_)));
    assert!(f.store.find_contact_by_phone(SELLER).await.unwrap().is_none());
    assert_eq!(f.transport.sent_count().await, 0);
}

#[tokio::test]
async fn poll_once_drains_claimed_backlog() {
    let f = fixture(EngineConfig::default());

    // Messages claimed long ago by a dead worker.
    let stale_at = midday() - chrono::Duration::hours(2);
    f.store
        .claim_inbound(&sms("SM1", "yes", stale_at), "dead-worker", stale_at, std::time::Duration::from_secs(900))
        .await
        .unwrap();

    let processed = f.engine.poll_once(midday()).await.unwrap();
    assert_eq!(processed, 1);
    let contact = f.store.find_contact_by_phone(SELLER).await.unwrap().unwrap();
    assert_eq!(contact.stage, Stage::InterestFeeler);
}
