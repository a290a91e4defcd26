//! libSQL backend — async `RecordStore` implementation.
//!
//! Supports local file and in-memory databases. Contacts are matched on
//! the last ten phone digits so provider formatting differences never
//! create duplicate rows.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::{Connection, Database, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    Contact, ContactKind, ContactPatch, ConversationEvent, DeferredEntry, DeferredStatus,
    Direction, InboundSms, Stage, last_10_digits,
};
use crate::store::migrations;
use crate::store::traits::{ClaimState, RecordStore};

/// libSQL store.
///
/// Holds a single connection reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<Database>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

const SCHEDULE_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn kind_to_str(kind: ContactKind) -> &'static str {
    match kind {
        ContactKind::Prospect => "prospect",
        ContactKind::Lead => "lead",
    }
}

fn str_to_kind(s: &str) -> ContactKind {
    match s {
        "lead" => ContactKind::Lead,
        _ => ContactKind::Prospect,
    }
}

fn direction_to_str(direction: Direction) -> &'static str {
    match direction {
        Direction::Inbound => "inbound",
        Direction::Outbound => "outbound",
    }
}

fn str_to_direction(s: &str) -> Direction {
    match s {
        "outbound" => Direction::Outbound,
        _ => Direction::Inbound,
    }
}

fn deferred_status_to_str(status: DeferredStatus) -> &'static str {
    match status {
        DeferredStatus::Queued => "queued",
        DeferredStatus::Sent => "sent",
        DeferredStatus::Dropped => "dropped",
    }
}

fn str_to_deferred_status(s: &str) -> DeferredStatus {
    match s {
        "sent" => DeferredStatus::Sent,
        "dropped" => DeferredStatus::Dropped,
        _ => DeferredStatus::Queued,
    }
}

/// Convert `Option<String>` to a libsql Value.
fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_i64(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

const CONTACT_COLUMNS: &str = "id, kind, phone, market, owner_name, property_address, \
     property_locality, asking_price, condition_notes, timeline, urgency, quality_score, stage, \
     ownership_verified, opted_out, last_inbound_at, last_outbound_at, last_activity_at, \
     reply_count, send_count, created_at";

const EVENT_COLUMNS: &str = "id, message_id, direction, from_phone, to_phone, body, intent, \
     stage, contact_id, contact_kind, received_at, processed_at, sent_at, summary, claimed_by, \
     claimed_at";

const DEFERRED_COLUMNS: &str =
    "id, contact_id, to_phone, from_phone, body, scheduled_for, status, created_at";

/// Map a libsql Row to a Contact. Column order matches CONTACT_COLUMNS.
fn row_to_contact(row: &libsql::Row) -> Result<Contact, libsql::Error> {
    let id_str: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let notes_str: String = row.get::<String>(8).unwrap_or_else(|_| "[]".into());
    let stage_str: String = row.get(12)?;
    let verified: i64 = row.get(13)?;
    let opted_out: i64 = row.get(14)?;
    let last_inbound: Option<String> = row.get(15).ok();
    let last_outbound: Option<String> = row.get(16).ok();
    let last_activity: Option<String> = row.get(17).ok();
    let created_str: String = row.get(20)?;

    Ok(Contact {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        kind: str_to_kind(&kind_str),
        phone: row.get(2)?,
        market: row.get(3).ok(),
        owner_name: row.get(4).ok(),
        property_address: row.get(5).ok(),
        property_locality: row.get(6).ok(),
        asking_price: row.get(7).ok(),
        condition_notes: serde_json::from_str(&notes_str).unwrap_or_default(),
        timeline: row.get(9).ok(),
        urgency: row.get::<i64>(10).ok().map(|v| v as u8),
        quality_score: row.get::<i64>(11).ok().map(|v| v as u8),
        stage: Stage::parse(&stage_str),
        ownership_verified: verified != 0,
        opted_out: opted_out != 0,
        last_inbound_at: parse_optional_datetime(&last_inbound),
        last_outbound_at: parse_optional_datetime(&last_outbound),
        last_activity_at: parse_optional_datetime(&last_activity),
        reply_count: row.get::<i64>(18).unwrap_or(0) as u32,
        send_count: row.get::<i64>(19).unwrap_or(0) as u32,
        created_at: parse_datetime(&created_str),
    })
}

/// Map a libsql Row to a ConversationEvent. Column order matches EVENT_COLUMNS.
fn row_to_event(row: &libsql::Row) -> Result<ConversationEvent, libsql::Error> {
    let id_str: String = row.get(0)?;
    let direction_str: String = row.get(2)?;
    let stage_str: Option<String> = row.get(7).ok();
    let contact_id_str: Option<String> = row.get(8).ok();
    let kind_str: Option<String> = row.get(9).ok();
    let received_str: Option<String> = row.get(10).ok();
    let processed_str: Option<String> = row.get(11).ok();
    let sent_str: Option<String> = row.get(12).ok();
    let claimed_str: Option<String> = row.get(15).ok();

    Ok(ConversationEvent {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        message_id: row.get(1)?,
        direction: str_to_direction(&direction_str),
        from_phone: row.get(3)?,
        to_phone: row.get(4)?,
        body: row.get(5)?,
        intent: row.get(6).ok(),
        stage: stage_str.as_deref().map(Stage::parse).unwrap_or(Stage::OwnershipConfirmation),
        contact_id: contact_id_str
            .and_then(|s| Uuid::parse_str(&s).ok())
            .unwrap_or_else(Uuid::nil),
        contact_kind: kind_str.as_deref().map(str_to_kind).unwrap_or(ContactKind::Prospect),
        received_at: received_str
            .map(|s| parse_datetime(&s))
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
        processed_at: parse_optional_datetime(&processed_str),
        sent_at: parse_optional_datetime(&sent_str),
        summary: row.get(13).ok(),
        claimed_by: row.get(14).ok(),
        claimed_at: parse_optional_datetime(&claimed_str),
    })
}

/// Map a libsql Row to a DeferredEntry. Column order matches DEFERRED_COLUMNS.
fn row_to_deferred(row: &libsql::Row) -> Result<DeferredEntry, libsql::Error> {
    let id_str: String = row.get(0)?;
    let contact_str: String = row.get(1)?;
    let scheduled_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let created_str: String = row.get(7)?;

    Ok(DeferredEntry {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        contact_id: Uuid::parse_str(&contact_str).unwrap_or_else(|_| Uuid::nil()),
        to_phone: row.get(2)?,
        from_phone: row.get(3)?,
        body: row.get(4)?,
        scheduled_for: NaiveDateTime::parse_from_str(&scheduled_str, SCHEDULE_FMT)
            .unwrap_or(NaiveDateTime::MIN),
        status: str_to_deferred_status(&status_str),
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl RecordStore for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn find_contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, StoreError> {
        let Some(tail) = last_10_digits(phone) else {
            return Ok(None);
        };
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE phone_tail = ?1"),
                params![tail],
            )
            .await
            .map_err(|e| StoreError::Query(format!("find_contact_by_phone: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let contact = row_to_contact(&row)
                    .map_err(|e| StoreError::Query(format!("find_contact_by_phone row: {e}")))?;
                Ok(Some(contact))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("find_contact_by_phone: {e}"))),
        }
    }

    async fn create_prospect(&self, contact: &Contact) -> Result<(), StoreError> {
        let tail = last_10_digits(&contact.phone).unwrap_or_else(|| contact.phone.clone());
        let notes = serde_json::to_string(&contact.condition_notes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO contacts (id, kind, phone, phone_tail, market, owner_name, \
                 property_address, property_locality, asking_price, condition_notes, timeline, \
                 urgency, quality_score, stage, ownership_verified, opted_out, last_inbound_at, \
                 last_outbound_at, last_activity_at, reply_count, send_count, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
                params![
                    contact.id.to_string(),
                    kind_to_str(contact.kind),
                    contact.phone.clone(),
                    tail,
                    opt_text(contact.market.clone()),
                    opt_text(contact.owner_name.clone()),
                    opt_text(contact.property_address.clone()),
                    opt_text(contact.property_locality.clone()),
                    opt_i64(contact.asking_price),
                    notes,
                    opt_text(contact.timeline.clone()),
                    opt_i64(contact.urgency.map(i64::from)),
                    opt_i64(contact.quality_score.map(i64::from)),
                    contact.stage.label(),
                    contact.ownership_verified as i64,
                    contact.opted_out as i64,
                    opt_text(contact.last_inbound_at.map(|t| t.to_rfc3339())),
                    opt_text(contact.last_outbound_at.map(|t| t.to_rfc3339())),
                    opt_text(contact.last_activity_at.map(|t| t.to_rfc3339())),
                    contact.reply_count as i64,
                    contact.send_count as i64,
                    contact.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("create_prospect: {e}")))?;

        debug!(contact_id = %contact.id, phone = %contact.phone, "Prospect created");
        Ok(())
    }

    async fn update_contact(&self, id: Uuid, patch: &ContactPatch) -> Result<(), StoreError> {
        let mut sets: Vec<String> = Vec::new();
        let mut args: Vec<libsql::Value> = Vec::new();

        let bind = |column: &str, value: libsql::Value, sets: &mut Vec<String>, args: &mut Vec<libsql::Value>| {
            args.push(value);
            sets.push(format!("{column} = ?{}", args.len()));
        };

        if let Some(kind) = patch.kind {
            bind("kind", kind_to_str(kind).to_string().into(), &mut sets, &mut args);
        }
        if let Some(stage) = patch.stage {
            bind("stage", stage.label().to_string().into(), &mut sets, &mut args);
        }
        if let Some(price) = patch.asking_price {
            bind("asking_price", libsql::Value::Integer(price), &mut sets, &mut args);
        }
        if let Some(ref notes) = patch.condition_notes {
            let json = serde_json::to_string(notes)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            bind("condition_notes", json.into(), &mut sets, &mut args);
        }
        if let Some(ref timeline) = patch.timeline {
            bind("timeline", timeline.clone().into(), &mut sets, &mut args);
        }
        if let Some(urgency) = patch.urgency {
            bind("urgency", libsql::Value::Integer(urgency as i64), &mut sets, &mut args);
        }
        if let Some(quality) = patch.quality_score {
            bind("quality_score", libsql::Value::Integer(quality as i64), &mut sets, &mut args);
        }
        if let Some(verified) = patch.ownership_verified {
            bind("ownership_verified", libsql::Value::Integer(verified as i64), &mut sets, &mut args);
        }
        if let Some(opted_out) = patch.opted_out {
            bind("opted_out", libsql::Value::Integer(opted_out as i64), &mut sets, &mut args);
        }
        if let Some(t) = patch.last_inbound_at {
            bind("last_inbound_at", t.to_rfc3339().into(), &mut sets, &mut args);
        }
        if let Some(t) = patch.last_outbound_at {
            bind("last_outbound_at", t.to_rfc3339().into(), &mut sets, &mut args);
        }
        if let Some(t) = patch.last_activity_at {
            bind("last_activity_at", t.to_rfc3339().into(), &mut sets, &mut args);
        }
        if patch.increment_reply_count {
            sets.push("reply_count = reply_count + 1".into());
        }
        if patch.increment_send_count {
            sets.push("send_count = send_count + 1".into());
        }

        if sets.is_empty() {
            return Ok(());
        }

        args.push(id.to_string().into());
        let sql = format!(
            "UPDATE contacts SET {} WHERE id = ?{}",
            sets.join(", "),
            args.len()
        );
        self.conn()
            .execute(&sql, args)
            .await
            .map_err(|e| StoreError::Query(format!("update_contact: {e}")))?;
        Ok(())
    }

    async fn claim_inbound(
        &self,
        sms: &InboundSms,
        claimed_by: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<ClaimState, StoreError> {
        let existing = self.get_event(&sms.message_id).await?;

        match existing {
            None => {
                self.conn()
                    .execute(
                        "INSERT INTO events (id, message_id, direction, from_phone, to_phone, \
                         body, received_at, claimed_by, claimed_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        params![
                            Uuid::new_v4().to_string(),
                            sms.message_id.clone(),
                            direction_to_str(Direction::Inbound),
                            sms.from_phone.clone(),
                            sms.to_phone.clone(),
                            sms.body.clone(),
                            sms.received_at.to_rfc3339(),
                            claimed_by,
                            now.to_rfc3339(),
                        ],
                    )
                    .await
                    .map_err(|e| StoreError::Query(format!("claim_inbound insert: {e}")))?;
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
                        self.conn()
                            .execute(
                                "UPDATE events SET claimed_by = ?1, claimed_at = ?2 WHERE message_id = ?3",
                                params![claimed_by, now.to_rfc3339(), sms.message_id.clone()],
                            )
                            .await
                            .map_err(|e| StoreError::Query(format!("claim_inbound reclaim: {e}")))?;
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
        self.conn()
            .execute(
                "UPDATE events SET intent = ?1, stage = ?2, contact_id = ?3, contact_kind = ?4, \
                 summary = ?5, processed_at = ?6 WHERE message_id = ?7 AND processed_at IS NULL",
                params![
                    intent,
                    stage.label(),
                    contact_id.to_string(),
                    kind_to_str(contact_kind),
                    opt_text(summary.map(String::from)),
                    processed_at.to_rfc3339(),
                    message_id,
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("mark_event_processed: {e}")))?;
        Ok(())
    }

    async fn get_event(&self, message_id: &str) -> Result<Option<ConversationEvent>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE message_id = ?1"),
                params![message_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_event: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let event = row_to_event(&row)
                    .map_err(|e| StoreError::Query(format!("get_event row: {e}")))?;
                Ok(Some(event))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_event: {e}"))),
        }
    }

    async fn record_outbound(&self, event: &ConversationEvent) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO events (id, message_id, direction, from_phone, to_phone, \
                 body, intent, stage, contact_id, contact_kind, received_at, processed_at, \
                 sent_at, summary) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    event.id.to_string(),
                    event.message_id.clone(),
                    direction_to_str(event.direction),
                    event.from_phone.clone(),
                    event.to_phone.clone(),
                    event.body.clone(),
                    opt_text(event.intent.clone()),
                    event.stage.label(),
                    event.contact_id.to_string(),
                    kind_to_str(event.contact_kind),
                    event.received_at.to_rfc3339(),
                    opt_text(event.processed_at.map(|t| t.to_rfc3339())),
                    opt_text(event.sent_at.map(|t| t.to_rfc3339())),
                    opt_text(event.summary.clone()),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("record_outbound: {e}")))?;
        Ok(())
    }

    async fn unprocessed_inbound(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<Vec<InboundSms>, StoreError> {
        let stale_cutoff = now
            - chrono::Duration::from_std(stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(900));
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM events \
                     WHERE direction = 'inbound' AND processed_at IS NULL \
                       AND (claimed_at IS NULL OR claimed_at < ?1) \
                     ORDER BY received_at ASC LIMIT ?2"
                ),
                params![stale_cutoff.to_rfc3339(), limit as i64],
            )
            .await
            .map_err(|e| StoreError::Query(format!("unprocessed_inbound: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("unprocessed_inbound: {e}")))?
        {
            let event = row_to_event(&row)
                .map_err(|e| StoreError::Query(format!("unprocessed_inbound row: {e}")))?;
            out.push(InboundSms {
                message_id: event.message_id,
                from_phone: event.from_phone,
                to_phone: event.to_phone,
                body: event.body,
                received_at: event.received_at,
            });
        }
        Ok(out)
    }

    async fn create_deferred_entry(&self, entry: &DeferredEntry) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO deferred (id, contact_id, to_phone, from_phone, body, \
                 scheduled_for, status, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.id.to_string(),
                    entry.contact_id.to_string(),
                    entry.to_phone.clone(),
                    entry.from_phone.clone(),
                    entry.body.clone(),
                    entry.scheduled_for.format(SCHEDULE_FMT).to_string(),
                    deferred_status_to_str(entry.status),
                    entry.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("create_deferred_entry: {e}")))?;
        Ok(())
    }

    async fn due_deferred_entries(
        &self,
        cutoff: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<DeferredEntry>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DEFERRED_COLUMNS} FROM deferred \
                     WHERE status = 'queued' AND scheduled_for <= ?1 \
                     ORDER BY scheduled_for ASC LIMIT ?2"
                ),
                params![cutoff.format(SCHEDULE_FMT).to_string(), limit as i64],
            )
            .await
            .map_err(|e| StoreError::Query(format!("due_deferred_entries: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("due_deferred_entries: {e}")))?
        {
            let entry = row_to_deferred(&row)
                .map_err(|e| StoreError::Query(format!("due_deferred_entries row: {e}")))?;
            out.push(entry);
        }
        Ok(out)
    }

    async fn update_deferred_status(
        &self,
        id: Uuid,
        status: DeferredStatus,
    ) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE deferred SET status = ?1 WHERE id = ?2",
                params![deferred_status_to_str(status), id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("update_deferred_status: {e}")))?;
        Ok(())
    }
}
