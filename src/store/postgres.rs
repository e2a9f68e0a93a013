//! PostgreSQL store
//!
//! Statuses and enums are stored as TEXT and parsed on read. Every workflow commit runs
//! in one transaction guarded by an optimistic `status`/`updated_at` check on the
//! request row.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{
    AvailabilityChange, CommitOutcome, PageWindow, RequestFilter, RequestScope, StoreError,
    StoreResult, TransitionCommit, WorkflowStore,
};
use crate::domain::{
    Notification, Payment, PaymentStatus, RequestNote, ServiceRequest, ServiceRequestStatus,
    ServicemanProfile, StatusHistoryEntry, UserAccount,
};
use crate::services::availability::desired_availability;
use crate::services::ratings::apply_review;
use crate::workflow::Effect;

// ============================================================================
// Database Row Types
// ============================================================================

fn parse<T>(column: &str, value: &str) -> StoreResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e| StoreError::Decode(format!("{}: {}", column, e)))
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    role: String,
    full_name: String,
    email: String,
    phone_number: Option<String>,
}

impl TryFrom<UserRow> for UserAccount {
    type Error = StoreError;

    fn try_from(r: UserRow) -> StoreResult<Self> {
        Ok(UserAccount {
            id: r.id,
            role: parse("users.role", &r.role)?,
            full_name: r.full_name,
            email: r.email,
            phone_number: r.phone_number,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    user_id: Uuid,
    category_id: Option<Uuid>,
    rating: Decimal,
    total_jobs_completed: i32,
    is_available: bool,
    is_approved: bool,
    updated_at: DateTime<Utc>,
}

impl From<ProfileRow> for ServicemanProfile {
    fn from(r: ProfileRow) -> Self {
        ServicemanProfile {
            user_id: r.user_id,
            category_id: r.category_id,
            rating: r.rating,
            total_jobs_completed: r.total_jobs_completed,
            is_available: r.is_available,
            is_approved: r.is_approved,
            updated_at: r.updated_at,
        }
    }
}

const PROFILE_COLUMNS: &str =
    "user_id, category_id, rating, total_jobs_completed, is_available, is_approved, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct ServiceRequestRow {
    id: Uuid,
    client_id: Uuid,
    serviceman_id: Option<Uuid>,
    backup_serviceman_id: Option<Uuid>,
    preferred_serviceman_id: Option<Uuid>,
    category_id: Uuid,
    booking_date: NaiveDate,
    is_emergency: bool,
    auto_flagged_emergency: bool,
    initial_booking_fee: Decimal,
    serviceman_estimated_cost: Option<Decimal>,
    admin_markup_percentage: Decimal,
    final_cost: Option<Decimal>,
    status: String,
    client_address: String,
    service_description: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    inspection_completed_at: Option<DateTime<Utc>>,
    work_completed_at: Option<DateTime<Utc>>,
    is_deleted: bool,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<ServiceRequestRow> for ServiceRequest {
    type Error = StoreError;

    fn try_from(r: ServiceRequestRow) -> StoreResult<Self> {
        Ok(ServiceRequest {
            id: r.id,
            client_id: r.client_id,
            serviceman_id: r.serviceman_id,
            backup_serviceman_id: r.backup_serviceman_id,
            preferred_serviceman_id: r.preferred_serviceman_id,
            category_id: r.category_id,
            booking_date: r.booking_date,
            is_emergency: r.is_emergency,
            auto_flagged_emergency: r.auto_flagged_emergency,
            initial_booking_fee: r.initial_booking_fee,
            serviceman_estimated_cost: r.serviceman_estimated_cost,
            admin_markup_percentage: r.admin_markup_percentage,
            final_cost: r.final_cost,
            status: parse("service_requests.status", &r.status)?,
            client_address: r.client_address,
            service_description: r.service_description,
            created_at: r.created_at,
            updated_at: r.updated_at,
            inspection_completed_at: r.inspection_completed_at,
            work_completed_at: r.work_completed_at,
            is_deleted: r.is_deleted,
            deleted_at: r.deleted_at,
        })
    }
}

const REQUEST_COLUMNS: &str = "id, client_id, serviceman_id, backup_serviceman_id, preferred_serviceman_id, \
     category_id, booking_date, is_emergency, auto_flagged_emergency, initial_booking_fee, \
     serviceman_estimated_cost, admin_markup_percentage, final_cost, status, client_address, \
     service_description, created_at, updated_at, inspection_completed_at, work_completed_at, \
     is_deleted, deleted_at";

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    service_request_id: Uuid,
    previous_status: Option<String>,
    new_status: String,
    changed_by: Option<Uuid>,
    changed_at: DateTime<Utc>,
    notes: String,
    is_automated: bool,
}

impl TryFrom<HistoryRow> for StatusHistoryEntry {
    type Error = StoreError;

    fn try_from(r: HistoryRow) -> StoreResult<Self> {
        Ok(StatusHistoryEntry {
            id: r.id,
            service_request_id: r.service_request_id,
            previous_status: r
                .previous_status
                .as_deref()
                .map(|s| parse("history.previous_status", s))
                .transpose()?,
            new_status: parse("history.new_status", &r.new_status)?,
            changed_by: r.changed_by,
            changed_at: r.changed_at,
            notes: r.notes,
            is_automated: r.is_automated,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NoteRow {
    id: Uuid,
    service_request_id: Uuid,
    created_by: Option<Uuid>,
    note_type: String,
    content: String,
    is_visible_to_client: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NoteRow> for RequestNote {
    type Error = StoreError;

    fn try_from(r: NoteRow) -> StoreResult<Self> {
        Ok(RequestNote {
            id: r.id,
            service_request_id: r.service_request_id,
            created_by: r.created_by,
            note_type: parse("notes.note_type", &r.note_type)?,
            content: r.content,
            is_visible_to_client: r.is_visible_to_client,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    service_request_id: Option<Uuid>,
    payer_id: Uuid,
    payment_type: String,
    amount: Decimal,
    reference: String,
    access_code: String,
    status: String,
    is_emergency: bool,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(r: PaymentRow) -> StoreResult<Self> {
        Ok(Payment {
            id: r.id,
            service_request_id: r.service_request_id,
            payer_id: r.payer_id,
            payment_type: parse("payments.payment_type", &r.payment_type)?,
            amount: r.amount,
            reference: r.reference,
            access_code: r.access_code,
            status: parse("payments.status", &r.status)?,
            is_emergency: r.is_emergency,
            paid_at: r.paid_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

const PAYMENT_COLUMNS: &str = "id, service_request_id, payer_id, payment_type, amount, reference, \
     access_code, status, is_emergency, paid_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: Uuid,
    #[sqlx(rename = "type")]
    notification_type: String,
    title: String,
    message: String,
    service_request_id: Option<Uuid>,
    is_read: bool,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<NotificationRow> for Notification {
    fn from(r: NotificationRow) -> Self {
        Notification {
            id: r.id,
            user_id: r.user_id,
            notification_type: r.notification_type.into(),
            title: r.title,
            message: r.message,
            service_request_id: r.service_request_id,
            is_read: r.is_read,
            read_at: r.read_at,
            created_at: r.created_at,
        }
    }
}

fn collect<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ============================================================================
// Transaction helpers
// ============================================================================

async fn insert_request(conn: &mut PgConnection, r: &ServiceRequest) -> StoreResult<()> {
    sqlx::query(&format!(
        "INSERT INTO service_requests ({}) VALUES \
         ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)",
        REQUEST_COLUMNS
    ))
    .bind(r.id)
    .bind(r.client_id)
    .bind(r.serviceman_id)
    .bind(r.backup_serviceman_id)
    .bind(r.preferred_serviceman_id)
    .bind(r.category_id)
    .bind(r.booking_date)
    .bind(r.is_emergency)
    .bind(r.auto_flagged_emergency)
    .bind(r.initial_booking_fee)
    .bind(r.serviceman_estimated_cost)
    .bind(r.admin_markup_percentage)
    .bind(r.final_cost)
    .bind(r.status.as_str())
    .bind(&r.client_address)
    .bind(&r.service_description)
    .bind(r.created_at)
    .bind(r.updated_at)
    .bind(r.inspection_completed_at)
    .bind(r.work_completed_at)
    .bind(r.is_deleted)
    .bind(r.deleted_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Optimistic update: only succeeds if the row still has the status and timestamp it
/// was planned from
async fn update_request(
    conn: &mut PgConnection,
    r: &ServiceRequest,
    expected: ServiceRequestStatus,
    expected_updated_at: Option<DateTime<Utc>>,
) -> StoreResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE service_requests SET
            serviceman_id = $2,
            backup_serviceman_id = $3,
            serviceman_estimated_cost = $4,
            admin_markup_percentage = $5,
            final_cost = $6,
            status = $7,
            updated_at = $8,
            inspection_completed_at = $9,
            work_completed_at = $10
        WHERE id = $1
          AND is_deleted = false
          AND status = $11
          AND ($12::timestamptz IS NULL OR updated_at = $12)
        "#,
    )
    .bind(r.id)
    .bind(r.serviceman_id)
    .bind(r.backup_serviceman_id)
    .bind(r.serviceman_estimated_cost)
    .bind(r.admin_markup_percentage)
    .bind(r.final_cost)
    .bind(r.status.as_str())
    .bind(r.updated_at)
    .bind(r.inspection_completed_at)
    .bind(r.work_completed_at)
    .bind(expected.as_str())
    .bind(expected_updated_at)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let current: Option<String> =
        sqlx::query_scalar("SELECT status FROM service_requests WHERE id = $1 AND is_deleted = false")
            .bind(r.id)
            .fetch_optional(&mut *conn)
            .await?;

    match current {
        None => Err(StoreError::NotFound(format!("service request {}", r.id))),
        Some(status) => {
            let current: ServiceRequestStatus = parse("service_requests.status", &status)?;
            if current != expected {
                Err(StoreError::StatusMismatch {
                    request_id: r.id,
                    current,
                })
            } else {
                Err(StoreError::Stale(r.id))
            }
        }
    }
}

async fn lock_profile(conn: &mut PgConnection, serviceman_id: Uuid) -> StoreResult<Option<ServicemanProfile>> {
    let row = sqlx::query_as::<_, ProfileRow>(&format!(
        "SELECT {} FROM serviceman_profiles WHERE user_id = $1 FOR UPDATE",
        PROFILE_COLUMNS
    ))
    .bind(serviceman_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(Into::into))
}

/// Recomputes availability for one serviceman inside the caller's transaction.
///
/// The profile row is locked before counting, so the count observes every transaction
/// that committed a change for this serviceman ahead of us.
async fn reconcile_in(conn: &mut PgConnection, serviceman_id: Uuid) -> StoreResult<Option<AvailabilityChange>> {
    let Some(profile) = lock_profile(conn, serviceman_id).await? else {
        return Ok(None);
    };

    let active_jobs: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM service_requests
        WHERE status = $1
          AND is_deleted = false
          AND (serviceman_id = $2 OR backup_serviceman_id = $2)
        "#,
    )
    .bind(ServiceRequestStatus::InProgress.as_str())
    .bind(serviceman_id)
    .fetch_one(&mut *conn)
    .await?;

    let desired = desired_availability(active_jobs);
    if profile.is_available == desired {
        return Ok(None);
    }

    sqlx::query("UPDATE serviceman_profiles SET is_available = $2, updated_at = NOW() WHERE user_id = $1")
        .bind(serviceman_id)
        .bind(desired)
        .execute(&mut *conn)
        .await?;

    Ok(Some(AvailabilityChange {
        serviceman_id,
        is_available: desired,
        active_jobs,
    }))
}

// ============================================================================
// Store
// ============================================================================

#[derive(Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserAccount>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, role, full_name, email, phone_number FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserAccount::try_from).transpose()
    }

    async fn list_admin_ids(&self) -> StoreResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar("SELECT id FROM users WHERE role = 'ADMIN' ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn get_serviceman_profile(&self, user_id: Uuid) -> StoreResult<Option<ServicemanProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {} FROM serviceman_profiles WHERE user_id = $1",
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_request(&self, id: Uuid) -> StoreResult<Option<ServiceRequest>> {
        let row = sqlx::query_as::<_, ServiceRequestRow>(&format!(
            "SELECT {} FROM service_requests WHERE id = $1 AND is_deleted = false",
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ServiceRequest::try_from).transpose()
    }

    async fn list_requests(
        &self,
        filter: RequestFilter,
        page: PageWindow,
    ) -> StoreResult<(Vec<ServiceRequest>, u64)> {
        let (client_id, serviceman_id) = match filter.scope {
            RequestScope::All => (None, None),
            RequestScope::Client(id) => (Some(id), None),
            RequestScope::Serviceman(id) => (None, Some(id)),
        };
        let status = filter.status.map(|s| s.as_str());

        let conditions = r#"
            is_deleted = false
            AND ($1::uuid IS NULL OR client_id = $1)
            AND ($2::uuid IS NULL OR serviceman_id = $2 OR backup_serviceman_id = $2)
            AND ($3::text IS NULL OR status = $3)
        "#;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM service_requests WHERE {}",
            conditions
        ))
        .bind(client_id)
        .bind(serviceman_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, ServiceRequestRow>(&format!(
            "SELECT {} FROM service_requests WHERE {} ORDER BY created_at DESC LIMIT $4 OFFSET $5",
            REQUEST_COLUMNS, conditions
        ))
        .bind(client_id)
        .bind(serviceman_id)
        .bind(status)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((collect(rows)?, total.max(0) as u64))
    }

    async fn commit_transition(&self, commit: TransitionCommit<'_>) -> StoreResult<CommitOutcome> {
        let request = commit.request;
        let mut tx = self.pool.begin().await?;

        match commit.expected_status {
            Some(expected) => update_request(&mut *tx, request, expected, commit.expected_updated_at).await?,
            None => insert_request(&mut *tx, request).await?,
        }

        // Lock every touched profile up front, in id order, so two commits touching
        // the same servicemen cannot deadlock
        let mut touched: Vec<Uuid> = commit
            .effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::IncrementJobsCompleted { serviceman_id }
                | Effect::ApplyReview { serviceman_id, .. }
                | Effect::ReconcileAvailability { serviceman_id } => Some(*serviceman_id),
                Effect::LinkPayment { .. } | Effect::SettlePayment { .. } => None,
            })
            .collect();
        touched.sort();
        touched.dedup();
        for serviceman_id in &touched {
            lock_profile(&mut *tx, *serviceman_id).await?;
        }

        let mut new_rating = None;
        let mut to_reconcile = Vec::new();
        for effect in commit.effects {
            match effect {
                Effect::LinkPayment { reference } => {
                    let linked = sqlx::query(
                        r#"
                        UPDATE payments SET service_request_id = $1, updated_at = NOW()
                        WHERE reference = $2 AND service_request_id IS NULL AND status = 'SUCCESSFUL'
                        "#,
                    )
                    .bind(request.id)
                    .bind(reference)
                    .execute(&mut *tx)
                    .await?;
                    if linked.rows_affected() != 1 {
                        return Err(StoreError::PaymentUnavailable(reference.clone()));
                    }
                }
                Effect::SettlePayment { reference, paid_at } => {
                    let settled = sqlx::query(
                        r#"
                        UPDATE payments
                        SET status = 'SUCCESSFUL', paid_at = COALESCE(paid_at, $3), updated_at = NOW()
                        WHERE reference = $1 AND service_request_id = $2
                        "#,
                    )
                    .bind(reference)
                    .bind(request.id)
                    .bind(paid_at)
                    .execute(&mut *tx)
                    .await?;
                    if settled.rows_affected() != 1 {
                        return Err(StoreError::PaymentUnavailable(reference.clone()));
                    }
                }
                Effect::IncrementJobsCompleted { serviceman_id } => {
                    let updated = sqlx::query(
                        r#"
                        UPDATE serviceman_profiles
                        SET total_jobs_completed = total_jobs_completed + 1, updated_at = NOW()
                        WHERE user_id = $1
                        "#,
                    )
                    .bind(serviceman_id)
                    .execute(&mut *tx)
                    .await?;
                    if updated.rows_affected() != 1 {
                        return Err(StoreError::NotFound(format!("serviceman profile {}", serviceman_id)));
                    }
                }
                Effect::ApplyReview { serviceman_id, score } => {
                    let mut profile = lock_profile(&mut *tx, *serviceman_id)
                        .await?
                        .ok_or_else(|| StoreError::NotFound(format!("serviceman profile {}", serviceman_id)))?;
                    let rating = apply_review(&mut profile, *score)?;
                    sqlx::query("UPDATE serviceman_profiles SET rating = $2, updated_at = NOW() WHERE user_id = $1")
                        .bind(serviceman_id)
                        .bind(rating)
                        .execute(&mut *tx)
                        .await?;
                    new_rating = Some((*serviceman_id, rating));
                }
                Effect::ReconcileAvailability { serviceman_id } => to_reconcile.push(*serviceman_id),
            }
        }

        to_reconcile.sort();
        to_reconcile.dedup();
        let mut availability_changes = Vec::new();
        for serviceman_id in to_reconcile {
            if let Some(change) = reconcile_in(&mut *tx, serviceman_id).await? {
                availability_changes.push(change);
            }
        }

        if let Some(h) = commit.history {
            sqlx::query(
                r#"
                INSERT INTO service_request_status_history
                    (id, service_request_id, previous_status, new_status, changed_by, changed_at, notes, is_automated)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(h.id)
            .bind(h.service_request_id)
            .bind(h.previous_status.map(|s| s.as_str()))
            .bind(h.new_status.as_str())
            .bind(h.changed_by)
            .bind(h.changed_at)
            .bind(&h.notes)
            .bind(h.is_automated)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(note) = commit.note {
            insert_note(&mut *tx, note).await?;
        }

        tx.commit().await?;

        Ok(CommitOutcome {
            request: request.clone(),
            availability_changes,
            new_rating,
        })
    }

    async fn reconcile_availability(&self, serviceman_id: Uuid) -> StoreResult<Option<AvailabilityChange>> {
        let mut tx = self.pool.begin().await?;
        let change = reconcile_in(&mut *tx, serviceman_id).await?;
        tx.commit().await?;
        Ok(change)
    }

    async fn status_history(&self, request_id: Uuid) -> StoreResult<Vec<StatusHistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, service_request_id, previous_status, new_status, changed_by, changed_at, notes, is_automated
            FROM service_request_status_history
            WHERE service_request_id = $1
            ORDER BY changed_at DESC
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn insert_note(&self, note: &RequestNote) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_note(&mut *conn, note).await
    }

    async fn list_notes(&self, request_id: Uuid, client_visible_only: bool) -> StoreResult<Vec<RequestNote>> {
        let rows = sqlx::query_as::<_, NoteRow>(
            r#"
            SELECT id, service_request_id, created_by, note_type, content, is_visible_to_client, created_at, updated_at
            FROM service_request_notes
            WHERE service_request_id = $1
              AND ($2::bool = false OR is_visible_to_client = true)
            ORDER BY created_at ASC
            "#,
        )
        .bind(request_id)
        .bind(client_visible_only)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn get_payment(&self, reference: &str) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE reference = $1",
            PAYMENT_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Payment::try_from).transpose()
    }

    async fn payments_for_request(&self, request_id: Uuid) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE service_request_id = $1 ORDER BY created_at",
            PAYMENT_COLUMNS
        ))
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn insert_payment(&self, p: &Payment) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO payments ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            PAYMENT_COLUMNS
        ))
        .bind(p.id)
        .bind(p.service_request_id)
        .bind(p.payer_id)
        .bind(p.payment_type.as_str())
        .bind(p.amount)
        .bind(&p.reference)
        .bind(&p.access_code)
        .bind(p.status.as_str())
        .bind(p.is_emergency)
        .bind(p.paid_at)
        .bind(p.created_at)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_payment_status(
        &self,
        reference: &str,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            UPDATE payments
            SET status = $2, paid_at = COALESCE($3, paid_at), updated_at = NOW()
            WHERE reference = $1
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(reference)
        .bind(status.as_str())
        .bind(paid_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("payment {}", reference)))?;
        Payment::try_from(row)
    }

    async fn insert_notifications(&self, notifications: &[Notification]) -> StoreResult<()> {
        if notifications.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for n in notifications {
            sqlx::query(
                r#"
                INSERT INTO notifications
                    (id, user_id, type, title, message, service_request_id, is_read, read_at, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(n.id)
            .bind(n.user_id)
            .bind(n.notification_type.to_string())
            .bind(&n.title)
            .bind(&n.message)
            .bind(n.service_request_id)
            .bind(n.is_read)
            .bind(n.read_at)
            .bind(n.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        page: PageWindow,
    ) -> StoreResult<(Vec<Notification>, u64)> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM notifications
            WHERE user_id = $1 AND ($2::bool = false OR is_read = false)
            "#,
        )
        .bind(user_id)
        .bind(unread_only)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, user_id, type, title, message, service_request_id, is_read, read_at, created_at
            FROM notifications
            WHERE user_id = $1 AND ($2::bool = false OR is_read = false)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(unread_only)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.into_iter().map(Into::into).collect(), total.max(0) as u64))
    }

    async fn unread_notification_count(&self, user_id: Uuid) -> StoreResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = false")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn mark_notification_read(&self, user_id: Uuid, notification_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notifications SET is_read = true, read_at = COALESCE(read_at, NOW())
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(notification_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = true, read_at = NOW() WHERE user_id = $1 AND is_read = false",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

async fn insert_note(conn: &mut PgConnection, note: &RequestNote) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO service_request_notes
            (id, service_request_id, created_by, note_type, content, is_visible_to_client, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(note.id)
    .bind(note.service_request_id)
    .bind(note.created_by)
    .bind(note.note_type.as_str())
    .bind(&note.content)
    .bind(note.is_visible_to_client)
    .bind(note.created_at)
    .bind(note.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
