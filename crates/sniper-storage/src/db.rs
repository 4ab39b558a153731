//! Postgres stores. Every cross-batch uniqueness guarantee lives here as a
//! database constraint: tenders dedupe on `external_id`, opportunities on
//! `(client_id, tender_id)`, decision tokens on their unique column, and
//! fulfillment tickets on a partial unique index over pending rows. Two
//! overlapping batch runs therefore cannot create duplicates.

use chrono::{DateTime, Utc};
use sniper_core::{
    Client, DceFile, FileCategory, FulfillmentRequest, FulfillmentStatus, Opportunity,
    OpportunityStatus, RawTender, SniperRules, Tender, TransitionError,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    IllegalTransition(#[from] TransitionError),
    #[error("row {id} carries unknown {column} value {value:?}")]
    InvalidColumn {
        id: Uuid,
        column: &'static str,
        value: String,
    },
    #[error("expected status {expected:?} on opportunity {id}, row changed underneath")]
    StaleStatus {
        id: Uuid,
        expected: OpportunityStatus,
    },
    #[error("opportunity {0} not found")]
    NotFound(Uuid),
}

fn client_from_row(row: &PgRow) -> Result<Client, StoreError> {
    Ok(Client {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        active: row.try_get("active")?,
        keywords: row.try_get("keywords")?,
        regions: row.try_get("regions")?,
        rules: SniperRules {
            min_profitability: row.try_get("min_profitability")?,
            forbidden_keywords: row.try_get("forbidden_keywords")?,
            required_certifications: row.try_get("required_certifications")?,
        },
        auto_fulfill_on_accept: row.try_get("auto_fulfill_on_accept")?,
        last_sourced_at: row.try_get("last_sourced_at")?,
    })
}

fn tender_from_row(row: &PgRow) -> Result<Tender, StoreError> {
    Ok(Tender {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        deadline: row.try_get("deadline")?,
        source_url: row.try_get("source_url")?,
        raw: row.try_get("raw")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn opportunity_from_row(row: &PgRow) -> Result<Opportunity, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let status_text: String = row.try_get("status")?;
    let status =
        OpportunityStatus::parse(&status_text).ok_or_else(|| StoreError::InvalidColumn {
            id,
            column: "status",
            value: status_text,
        })?;
    Ok(Opportunity {
        id,
        client_id: row.try_get("client_id")?,
        tender_id: row.try_get("tender_id")?,
        status,
        match_score: row.try_get("match_score")?,
        analysis: row.try_get("analysis")?,
        decision_token: row.try_get("decision_token")?,
        dce_url: row.try_get("dce_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn file_from_row(row: &PgRow) -> Result<DceFile, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let category_text: String = row.try_get("category")?;
    let category =
        FileCategory::parse(&category_text).ok_or_else(|| StoreError::InvalidColumn {
            id,
            column: "category",
            value: category_text,
        })?;
    Ok(DceFile {
        filename: row.try_get("filename")?,
        url: row.try_get("url")?,
        category,
        is_priority: row.try_get("is_priority")?,
    })
}

fn fulfillment_from_row(row: &PgRow) -> Result<FulfillmentRequest, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let status_text: String = row.try_get("status")?;
    let status = match status_text.as_str() {
        "PENDING" => FulfillmentStatus::Pending,
        "READY" => FulfillmentStatus::Ready,
        _ => {
            return Err(StoreError::InvalidColumn {
                id,
                column: "status",
                value: status_text,
            })
        }
    };
    Ok(FulfillmentRequest {
        id,
        opportunity_id: row.try_get("opportunity_id")?,
        status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct ClientStore {
    pool: PgPool,
}

impl ClientStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn active_clients(&self) -> Result<Vec<Client>, StoreError> {
        let rows = sqlx::query("SELECT * FROM clients WHERE active ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(client_from_row).collect()
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Client>, StoreError> {
        let row = sqlx::query("SELECT * FROM clients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(client_from_row).transpose()
    }

    /// Webhook senders identify themselves by email (or raw client id).
    pub async fn find_by_sender(&self, sender_id: &str) -> Result<Option<Client>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM clients WHERE email = $1 OR id::text = $1 LIMIT 1",
        )
        .bind(sender_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(client_from_row).transpose()
    }

    pub async fn set_watermark(
        &self,
        id: Uuid,
        sourced_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE clients SET last_sourced_at = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(sourced_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TenderStore {
    pool: PgPool,
}

impl TenderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent upsert keyed on the immutable external id. Safe under
    /// concurrent batch runs: the conflict target does the deduplication,
    /// not a prior read.
    pub async fn upsert(&self, record: &RawTender, summary: &str) -> Result<Tender, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO tenders (external_id, title, summary, deadline, source_url, raw)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (external_id) DO UPDATE
               SET title = EXCLUDED.title,
                   summary = EXCLUDED.summary,
                   deadline = EXCLUDED.deadline,
                   source_url = EXCLUDED.source_url,
                   raw = EXCLUDED.raw,
                   updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&record.external_id)
        .bind(&record.title)
        .bind(summary)
        .bind(record.deadline)
        .bind(&record.notice_url)
        .bind(&record.raw)
        .fetch_one(&self.pool)
        .await?;
        tender_from_row(&row)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Tender>, StoreError> {
        let row = sqlx::query("SELECT * FROM tenders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(tender_from_row).transpose()
    }
}

#[derive(Debug, Clone)]
pub struct OpportunityStore {
    pool: PgPool,
}

impl OpportunityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Opportunity>, StoreError> {
        let row = sqlx::query("SELECT * FROM opportunities WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(opportunity_from_row).transpose()
    }

    /// Create the (client, tender) pairing in `AnalysisPending` unless it
    /// already exists. Returns whether a row was inserted; a conflict is the
    /// normal overlapping-batch case, not an error.
    pub async fn create_if_absent(
        &self,
        client_id: Uuid,
        tender_id: Uuid,
        match_score: f64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO opportunities (client_id, tender_id, status, match_score)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (client_id, tender_id) DO NOTHING
            "#,
        )
        .bind(client_id)
        .bind(tender_id)
        .bind(OpportunityStatus::AnalysisPending.as_str())
        .bind(match_score)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Oldest-first slice of the screening backlog.
    pub async fn pending_batch(&self, limit: i64) -> Result<Vec<Opportunity>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM opportunities
             WHERE status = $1
             ORDER BY created_at ASC
             LIMIT $2
            "#,
        )
        .bind(OpportunityStatus::AnalysisPending.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(opportunity_from_row).collect()
    }

    /// Apply the automatic screening edge, persisting score and analysis in
    /// the same statement. Guarded on the row still being `AnalysisPending`.
    pub async fn record_screening(
        &self,
        id: Uuid,
        to: OpportunityStatus,
        score: f64,
        analysis: &serde_json::Value,
    ) -> Result<(), StoreError> {
        OpportunityStatus::AnalysisPending.check_transition(to)?;
        let result = sqlx::query(
            r#"
            UPDATE opportunities
               SET status = $2, match_score = $3, analysis = $4, updated_at = NOW()
             WHERE id = $1 AND status = $5
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(score)
        .bind(analysis)
        .bind(OpportunityStatus::AnalysisPending.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::StaleStatus {
                id,
                expected: OpportunityStatus::AnalysisPending,
            });
        }
        Ok(())
    }

    /// Guarded single-edge transition. The edge must be declared in the
    /// lifecycle graph and the row must still sit at `from`.
    pub async fn transition(
        &self,
        id: Uuid,
        from: OpportunityStatus,
        to: OpportunityStatus,
    ) -> Result<(), StoreError> {
        from.check_transition(to)?;
        let result = sqlx::query(
            "UPDATE opportunities SET status = $2, updated_at = NOW() WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(to.as_str())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::StaleStatus { id, expected: from });
        }
        Ok(())
    }

    /// Issue the one-time decision token, or hand back the existing one. The
    /// COALESCE keeps re-notification from rotating an already-sent link.
    pub async fn ensure_decision_token(&self, id: Uuid) -> Result<Uuid, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE opportunities
               SET decision_token = COALESCE(decision_token, $2), updated_at = NOW()
             WHERE id = $1
            RETURNING decision_token
            "#,
        )
        .bind(id)
        .bind(Uuid::new_v4())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;
        Ok(row.try_get("decision_token")?)
    }

    /// Consume-then-clear in one guarded statement: the row must still hold
    /// the token and still be awaiting the client. A second use matches no
    /// row and returns `None`, distinguishable from a valid consumption.
    pub async fn consume_decision_token(
        &self,
        token: Uuid,
        to: OpportunityStatus,
    ) -> Result<Option<Opportunity>, StoreError> {
        OpportunityStatus::WaitingClientDecision.check_transition(to)?;
        let row = sqlx::query(
            r#"
            UPDATE opportunities
               SET status = $2, decision_token = NULL, updated_at = NOW()
             WHERE decision_token = $1 AND status = $3
            RETURNING *
            "#,
        )
        .bind(token)
        .bind(to.as_str())
        .bind(OpportunityStatus::WaitingClientDecision.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(opportunity_from_row).transpose()
    }

    pub async fn find_by_token(&self, token: Uuid) -> Result<Option<Opportunity>, StoreError> {
        let row = sqlx::query("SELECT * FROM opportunities WHERE decision_token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(opportunity_from_row).transpose()
    }

    /// Id-keyed variant of token consumption, for channels that already
    /// resolved the opportunity (inbound webhook replies). Clears any token
    /// so a stale emailed link cannot fire after the reply.
    pub async fn decide(
        &self,
        id: Uuid,
        to: OpportunityStatus,
    ) -> Result<Option<Opportunity>, StoreError> {
        OpportunityStatus::WaitingClientDecision.check_transition(to)?;
        let row = sqlx::query(
            r#"
            UPDATE opportunities
               SET status = $2, decision_token = NULL, updated_at = NOW()
             WHERE id = $1 AND status = $3
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(OpportunityStatus::WaitingClientDecision.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(opportunity_from_row).transpose()
    }

    /// Most recent opportunity awaiting this client's decision; the inbound
    /// webhook resolves free-text replies against it.
    pub async fn latest_waiting_for_client(
        &self,
        client_id: Uuid,
    ) -> Result<Option<Opportunity>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM opportunities
             WHERE client_id = $1 AND status = $2
             ORDER BY updated_at DESC
             LIMIT 1
            "#,
        )
        .bind(client_id)
        .bind(OpportunityStatus::WaitingClientDecision.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(opportunity_from_row).transpose()
    }

    pub async fn set_dce_url(&self, id: Uuid, dce_url: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE opportunities SET dce_url = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(dce_url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn files(&self, id: Uuid) -> Result<Vec<DceFile>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM opportunity_files WHERE opportunity_id = $1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(file_from_row).collect()
    }

    /// Atomically replace the opportunity's file set (delete-then-insert in
    /// one transaction) and, when the row is still `DceRequested`, advance it
    /// to `Extracted`. A re-run on an already-extracted opportunity only
    /// swaps the files.
    pub async fn replace_files(&self, id: Uuid, files: &[DceFile]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM opportunity_files WHERE opportunity_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for (position, file) in files.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO opportunity_files
                    (opportunity_id, filename, url, category, is_priority, position)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(id)
            .bind(&file.filename)
            .bind(&file.url)
            .bind(file.category.as_str())
            .bind(file.is_priority)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE opportunities SET status = $2, updated_at = NOW() WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(OpportunityStatus::Extracted.as_str())
        .bind(OpportunityStatus::DceRequested.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Explicit re-analysis tooling: back to the initial state with every
    /// stale screening artifact cleared.
    pub async fn reset_for_reanalysis(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE opportunities
               SET status = $2,
                   analysis = NULL,
                   match_score = 0,
                   decision_token = NULL,
                   updated_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(OpportunityStatus::AnalysisPending.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FulfillmentStore {
    pool: PgPool,
}

impl FulfillmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a ticket unless one is already pending; the partial unique index
    /// turns a duplicate open into a no-op.
    pub async fn open(&self, opportunity_id: Uuid) -> Result<FulfillmentRequest, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO fulfillment_requests (opportunity_id, status)
            VALUES ($1, 'PENDING')
            ON CONFLICT (opportunity_id) WHERE status = 'PENDING' DO NOTHING
            "#,
        )
        .bind(opportunity_id)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT * FROM fulfillment_requests WHERE opportunity_id = $1 AND status = 'PENDING'",
        )
        .bind(opportunity_id)
        .fetch_one(&self.pool)
        .await?;
        fulfillment_from_row(&row)
    }

    /// Close every pending ticket for the opportunity; returns how many rows
    /// moved to READY.
    pub async fn close_pending(&self, opportunity_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE fulfillment_requests
               SET status = 'READY', updated_at = NOW()
             WHERE opportunity_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(opportunity_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn pending(&self) -> Result<Vec<FulfillmentRequest>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM fulfillment_requests WHERE status = 'PENDING' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(fulfillment_from_row).collect()
    }
}
