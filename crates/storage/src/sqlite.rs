use anyhow::{Context, Result};
use apr_core::{
    Account, AccountProfile, Bill, ChatInteraction, Report, ReportKind, Role, Sector,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::{
    ChatLogRepository, DirectoryRepository, NewAccount, NewBill, NewReport, NewSector,
    ReportRepository, SectorUpdate,
};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sectors (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL UNIQUE,
              has_outage INTEGER NOT NULL DEFAULT 0,
              alert_message TEXT,
              outage_scheduled_start TEXT,
              outage_scheduled_end TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              rut TEXT NOT NULL UNIQUE,
              full_name TEXT NOT NULL,
              address TEXT NOT NULL,
              role TEXT NOT NULL DEFAULT 'customer',
              sector_id INTEGER NOT NULL REFERENCES sectors(id),
              password_hash TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bills (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              account_id INTEGER NOT NULL REFERENCES accounts(id),
              period TEXT NOT NULL,
              amount INTEGER NOT NULL,
              issued_at TEXT NOT NULL,
              due_at TEXT NOT NULL,
              paid INTEGER NOT NULL DEFAULT 0,
              paid_at TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              account_id INTEGER NOT NULL REFERENCES accounts(id),
              kind TEXT NOT NULL,
              description TEXT NOT NULL,
              status TEXT NOT NULL DEFAULT 'pendiente',
              staff_response TEXT,
              created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_interactions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              account_id INTEGER,
              user_message TEXT NOT NULL,
              bot_reply TEXT NOT NULL,
              at TEXT NOT NULL,
              useful INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|raw| raw.parse().ok())
}

fn sector_from_row(row: &SqliteRow) -> Sector {
    Sector {
        id: row.get("id"),
        name: row.get("name"),
        has_outage: row.get::<i64, _>("has_outage") != 0,
        alert_message: row.get("alert_message"),
        outage_scheduled_start: parse_timestamp(row.get("outage_scheduled_start")),
        outage_scheduled_end: parse_timestamp(row.get("outage_scheduled_end")),
    }
}

fn account_from_row(row: &SqliteRow) -> Account {
    Account {
        id: row.get("id"),
        rut: row.get("rut"),
        full_name: row.get("full_name"),
        address: row.get("address"),
        role: Role::from_optional_str(Some(row.get::<String, _>("role").as_str())),
        sector_id: row.get("sector_id"),
    }
}

fn bill_from_row(row: &SqliteRow) -> Bill {
    Bill {
        id: row.get("id"),
        account_id: row.get("account_id"),
        period: row.get("period"),
        amount: row.get("amount"),
        issued_at: parse_timestamp(row.get("issued_at")).unwrap_or_else(Utc::now),
        due_at: parse_timestamp(row.get("due_at")).unwrap_or_else(Utc::now),
        paid: row.get::<i64, _>("paid") != 0,
        paid_at: parse_timestamp(row.get("paid_at")),
    }
}

fn report_from_row(row: &SqliteRow) -> Report {
    Report {
        id: row.get("id"),
        account_id: row.get("account_id"),
        kind: row
            .get::<String, _>("kind")
            .parse()
            .unwrap_or(ReportKind::Complaint),
        description: row.get("description"),
        status: row.get("status"),
        staff_response: row.get("staff_response"),
        created_at: parse_timestamp(row.get("created_at")).unwrap_or_else(Utc::now),
    }
}

fn interaction_from_row(row: &SqliteRow) -> ChatInteraction {
    ChatInteraction {
        id: row.get("id"),
        account_id: row.get("account_id"),
        user_message: row.get("user_message"),
        bot_reply: row.get("bot_reply"),
        at: parse_timestamp(row.get("at")).unwrap_or_else(Utc::now),
        useful: row
            .get::<Option<i64>, _>("useful")
            .map(|value| value != 0),
    }
}

impl DirectoryRepository for SqliteStore {
    async fn find_by_rut(&self, rut: &str) -> Result<Option<AccountProfile>> {
        let Some(account_row) = sqlx::query(
            "SELECT id, rut, full_name, address, role, sector_id FROM accounts WHERE rut = ?1",
        )
        .bind(rut)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };
        let account = account_from_row(&account_row);

        let sector_row = sqlx::query(
            r#"
            SELECT id, name, has_outage, alert_message, outage_scheduled_start, outage_scheduled_end
            FROM sectors WHERE id = ?1
            "#,
        )
        .bind(account.sector_id)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("account {} references missing sector", account.id))?;
        let sector = sector_from_row(&sector_row);

        let bill_rows = sqlx::query(
            r#"
            SELECT id, account_id, period, amount, issued_at, due_at, paid, paid_at
            FROM bills WHERE account_id = ?1 ORDER BY period
            "#,
        )
        .bind(account.id)
        .fetch_all(&self.pool)
        .await?;
        let bills = bill_rows.iter().map(bill_from_row).collect();

        Ok(Some(AccountProfile {
            account,
            sector,
            bills,
        }))
    }

    async fn find_account_by_id(&self, account_id: i64) -> Result<Option<Account>> {
        let row = sqlx::query(
            "SELECT id, rut, full_name, address, role, sector_id FROM accounts WHERE id = ?1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn credential_for_rut(&self, rut: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT password_hash FROM accounts WHERE rut = ?1")
            .bind(rut)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|row| row.get::<Option<String>, _>("password_hash")))
    }

    async fn set_credential(&self, rut: &str, password_hash: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE accounts SET password_hash = ?1 WHERE rut = ?2")
            .bind(password_hash)
            .bind(rut)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_account(&self, new: NewAccount) -> Result<Account> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (rut, full_name, address, role, sector_id, password_hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&new.rut)
        .bind(&new.full_name)
        .bind(&new.address)
        .bind(new.role.as_code())
        .bind(new.sector_id)
        .bind(&new.password_hash)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed inserting account {}", new.rut))?;

        Ok(Account {
            id: result.last_insert_rowid(),
            rut: new.rut,
            full_name: new.full_name,
            address: new.address,
            role: new.role,
            sector_id: new.sector_id,
        })
    }

    async fn update_account_contact(
        &self,
        account_id: i64,
        address: &str,
        sector_id: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE accounts SET address = ?1, sector_id = ?2 WHERE id = ?3")
            .bind(address)
            .bind(sector_id)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_staff(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT id, rut, full_name, address, role, sector_id
            FROM accounts WHERE role != 'customer' ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(account_from_row).collect())
    }

    async fn list_sectors(&self) -> Result<Vec<Sector>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, has_outage, alert_message, outage_scheduled_start, outage_scheduled_end
            FROM sectors ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(sector_from_row).collect())
    }

    async fn find_sector_by_name(&self, name: &str) -> Result<Option<Sector>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, has_outage, alert_message, outage_scheduled_start, outage_scheduled_end
            FROM sectors WHERE name = ?1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(sector_from_row))
    }

    async fn create_sector(&self, new: NewSector) -> Result<Sector> {
        let result = sqlx::query("INSERT INTO sectors (name, alert_message) VALUES (?1, ?2)")
            .bind(&new.name)
            .bind(&new.alert_message)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed inserting sector '{}'", new.name))?;

        Ok(Sector {
            id: result.last_insert_rowid(),
            name: new.name,
            has_outage: false,
            alert_message: new.alert_message,
            outage_scheduled_start: None,
            outage_scheduled_end: None,
        })
    }

    async fn update_sector(
        &self,
        sector_id: i64,
        update: SectorUpdate,
    ) -> Result<Option<Sector>> {
        // Patch only the fields present in the request, like the
        // original admin endpoint.
        if let Some(has_outage) = update.has_outage {
            sqlx::query("UPDATE sectors SET has_outage = ?1 WHERE id = ?2")
                .bind(has_outage as i64)
                .bind(sector_id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(alert_message) = update.alert_message {
            sqlx::query("UPDATE sectors SET alert_message = ?1 WHERE id = ?2")
                .bind(alert_message)
                .bind(sector_id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(start) = update.outage_scheduled_start {
            sqlx::query("UPDATE sectors SET outage_scheduled_start = ?1 WHERE id = ?2")
                .bind(start.to_rfc3339())
                .bind(sector_id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(end) = update.outage_scheduled_end {
            sqlx::query("UPDATE sectors SET outage_scheduled_end = ?1 WHERE id = ?2")
                .bind(end.to_rfc3339())
                .bind(sector_id)
                .execute(&self.pool)
                .await?;
        }

        let row = sqlx::query(
            r#"
            SELECT id, name, has_outage, alert_message, outage_scheduled_start, outage_scheduled_end
            FROM sectors WHERE id = ?1
            "#,
        )
        .bind(sector_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(sector_from_row))
    }

    async fn sectors_with_outage(&self) -> Result<Vec<Sector>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, has_outage, alert_message, outage_scheduled_start, outage_scheduled_end
            FROM sectors WHERE has_outage = 1 ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(sector_from_row).collect())
    }

    async fn create_bill(&self, new: NewBill) -> Result<Bill> {
        let issued_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO bills (account_id, period, amount, issued_at, due_at, paid)
            VALUES (?1, ?2, ?3, ?4, ?5, 0)
            "#,
        )
        .bind(new.account_id)
        .bind(&new.period)
        .bind(new.amount)
        .bind(issued_at.to_rfc3339())
        .bind(new.due_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Bill {
            id: result.last_insert_rowid(),
            account_id: new.account_id,
            period: new.period,
            amount: new.amount,
            issued_at,
            due_at: new.due_at,
            paid: false,
            paid_at: None,
        })
    }

    async fn find_bill_for_period(
        &self,
        account_id: i64,
        period: &str,
    ) -> Result<Option<Bill>> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, period, amount, issued_at, due_at, paid, paid_at
            FROM bills WHERE account_id = ?1 AND period = ?2
            "#,
        )
        .bind(account_id)
        .bind(period)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(bill_from_row))
    }

    async fn reopen_bill(&self, bill_id: i64, amount: i64) -> Result<()> {
        sqlx::query("UPDATE bills SET amount = ?1, paid = 0, paid_at = NULL WHERE id = ?2")
            .bind(amount)
            .bind(bill_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_bill_paid(&self, bill_id: i64, paid_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE bills SET paid = 1, paid_at = ?1 WHERE id = ?2")
            .bind(paid_at.to_rfc3339())
            .bind(bill_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

impl ChatLogRepository for SqliteStore {
    async fn record_interaction(
        &self,
        account_id: Option<i64>,
        user_message: &str,
        bot_reply: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO chat_interactions (account_id, user_message, bot_reply, at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(account_id)
        .bind(user_message)
        .bind(bot_reply)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn set_feedback(&self, interaction_id: i64, useful: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE chat_interactions SET useful = ?1 WHERE id = ?2")
            .bind(useful as i64)
            .bind(interaction_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn recent_interactions(&self, limit: usize) -> Result<Vec<ChatInteraction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, user_message, bot_reply, at, useful
            FROM chat_interactions ORDER BY id DESC LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(interaction_from_row).collect())
    }
}

impl ReportRepository for SqliteStore {
    async fn create_report(&self, new: NewReport) -> Result<Report> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO reports (account_id, kind, description, status, created_at)
            VALUES (?1, ?2, ?3, 'pendiente', ?4)
            "#,
        )
        .bind(new.account_id)
        .bind(new.kind.as_code())
        .bind(&new.description)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Report {
            id: result.last_insert_rowid(),
            account_id: new.account_id,
            kind: new.kind,
            description: new.description,
            status: "pendiente".to_string(),
            staff_response: None,
            created_at,
        })
    }

    async fn list_reports(&self) -> Result<Vec<Report>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, kind, description, status, staff_response, created_at
            FROM reports ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(report_from_row).collect())
    }

    async fn respond_report(
        &self,
        report_id: i64,
        status: &str,
        staff_response: &str,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE reports SET status = ?1, staff_response = ?2 WHERE id = ?3")
                .bind(status)
                .bind(staff_response)
                .bind(report_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
