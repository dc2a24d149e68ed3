mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use apr_core::{
    Account, AccountProfile, ChatInteraction, Report, ReportKind, Role, Sector,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSector {
    pub name: String,
    pub alert_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectorUpdate {
    pub has_outage: Option<bool>,
    pub alert_message: Option<String>,
    pub outage_scheduled_start: Option<DateTime<Utc>>,
    pub outage_scheduled_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub rut: String,
    pub full_name: String,
    pub address: String,
    pub role: Role,
    pub sector_id: i64,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBill {
    pub account_id: i64,
    pub period: String,
    pub amount: i64,
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
    pub account_id: i64,
    pub kind: ReportKind,
    pub description: String,
}

/// Read and write access to accounts, sectors, and bills. The router
/// only consumes the two read paths (`find_by_rut`,
/// `sectors_with_outage`); everything else serves the CRUD API and the
/// bulk importer.
pub trait DirectoryRepository: Send + Sync {
    async fn find_by_rut(&self, rut: &str) -> Result<Option<AccountProfile>>;
    async fn find_account_by_id(&self, account_id: i64) -> Result<Option<Account>>;
    async fn credential_for_rut(&self, rut: &str) -> Result<Option<String>>;
    async fn set_credential(&self, rut: &str, password_hash: &str) -> Result<bool>;
    async fn create_account(&self, new: NewAccount) -> Result<Account>;
    async fn update_account_contact(
        &self,
        account_id: i64,
        address: &str,
        sector_id: i64,
    ) -> Result<()>;
    async fn list_staff(&self) -> Result<Vec<Account>>;

    async fn list_sectors(&self) -> Result<Vec<Sector>>;
    async fn find_sector_by_name(&self, name: &str) -> Result<Option<Sector>>;
    async fn create_sector(&self, new: NewSector) -> Result<Sector>;
    async fn update_sector(&self, sector_id: i64, update: SectorUpdate)
        -> Result<Option<Sector>>;
    async fn sectors_with_outage(&self) -> Result<Vec<Sector>>;

    async fn create_bill(&self, new: NewBill) -> Result<apr_core::Bill>;
    async fn find_bill_for_period(
        &self,
        account_id: i64,
        period: &str,
    ) -> Result<Option<apr_core::Bill>>;
    async fn reopen_bill(&self, bill_id: i64, amount: i64) -> Result<()>;
    async fn mark_bill_paid(&self, bill_id: i64, paid_at: DateTime<Utc>) -> Result<bool>;
}

/// Append-only log of chatbot exchanges plus usefulness feedback.
pub trait ChatLogRepository: Send + Sync {
    async fn record_interaction(
        &self,
        account_id: Option<i64>,
        user_message: &str,
        bot_reply: &str,
    ) -> Result<i64>;
    async fn set_feedback(&self, interaction_id: i64, useful: bool) -> Result<bool>;
    async fn recent_interactions(&self, limit: usize) -> Result<Vec<ChatInteraction>>;
}

pub trait ReportRepository: Send + Sync {
    async fn create_report(&self, new: NewReport) -> Result<Report>;
    async fn list_reports(&self) -> Result<Vec<Report>>;
    async fn respond_report(
        &self,
        report_id: i64,
        status: &str,
        staff_response: &str,
    ) -> Result<bool>;
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        Ok(Self::Sqlite(sqlite))
    }
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            Store::Memory($store) => $call,
            Store::Sqlite($store) => $call,
        }
    };
}

impl DirectoryRepository for Store {
    async fn find_by_rut(&self, rut: &str) -> Result<Option<AccountProfile>> {
        dispatch!(self, store => store.find_by_rut(rut).await)
    }

    async fn find_account_by_id(&self, account_id: i64) -> Result<Option<Account>> {
        dispatch!(self, store => store.find_account_by_id(account_id).await)
    }

    async fn credential_for_rut(&self, rut: &str) -> Result<Option<String>> {
        dispatch!(self, store => store.credential_for_rut(rut).await)
    }

    async fn set_credential(&self, rut: &str, password_hash: &str) -> Result<bool> {
        dispatch!(self, store => store.set_credential(rut, password_hash).await)
    }

    async fn create_account(&self, new: NewAccount) -> Result<Account> {
        dispatch!(self, store => store.create_account(new).await)
    }

    async fn update_account_contact(
        &self,
        account_id: i64,
        address: &str,
        sector_id: i64,
    ) -> Result<()> {
        dispatch!(self, store => store.update_account_contact(account_id, address, sector_id).await)
    }

    async fn list_staff(&self) -> Result<Vec<Account>> {
        dispatch!(self, store => store.list_staff().await)
    }

    async fn list_sectors(&self) -> Result<Vec<Sector>> {
        dispatch!(self, store => store.list_sectors().await)
    }

    async fn find_sector_by_name(&self, name: &str) -> Result<Option<Sector>> {
        dispatch!(self, store => store.find_sector_by_name(name).await)
    }

    async fn create_sector(&self, new: NewSector) -> Result<Sector> {
        dispatch!(self, store => store.create_sector(new).await)
    }

    async fn update_sector(
        &self,
        sector_id: i64,
        update: SectorUpdate,
    ) -> Result<Option<Sector>> {
        dispatch!(self, store => store.update_sector(sector_id, update).await)
    }

    async fn sectors_with_outage(&self) -> Result<Vec<Sector>> {
        dispatch!(self, store => store.sectors_with_outage().await)
    }

    async fn create_bill(&self, new: NewBill) -> Result<apr_core::Bill> {
        dispatch!(self, store => store.create_bill(new).await)
    }

    async fn find_bill_for_period(
        &self,
        account_id: i64,
        period: &str,
    ) -> Result<Option<apr_core::Bill>> {
        dispatch!(self, store => store.find_bill_for_period(account_id, period).await)
    }

    async fn reopen_bill(&self, bill_id: i64, amount: i64) -> Result<()> {
        dispatch!(self, store => store.reopen_bill(bill_id, amount).await)
    }

    async fn mark_bill_paid(&self, bill_id: i64, paid_at: DateTime<Utc>) -> Result<bool> {
        dispatch!(self, store => store.mark_bill_paid(bill_id, paid_at).await)
    }
}

impl ChatLogRepository for Store {
    async fn record_interaction(
        &self,
        account_id: Option<i64>,
        user_message: &str,
        bot_reply: &str,
    ) -> Result<i64> {
        dispatch!(self, store => store.record_interaction(account_id, user_message, bot_reply).await)
    }

    async fn set_feedback(&self, interaction_id: i64, useful: bool) -> Result<bool> {
        dispatch!(self, store => store.set_feedback(interaction_id, useful).await)
    }

    async fn recent_interactions(&self, limit: usize) -> Result<Vec<ChatInteraction>> {
        dispatch!(self, store => store.recent_interactions(limit).await)
    }
}

impl ReportRepository for Store {
    async fn create_report(&self, new: NewReport) -> Result<Report> {
        dispatch!(self, store => store.create_report(new).await)
    }

    async fn list_reports(&self) -> Result<Vec<Report>> {
        dispatch!(self, store => store.list_reports().await)
    }

    async fn respond_report(
        &self,
        report_id: i64,
        status: &str,
        staff_response: &str,
    ) -> Result<bool> {
        dispatch!(self, store => store.respond_report(report_id, status, staff_response).await)
    }
}
