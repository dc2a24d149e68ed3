use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use apr_core::{
    Account, AccountProfile, Bill, ChatInteraction, Report, Sector,
};
use chrono::Utc;
use parking_lot::RwLock;

use crate::{
    ChatLogRepository, DirectoryRepository, NewAccount, NewBill, NewReport, NewSector,
    ReportRepository, SectorUpdate,
};

/// In-memory backend used by tests and by deployments without a
/// database URL. Ids are assigned from a single shared counter.
#[derive(Clone, Default)]
pub struct MemoryStore {
    next_id: Arc<AtomicI64>,
    sectors: Arc<RwLock<HashMap<i64, Sector>>>,
    accounts: Arc<RwLock<HashMap<i64, Account>>>,
    credentials: Arc<RwLock<HashMap<String, String>>>,
    bills: Arc<RwLock<HashMap<i64, Bill>>>,
    reports: Arc<RwLock<HashMap<i64, Report>>>,
    interactions: Arc<RwLock<HashMap<i64, ChatInteraction>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicI64::new(1)),
            ..Self::default()
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl DirectoryRepository for MemoryStore {
    async fn find_by_rut(&self, rut: &str) -> Result<Option<AccountProfile>> {
        let Some(account) = self
            .accounts
            .read()
            .values()
            .find(|account| account.rut == rut)
            .cloned()
        else {
            return Ok(None);
        };

        let sector = self
            .sectors
            .read()
            .get(&account.sector_id)
            .cloned()
            .ok_or_else(|| anyhow!("account {} references missing sector", account.id))?;

        let mut bills = self
            .bills
            .read()
            .values()
            .filter(|bill| bill.account_id == account.id)
            .cloned()
            .collect::<Vec<_>>();
        bills.sort_by(|a, b| a.period.cmp(&b.period));

        Ok(Some(AccountProfile {
            account,
            sector,
            bills,
        }))
    }

    async fn find_account_by_id(&self, account_id: i64) -> Result<Option<Account>> {
        Ok(self.accounts.read().get(&account_id).cloned())
    }

    async fn credential_for_rut(&self, rut: &str) -> Result<Option<String>> {
        Ok(self.credentials.read().get(rut).cloned())
    }

    async fn set_credential(&self, rut: &str, password_hash: &str) -> Result<bool> {
        let known = self
            .accounts
            .read()
            .values()
            .any(|account| account.rut == rut);
        if !known {
            return Ok(false);
        }
        self.credentials
            .write()
            .insert(rut.to_string(), password_hash.to_string());
        Ok(true)
    }

    async fn create_account(&self, new: NewAccount) -> Result<Account> {
        if !self.sectors.read().contains_key(&new.sector_id) {
            return Err(anyhow!("sector {} does not exist", new.sector_id));
        }
        if self
            .accounts
            .read()
            .values()
            .any(|account| account.rut == new.rut)
        {
            return Err(anyhow!("account with rut {} already exists", new.rut));
        }

        let account = Account {
            id: self.allocate_id(),
            rut: new.rut,
            full_name: new.full_name,
            address: new.address,
            role: new.role,
            sector_id: new.sector_id,
        };

        if let Some(hash) = new.password_hash {
            self.credentials.write().insert(account.rut.clone(), hash);
        }
        self.accounts.write().insert(account.id, account.clone());
        Ok(account)
    }

    async fn update_account_contact(
        &self,
        account_id: i64,
        address: &str,
        sector_id: i64,
    ) -> Result<()> {
        let mut accounts = self.accounts.write();
        let account = accounts
            .get_mut(&account_id)
            .ok_or_else(|| anyhow!("account {} not found", account_id))?;
        account.address = address.to_string();
        account.sector_id = sector_id;
        Ok(())
    }

    async fn list_staff(&self) -> Result<Vec<Account>> {
        let mut staff = self
            .accounts
            .read()
            .values()
            .filter(|account| account.role.is_privileged())
            .cloned()
            .collect::<Vec<_>>();
        staff.sort_by_key(|account| account.id);
        Ok(staff)
    }

    async fn list_sectors(&self) -> Result<Vec<Sector>> {
        let mut sectors = self.sectors.read().values().cloned().collect::<Vec<_>>();
        sectors.sort_by_key(|sector| sector.id);
        Ok(sectors)
    }

    async fn find_sector_by_name(&self, name: &str) -> Result<Option<Sector>> {
        Ok(self
            .sectors
            .read()
            .values()
            .find(|sector| sector.name == name)
            .cloned())
    }

    async fn create_sector(&self, new: NewSector) -> Result<Sector> {
        if self
            .sectors
            .read()
            .values()
            .any(|sector| sector.name == new.name)
        {
            return Err(anyhow!("sector '{}' already exists", new.name));
        }

        let sector = Sector {
            id: self.allocate_id(),
            name: new.name,
            has_outage: false,
            alert_message: new.alert_message,
            outage_scheduled_start: None,
            outage_scheduled_end: None,
        };
        self.sectors.write().insert(sector.id, sector.clone());
        Ok(sector)
    }

    async fn update_sector(
        &self,
        sector_id: i64,
        update: SectorUpdate,
    ) -> Result<Option<Sector>> {
        let mut sectors = self.sectors.write();
        let Some(sector) = sectors.get_mut(&sector_id) else {
            return Ok(None);
        };

        if let Some(has_outage) = update.has_outage {
            sector.has_outage = has_outage;
        }
        if let Some(alert_message) = update.alert_message {
            sector.alert_message = Some(alert_message);
        }
        if let Some(start) = update.outage_scheduled_start {
            sector.outage_scheduled_start = Some(start);
        }
        if let Some(end) = update.outage_scheduled_end {
            sector.outage_scheduled_end = Some(end);
        }

        Ok(Some(sector.clone()))
    }

    async fn sectors_with_outage(&self) -> Result<Vec<Sector>> {
        let mut outaged = self
            .sectors
            .read()
            .values()
            .filter(|sector| sector.has_outage)
            .cloned()
            .collect::<Vec<_>>();
        outaged.sort_by_key(|sector| sector.id);
        Ok(outaged)
    }

    async fn create_bill(&self, new: NewBill) -> Result<Bill> {
        if !self.accounts.read().contains_key(&new.account_id) {
            return Err(anyhow!("account {} does not exist", new.account_id));
        }

        let bill = Bill {
            id: self.allocate_id(),
            account_id: new.account_id,
            period: new.period,
            amount: new.amount,
            issued_at: Utc::now(),
            due_at: new.due_at,
            paid: false,
            paid_at: None,
        };
        self.bills.write().insert(bill.id, bill.clone());
        Ok(bill)
    }

    async fn find_bill_for_period(
        &self,
        account_id: i64,
        period: &str,
    ) -> Result<Option<Bill>> {
        Ok(self
            .bills
            .read()
            .values()
            .find(|bill| bill.account_id == account_id && bill.period == period)
            .cloned())
    }

    async fn reopen_bill(&self, bill_id: i64, amount: i64) -> Result<()> {
        let mut bills = self.bills.write();
        let bill = bills
            .get_mut(&bill_id)
            .ok_or_else(|| anyhow!("bill {} not found", bill_id))?;
        bill.amount = amount;
        bill.paid = false;
        bill.paid_at = None;
        Ok(())
    }

    async fn mark_bill_paid(
        &self,
        bill_id: i64,
        paid_at: chrono::DateTime<Utc>,
    ) -> Result<bool> {
        let mut bills = self.bills.write();
        match bills.get_mut(&bill_id) {
            Some(bill) => {
                bill.paid = true;
                bill.paid_at = Some(paid_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl ChatLogRepository for MemoryStore {
    async fn record_interaction(
        &self,
        account_id: Option<i64>,
        user_message: &str,
        bot_reply: &str,
    ) -> Result<i64> {
        let interaction = ChatInteraction {
            id: self.allocate_id(),
            account_id,
            user_message: user_message.to_string(),
            bot_reply: bot_reply.to_string(),
            at: Utc::now(),
            useful: None,
        };
        let id = interaction.id;
        self.interactions.write().insert(id, interaction);
        Ok(id)
    }

    async fn set_feedback(&self, interaction_id: i64, useful: bool) -> Result<bool> {
        let mut interactions = self.interactions.write();
        match interactions.get_mut(&interaction_id) {
            Some(interaction) => {
                interaction.useful = Some(useful);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn recent_interactions(&self, limit: usize) -> Result<Vec<ChatInteraction>> {
        let mut all = self
            .interactions
            .read()
            .values()
            .cloned()
            .collect::<Vec<_>>();
        all.sort_by_key(|interaction| std::cmp::Reverse(interaction.id));
        all.truncate(limit);
        Ok(all)
    }
}

impl ReportRepository for MemoryStore {
    async fn create_report(&self, new: NewReport) -> Result<Report> {
        if !self.accounts.read().contains_key(&new.account_id) {
            return Err(anyhow!("account {} does not exist", new.account_id));
        }

        let report = Report {
            id: self.allocate_id(),
            account_id: new.account_id,
            kind: new.kind,
            description: new.description,
            status: "pendiente".to_string(),
            staff_response: None,
            created_at: Utc::now(),
        };
        self.reports.write().insert(report.id, report.clone());
        Ok(report)
    }

    async fn list_reports(&self) -> Result<Vec<Report>> {
        let mut reports = self.reports.read().values().cloned().collect::<Vec<_>>();
        reports.sort_by_key(|report| report.id);
        Ok(reports)
    }

    async fn respond_report(
        &self,
        report_id: i64,
        status: &str,
        staff_response: &str,
    ) -> Result<bool> {
        let mut reports = self.reports.write();
        match reports.get_mut(&report_id) {
            Some(report) => {
                report.status = status.to_string();
                report.staff_response = Some(staff_response.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apr_core::Role;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let sector = store
            .create_sector(NewSector {
                name: "Villa Los Heroes".to_string(),
                alert_message: None,
            })
            .await
            .unwrap();
        store
            .create_account(NewAccount {
                rut: "12345678-9".to_string(),
                full_name: "Juan Perez".to_string(),
                address: "Calle 1 #123".to_string(),
                role: Role::Customer,
                sector_id: sector.id,
                password_hash: None,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn profile_includes_sector_and_bills() {
        let store = seeded().await;
        let profile = store
            .find_by_rut("12345678-9")
            .await
            .unwrap()
            .expect("account should exist");
        assert_eq!(profile.sector.name, "Villa Los Heroes");
        assert!(profile.bills.is_empty());
    }

    #[tokio::test]
    async fn duplicate_rut_is_rejected() {
        let store = seeded().await;
        let result = store
            .create_account(NewAccount {
                rut: "12345678-9".to_string(),
                full_name: "Otro".to_string(),
                address: "x".to_string(),
                role: Role::Customer,
                sector_id: 1,
                password_hash: None,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn feedback_on_unknown_interaction_is_false() {
        let store = seeded().await;
        assert!(!store.set_feedback(999, true).await.unwrap());
    }
}
