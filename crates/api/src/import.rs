use anyhow::Result;
use apr_core::Role;
use apr_storage::{DirectoryRepository, NewAccount, NewBill, NewSector};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One row of the bulk-import sheet the cooperative's administrator
/// uploads. Missing debt columns mean the account starts with no
/// pending bill.
#[derive(Debug, Deserialize)]
struct ImportRow {
    rut: String,
    name: String,
    address: String,
    sector: String,
    debt_amount: Option<i64>,
    debt_period: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ImportSummary {
    pub sectors_created: usize,
    pub accounts_created: usize,
    pub accounts_updated: usize,
    pub bills_created: usize,
    pub bills_reopened: usize,
    pub rows_skipped: usize,
}

/// Upserts sectors, accounts, and opening debts from CSV text. Rows
/// that cannot be parsed or that miss required fields are skipped and
/// logged; the rest of the sheet still goes through.
pub async fn import_accounts_csv<S>(store: &S, data: &str) -> Result<ImportSummary>
where
    S: DirectoryRepository,
{
    let mut summary = ImportSummary::default();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(data.as_bytes());

    for (line, parsed) in reader.deserialize::<ImportRow>().enumerate() {
        let row = match parsed {
            Ok(row) => row,
            Err(error) => {
                warn!(line, error = %error, "skipping malformed import row");
                summary.rows_skipped += 1;
                continue;
            }
        };
        if row.rut.is_empty() || row.name.is_empty() || row.sector.is_empty() {
            warn!(line, "skipping import row with empty rut, name, or sector");
            summary.rows_skipped += 1;
            continue;
        }

        let sector = match store.find_sector_by_name(&row.sector).await? {
            Some(existing) => existing,
            None => {
                let created = store
                    .create_sector(NewSector {
                        name: row.sector.clone(),
                        alert_message: None,
                    })
                    .await?;
                summary.sectors_created += 1;
                created
            }
        };

        let account = match store.find_by_rut(&row.rut).await? {
            Some(profile) => {
                store
                    .update_account_contact(profile.account.id, &row.address, sector.id)
                    .await?;
                summary.accounts_updated += 1;
                profile.account
            }
            None => {
                let created = store
                    .create_account(NewAccount {
                        rut: row.rut.clone(),
                        full_name: row.name.clone(),
                        address: row.address.clone(),
                        role: Role::Customer,
                        sector_id: sector.id,
                        password_hash: None,
                    })
                    .await?;
                summary.accounts_created += 1;
                created
            }
        };

        let amount = row.debt_amount.unwrap_or(0);
        let period = row.debt_period.as_deref().unwrap_or("").trim().to_string();
        if amount > 0 && !period.is_empty() {
            match store.find_bill_for_period(account.id, &period).await? {
                Some(existing) => {
                    store.reopen_bill(existing.id, amount).await?;
                    summary.bills_reopened += 1;
                }
                None => {
                    store
                        .create_bill(NewBill {
                            account_id: account.id,
                            period,
                            amount,
                            due_at: chrono::Utc::now() + chrono::Duration::days(30),
                        })
                        .await?;
                    summary.bills_created += 1;
                }
            }
        }
    }

    Ok(summary)
}
