use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Staff,
    Admin,
}

impl Role {
    pub fn from_optional_str(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "admin" => Self::Admin,
            Some(v) if v == "staff" || v == "personal" || v == "tecnico" => Self::Staff,
            _ => Self::Customer,
        }
    }

    pub fn as_code(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Staff => "staff",
            Self::Admin => "admin",
        }
    }

    pub fn is_privileged(self) -> bool {
        matches!(self, Self::Staff | Self::Admin)
    }
}

/// A geographic service zone with its own outage state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sector {
    pub id: i64,
    pub name: String,
    pub has_outage: bool,
    pub alert_message: Option<String>,
    pub outage_scheduled_start: Option<DateTime<Utc>>,
    pub outage_scheduled_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub rut: String,
    pub full_name: String,
    pub address: String,
    pub role: Role,
    pub sector_id: i64,
}

/// One billing period's charge. Amounts are integer Chilean pesos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bill {
    pub id: i64,
    pub account_id: i64,
    pub period: String,
    pub amount: i64,
    pub issued_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Everything the router needs about one account holder, fetched in a
/// single read: the account, its sector, and its billing line items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountProfile {
    pub account: Account,
    pub sector: Sector,
    pub bills: Vec<Bill>,
}

impl AccountProfile {
    /// Unpaid balance, computed fresh on every call.
    pub fn total_debt(&self) -> i64 {
        self.bills
            .iter()
            .filter(|bill| !bill.paid)
            .map(|bill| bill.amount)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Outage,
    Complaint,
    Suggestion,
}

#[derive(Debug, Error)]
#[error("unknown report kind: {0}")]
pub struct UnknownReportKind(String);

impl FromStr for ReportKind {
    type Err = UnknownReportKind;

    /// Accepts both english codes and the spanish words customers use.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "outage" | "corte" => Ok(Self::Outage),
            "complaint" | "reclamo" => Ok(Self::Complaint),
            "suggestion" | "sugerencia" => Ok(Self::Suggestion),
            other => Err(UnknownReportKind(other.to_string())),
        }
    }
}

impl ReportKind {
    pub fn as_code(self) -> &'static str {
        match self {
            Self::Outage => "outage",
            Self::Complaint => "complaint",
            Self::Suggestion => "suggestion",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub account_id: i64,
    pub kind: ReportKind,
    pub description: String,
    pub status: String,
    pub staff_response: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One logged chatbot exchange. `account_id` is absent for anonymous
/// callers; `useful` is filled in later by the feedback endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInteraction {
    pub id: i64,
    pub account_id: Option<i64>,
    pub user_message: String,
    pub bot_reply: String,
    pub at: DateTime<Utc>,
    pub useful: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInput {
    pub text: String,
    pub rut: Option<String>,
    pub account_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub interaction_id: Option<i64>,
    pub reply: String,
    pub user_message: String,
}

/// Static office information served by `/info/service-status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub office_hours: String,
    pub emergency_phone: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            office_hours: "Lunes a Viernes 08:30 - 14:00".to_string(),
            emergency_phone: "+569 9999 9999".to_string(),
        }
    }
}
