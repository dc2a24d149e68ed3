use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use apr_core::faq::{closest_faq, FaqStrategy, FAQS};
use apr_core::{classify_intent, normalize_message, responder, ChatInput, ChatReply, Intent};
use apr_observability::AppMetrics;
use apr_storage::{ChatLogRepository, DirectoryRepository};
use tracing::{info, instrument, warn};

/// The single conversational entry point. Stateless and reentrant:
/// every call re-reads the store, nothing is cached between calls, and
/// no failure escapes as an error — every outcome is a reply string.
#[derive(Clone)]
pub struct WaterAssistant<S>
where
    S: DirectoryRepository + ChatLogRepository,
{
    store: Arc<S>,
    metrics: Arc<AppMetrics>,
    faq_strategy: FaqStrategy,
}

impl<S> WaterAssistant<S>
where
    S: DirectoryRepository + ChatLogRepository,
{
    pub fn new(store: Arc<S>, metrics: Arc<AppMetrics>) -> Self {
        Self {
            store,
            metrics,
            faq_strategy: FaqStrategy::default(),
        }
    }

    pub fn with_faq_strategy(mut self, strategy: FaqStrategy) -> Self {
        self.faq_strategy = strategy;
        self
    }

    /// Classifies the message and produces exactly one reply. The
    /// caller identity is matched verbatim against the account store;
    /// it is never normalized.
    pub async fn respond(&self, message: &str, rut: Option<&str>) -> String {
        let (reply, _) = self.respond_classified(message, rut).await;
        reply
    }

    async fn respond_classified(&self, message: &str, rut: Option<&str>) -> (String, Intent) {
        self.metrics.inc_chat_request();
        let started = Instant::now();

        let normalized = normalize_message(message);
        let intent = classify_intent(&normalized);

        let reply = match intent {
            Intent::Greeting => responder::GREETING.to_string(),
            Intent::Subsidy { percent } => responder::subsidy_reply(percent).to_string(),
            Intent::SocialBenefits => responder::SOLIDARITY_FUND.to_string(),
            Intent::Scholarships => responder::SCHOLARSHIPS.to_string(),
            Intent::Overconsumption => responder::OVERCONSUMPTION.to_string(),
            Intent::Balance => self.balance_reply(rut).await,
            Intent::Outage => self.outage_reply(rut).await,
            Intent::Faq(index) => FAQS[index].1.to_string(),
            Intent::Unknown => self.unknown_reply(&normalized),
        };

        self.metrics.observe_latency(started.elapsed());
        (reply, intent)
    }

    async fn balance_reply(&self, rut: Option<&str>) -> String {
        let Some(rut) = rut else {
            return responder::BALANCE_NEEDS_IDENTITY.to_string();
        };

        match self.store.find_by_rut(rut).await {
            Ok(Some(profile)) => {
                let total = profile.total_debt();
                if total == 0 {
                    responder::NO_PENDING_DEBT.to_string()
                } else {
                    responder::debt_reply(total)
                }
            }
            Ok(None) => {
                self.metrics.inc_lookup_miss();
                responder::ACCOUNT_NOT_FOUND.to_string()
            }
            Err(error) => self.store_failure("balance lookup", error),
        }
    }

    async fn outage_reply(&self, rut: Option<&str>) -> String {
        // A known caller gets their own sector's status; an anonymous
        // or unresolved caller gets the global outage listing.
        if let Some(rut) = rut {
            match self.store.find_by_rut(rut).await {
                Ok(Some(profile)) => {
                    return if profile.sector.has_outage {
                        responder::sector_outage_reply(
                            &profile.sector.name,
                            profile.sector.alert_message.as_deref().unwrap_or(""),
                        )
                    } else {
                        responder::sector_normal_reply(&profile.sector.name)
                    };
                }
                Ok(None) => {
                    self.metrics.inc_lookup_miss();
                }
                Err(error) => return self.store_failure("sector lookup", error),
            }
        }

        match self.store.sectors_with_outage().await {
            Ok(outaged) if outaged.is_empty() => responder::ALL_SECTORS_NORMAL.to_string(),
            Ok(outaged) => {
                let names = outaged
                    .into_iter()
                    .map(|sector| sector.name)
                    .collect::<Vec<_>>();
                responder::outage_list_reply(&names)
            }
            Err(error) => self.store_failure("outage listing", error),
        }
    }

    fn unknown_reply(&self, normalized: &str) -> String {
        if self.faq_strategy == FaqStrategy::SubstringThenFuzzy {
            if let Some(answer) = closest_faq(normalized) {
                return answer.to_string();
            }
        }

        self.metrics.inc_fallback();
        responder::FALLBACK.to_string()
    }

    fn store_failure(&self, operation: &str, error: anyhow::Error) -> String {
        self.metrics.inc_store_failure();
        warn!(operation, error = %error, "store read failed, replying with apology");
        responder::STORE_UNAVAILABLE.to_string()
    }

    /// Responds and appends the exchange to the interaction log. Log
    /// persistence failures are reported in tracing, never to the
    /// caller.
    #[instrument(skip(self, input))]
    pub async fn handle_chat(&self, input: ChatInput) -> ChatReply {
        let rut = match (&input.rut, input.account_id) {
            (Some(rut), _) => Some(rut.clone()),
            (None, Some(account_id)) => self.resolve_rut(account_id).await,
            (None, None) => None,
        };

        let (reply, intent) = self.respond_classified(&input.text, rut.as_deref()).await;

        let interaction_id = match self
            .store
            .record_interaction(input.account_id, &input.text, &reply)
            .await
        {
            Ok(id) => Some(id),
            Err(error) => {
                warn!(error = %error, "failed to persist chat interaction");
                None
            }
        };

        info!(
            intent = intent.as_tag(),
            authenticated = rut.is_some(),
            interaction_id,
            "chat handled"
        );

        ChatReply {
            interaction_id,
            reply,
            user_message: input.text,
        }
    }

    pub async fn set_feedback(&self, interaction_id: i64, useful: bool) -> Result<bool> {
        self.store.set_feedback(interaction_id, useful).await
    }

    async fn resolve_rut(&self, account_id: i64) -> Option<String> {
        match self.store.find_account_by_id(account_id).await {
            Ok(Some(account)) => Some(account.rut),
            Ok(None) => None,
            Err(error) => {
                warn!(account_id, error = %error, "failed to resolve account rut");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use apr_core::{
        Account, AccountProfile, Bill, ChatInteraction, Role, Sector,
    };
    use apr_storage::{
        MemoryStore, NewAccount, NewBill, NewSector, SectorUpdate,
    };
    use chrono::{DateTime, Utc};

    async fn assistant_with_data() -> WaterAssistant<MemoryStore> {
        let store = MemoryStore::new();

        let calm = store
            .create_sector(NewSector {
                name: "Villa Los Heroes".to_string(),
                alert_message: None,
            })
            .await
            .unwrap();
        let broken = store
            .create_sector(NewSector {
                name: "Poblacion San Jose".to_string(),
                alert_message: None,
            })
            .await
            .unwrap();
        store
            .update_sector(
                broken.id,
                SectorUpdate {
                    has_outage: Some(true),
                    alert_message: Some("Rotura de matriz en Av. Principal".to_string()),
                    ..SectorUpdate::default()
                },
            )
            .await
            .unwrap();

        let debtor = store
            .create_account(NewAccount {
                rut: "12345678-9".to_string(),
                full_name: "Juan Perez".to_string(),
                address: "Calle 1 #123".to_string(),
                role: Role::Customer,
                sector_id: calm.id,
                password_hash: None,
            })
            .await
            .unwrap();
        store
            .create_bill(NewBill {
                account_id: debtor.id,
                period: "2025-01".to_string(),
                amount: 500,
                due_at: Utc::now(),
            })
            .await
            .unwrap();
        let paid = store
            .create_bill(NewBill {
                account_id: debtor.id,
                period: "2024-12".to_string(),
                amount: 300,
                due_at: Utc::now(),
            })
            .await
            .unwrap();
        store.mark_bill_paid(paid.id, Utc::now()).await.unwrap();

        let settled = store
            .create_account(NewAccount {
                rut: "98765432-1".to_string(),
                full_name: "Maria Gonzalez".to_string(),
                address: "Av. San Jose #45".to_string(),
                role: Role::Customer,
                sector_id: broken.id,
                password_hash: None,
            })
            .await
            .unwrap();
        let settled_bill = store
            .create_bill(NewBill {
                account_id: settled.id,
                period: "2025-01".to_string(),
                amount: 700,
                due_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .mark_bill_paid(settled_bill.id, Utc::now())
            .await
            .unwrap();

        WaterAssistant::new(Arc::new(store), AppMetrics::shared())
    }

    #[tokio::test]
    async fn greeting_wins_even_with_balance_keyword() {
        let assistant = assistant_with_data().await;
        let reply = assistant
            .respond("hola, cuanto debo de mi cuenta?", Some("12345678-9"))
            .await;
        assert_eq!(reply, responder::GREETING);
    }

    #[tokio::test]
    async fn subsidy_threshold_is_inclusive() {
        let assistant = assistant_with_data().await;
        assert_eq!(
            assistant.respond("mi rsh es 40", None).await,
            responder::SUBSIDY_QUALIFIES
        );
        assert_eq!(
            assistant.respond("mi rsh es 41", None).await,
            responder::SUBSIDY_REJECTED
        );
    }

    #[tokio::test]
    async fn subsidy_without_number_explains_requirements() {
        let assistant = assistant_with_data().await;
        assert_eq!(
            assistant.respond("como funciona el subsidio?", None).await,
            responder::SUBSIDY_INFO
        );
    }

    #[tokio::test]
    async fn balance_without_identity_asks_for_rut() {
        let assistant = assistant_with_data().await;
        assert_eq!(
            assistant.respond("cuanto es mi saldo", None).await,
            responder::BALANCE_NEEDS_IDENTITY
        );
    }

    #[tokio::test]
    async fn balance_sums_only_unpaid_bills() {
        let assistant = assistant_with_data().await;
        let reply = assistant.respond("saldo por favor", Some("12345678-9")).await;
        assert!(reply.contains("$500"), "unexpected reply: {reply}");
    }

    #[tokio::test]
    async fn balance_with_everything_paid_reports_no_debt() {
        let assistant = assistant_with_data().await;
        assert_eq!(
            assistant.respond("cuanto debo", Some("98765432-1")).await,
            responder::NO_PENDING_DEBT
        );
    }

    #[tokio::test]
    async fn balance_with_unknown_rut_is_a_user_facing_miss() {
        let assistant = assistant_with_data().await;
        assert_eq!(
            assistant.respond("deuda", Some("11111111-1")).await,
            responder::ACCOUNT_NOT_FOUND
        );
    }

    #[tokio::test]
    async fn outage_reply_names_sector_and_alert_verbatim() {
        let assistant = assistant_with_data().await;
        let reply = assistant.respond("hay corte?", Some("98765432-1")).await;
        assert!(reply.contains("Poblacion San Jose"));
        assert!(reply.contains("Rotura de matriz en Av. Principal"));
    }

    #[tokio::test]
    async fn calm_sector_suggests_checking_the_valve() {
        let assistant = assistant_with_data().await;
        let reply = assistant.respond("no tengo agua", Some("12345678-9")).await;
        assert!(reply.contains("Villa Los Heroes"));
        assert!(reply.contains("llave de paso"));
    }

    #[tokio::test]
    async fn anonymous_outage_query_lists_affected_sectors() {
        let assistant = assistant_with_data().await;
        let reply = assistant.respond("hay corte de agua?", None).await;
        assert!(reply.contains("Poblacion San Jose"));
    }

    #[tokio::test]
    async fn unresolved_identity_falls_back_to_global_listing() {
        let assistant = assistant_with_data().await;
        let reply = assistant.respond("hay corte?", Some("00000000-0")).await;
        assert!(reply.contains("Poblacion San Jose"));
    }

    #[tokio::test]
    async fn empty_message_hits_the_fallback() {
        let assistant = assistant_with_data().await;
        assert_eq!(assistant.respond("", None).await, responder::FALLBACK);
    }

    #[tokio::test]
    async fn identical_calls_give_identical_replies() {
        let assistant = assistant_with_data().await;
        let first = assistant.respond("saldo", Some("12345678-9")).await;
        let second = assistant.respond("saldo", Some("12345678-9")).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn faq_substring_answers_from_the_table() {
        let assistant = assistant_with_data().await;
        let reply = assistant.respond("donde puedo pagar?", None).await;
        assert_eq!(reply, FAQS[3].1);
    }

    #[tokio::test]
    async fn fuzzy_strategy_catches_misspelled_faq_keys() {
        let assistant = assistant_with_data()
            .await
            .with_faq_strategy(FaqStrategy::SubstringThenFuzzy);
        assert_eq!(assistant.respond("orario", None).await, FAQS[0].1);
    }

    #[tokio::test]
    async fn handle_chat_records_an_interaction() {
        let assistant = assistant_with_data().await;
        let reply = assistant
            .handle_chat(ChatInput {
                text: "hola".to_string(),
                rut: None,
                account_id: None,
            })
            .await;
        assert!(reply.interaction_id.is_some());
        assert_eq!(reply.reply, responder::GREETING);
    }

    #[tokio::test]
    async fn outage_query_with_no_incidents_reports_all_normal() {
        let store = MemoryStore::new();
        store
            .create_sector(NewSector {
                name: "Villa Los Heroes".to_string(),
                alert_message: None,
            })
            .await
            .unwrap();
        let assistant = WaterAssistant::new(Arc::new(store), AppMetrics::shared());

        assert_eq!(
            assistant.respond("hay corte de agua?", None).await,
            responder::ALL_SECTORS_NORMAL
        );
    }

    /// Store that fails every call, standing in for a database that
    /// went away mid-request.
    struct OfflineStore;

    impl DirectoryRepository for OfflineStore {
        async fn find_by_rut(&self, _rut: &str) -> Result<Option<AccountProfile>> {
            bail!("store offline")
        }
        async fn find_account_by_id(&self, _account_id: i64) -> Result<Option<Account>> {
            bail!("store offline")
        }
        async fn credential_for_rut(&self, _rut: &str) -> Result<Option<String>> {
            bail!("store offline")
        }
        async fn set_credential(&self, _rut: &str, _password_hash: &str) -> Result<bool> {
            bail!("store offline")
        }
        async fn create_account(&self, _new: NewAccount) -> Result<Account> {
            bail!("store offline")
        }
        async fn update_account_contact(
            &self,
            _account_id: i64,
            _address: &str,
            _sector_id: i64,
        ) -> Result<()> {
            bail!("store offline")
        }
        async fn list_staff(&self) -> Result<Vec<Account>> {
            bail!("store offline")
        }
        async fn list_sectors(&self) -> Result<Vec<Sector>> {
            bail!("store offline")
        }
        async fn find_sector_by_name(&self, _name: &str) -> Result<Option<Sector>> {
            bail!("store offline")
        }
        async fn create_sector(&self, _new: NewSector) -> Result<Sector> {
            bail!("store offline")
        }
        async fn update_sector(
            &self,
            _sector_id: i64,
            _update: SectorUpdate,
        ) -> Result<Option<Sector>> {
            bail!("store offline")
        }
        async fn sectors_with_outage(&self) -> Result<Vec<Sector>> {
            bail!("store offline")
        }
        async fn create_bill(&self, _new: NewBill) -> Result<Bill> {
            bail!("store offline")
        }
        async fn find_bill_for_period(
            &self,
            _account_id: i64,
            _period: &str,
        ) -> Result<Option<Bill>> {
            bail!("store offline")
        }
        async fn reopen_bill(&self, _bill_id: i64, _amount: i64) -> Result<()> {
            bail!("store offline")
        }
        async fn mark_bill_paid(&self, _bill_id: i64, _paid_at: DateTime<Utc>) -> Result<bool> {
            bail!("store offline")
        }
    }

    impl ChatLogRepository for OfflineStore {
        async fn record_interaction(
            &self,
            _account_id: Option<i64>,
            _user_message: &str,
            _bot_reply: &str,
        ) -> Result<i64> {
            bail!("store offline")
        }
        async fn set_feedback(&self, _interaction_id: i64, _useful: bool) -> Result<bool> {
            bail!("store offline")
        }
        async fn recent_interactions(&self, _limit: usize) -> Result<Vec<ChatInteraction>> {
            bail!("store offline")
        }
    }

    #[tokio::test]
    async fn store_failures_surface_as_an_apology_string() {
        let assistant = WaterAssistant::new(Arc::new(OfflineStore), AppMetrics::shared());

        assert_eq!(
            assistant.respond("saldo", Some("12345678-9")).await,
            responder::STORE_UNAVAILABLE
        );
        assert_eq!(
            assistant.respond("hay corte?", Some("12345678-9")).await,
            responder::STORE_UNAVAILABLE
        );
        assert_eq!(
            assistant.respond("hay corte?", None).await,
            responder::STORE_UNAVAILABLE
        );
    }
}
