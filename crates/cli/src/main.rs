use std::env;
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use apr_api::auth::hash_password;
use apr_assistant::WaterAssistant;
use apr_core::Role;
use apr_observability::{init_tracing, AppMetrics};
use apr_storage::{
    DirectoryRepository, NewAccount, NewBill, NewSector, SectorUpdate, Store,
};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "apr")]
#[command(about = "APR cooperative backend CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat with the water assistant.
    Chat {
        /// RUT of the caller, for balance and sector queries.
        #[arg(long)]
        rut: Option<String>,
    },
    /// Ask a single question and print the reply.
    Ask {
        message: String,
        #[arg(long)]
        rut: Option<String>,
    },
    /// Load the demo sectors, accounts, and bills.
    Seed,
    /// Create an administrator account, or reset its password if the
    /// RUT already exists.
    CreateAdmin {
        #[arg(long)]
        rut: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "Oficina Central")]
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("apr_cli");
    let cli = Cli::parse();

    let store = Arc::new(build_store().await?);

    match cli.command {
        Command::Chat { rut } => {
            let assistant = WaterAssistant::new(store, AppMetrics::shared());
            run_chat(assistant, rut).await?;
        }
        Command::Ask { message, rut } => {
            let assistant = WaterAssistant::new(store, AppMetrics::shared());
            let reply = assistant.respond(&message, rut.as_deref()).await;
            println!("{reply}");
        }
        Command::Seed => seed(store.as_ref()).await?,
        Command::CreateAdmin {
            rut,
            name,
            password,
            address,
        } => create_admin(store.as_ref(), &rut, &name, &password, &address).await?,
    }

    Ok(())
}

async fn build_store() -> Result<Store> {
    if let Ok(database_url) = env::var("APR_DATABASE_URL") {
        Store::sqlite(&database_url).await
    } else {
        Ok(Store::memory())
    }
}

async fn run_chat(assistant: WaterAssistant<Store>, rut: Option<String>) -> Result<()> {
    println!("Asistente APR. Escriba 'salir' para terminar.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.eq_ignore_ascii_case("salir") || message.eq_ignore_ascii_case("exit") {
            break;
        }
        if message.is_empty() {
            continue;
        }

        let reply = assistant.respond(message, rut.as_deref()).await;
        println!("\n{reply}\n");
    }

    Ok(())
}

/// Demo dataset: one calm sector, one sector with an active outage, a
/// customer carrying debt, a customer up to date, and a passwordless
/// admin record. Safe to re-run against an existing database.
async fn seed(store: &Store) -> Result<()> {
    let calm = ensure_sector(store, "Villa Los Heroes", Some("Sin incidentes")).await?;
    let broken = ensure_sector(
        store,
        "Poblacion San Jose",
        Some("Rotura de matriz en Av. Principal"),
    )
    .await?;
    store
        .update_sector(
            broken.id,
            SectorUpdate {
                has_outage: Some(true),
                ..SectorUpdate::default()
            },
        )
        .await?;

    let juan = ensure_account(
        store,
        NewAccount {
            rut: "12345678-9".to_string(),
            full_name: "Juan Perez".to_string(),
            address: "Calle 1 #123".to_string(),
            role: Role::Customer,
            sector_id: calm.id,
            password_hash: None,
        },
    )
    .await?;
    ensure_account(
        store,
        NewAccount {
            rut: "98765432-1".to_string(),
            full_name: "Maria Gonzalez".to_string(),
            address: "Av. San Jose #45".to_string(),
            role: Role::Customer,
            sector_id: broken.id,
            password_hash: None,
        },
    )
    .await?;
    ensure_account(
        store,
        NewAccount {
            rut: "11111111-1".to_string(),
            full_name: "Admin APR".to_string(),
            address: "Oficina Central".to_string(),
            role: Role::Admin,
            sector_id: calm.id,
            password_hash: None,
        },
    )
    .await?;

    let now = chrono::Utc::now();
    ensure_bill(store, juan.id, "2025-01", 15000, now - chrono::Duration::days(30)).await?;
    ensure_bill(store, juan.id, "2025-02", 12500, now + chrono::Duration::days(5)).await?;

    println!("Datos de prueba cargados.");
    Ok(())
}

async fn ensure_sector(
    store: &Store,
    name: &str,
    alert_message: Option<&str>,
) -> Result<apr_core::Sector> {
    if let Some(existing) = store.find_sector_by_name(name).await? {
        return Ok(existing);
    }
    store
        .create_sector(NewSector {
            name: name.to_string(),
            alert_message: alert_message.map(ToString::to_string),
        })
        .await
}

async fn ensure_account(store: &Store, new: NewAccount) -> Result<apr_core::Account> {
    if let Some(existing) = store.find_by_rut(&new.rut).await? {
        return Ok(existing.account);
    }
    store.create_account(new).await
}

async fn ensure_bill(
    store: &Store,
    account_id: i64,
    period: &str,
    amount: i64,
    due_at: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    if store.find_bill_for_period(account_id, period).await?.is_some() {
        return Ok(());
    }
    store
        .create_bill(NewBill {
            account_id,
            period: period.to_string(),
            amount,
            due_at,
        })
        .await?;
    Ok(())
}

async fn create_admin(
    store: &Store,
    rut: &str,
    name: &str,
    password: &str,
    address: &str,
) -> Result<()> {
    let hash = hash_password(password);

    if store.find_by_rut(rut).await?.is_some() {
        store.set_credential(rut, &hash).await?;
        println!("La cuenta {rut} ya existía; contraseña actualizada.");
        return Ok(());
    }

    let sector = match store.list_sectors().await?.into_iter().next() {
        Some(sector) => sector,
        None => {
            store
                .create_sector(NewSector {
                    name: "Administración".to_string(),
                    alert_message: None,
                })
                .await?
        }
    };

    let account = store
        .create_account(NewAccount {
            rut: rut.to_string(),
            full_name: name.to_string(),
            address: address.to_string(),
            role: Role::Admin,
            sector_id: sector.id,
            password_hash: Some(hash),
        })
        .await?;

    println!(
        "Administrador creado: {} ({}). Login en POST /auth/token.",
        account.full_name, account.rut
    );
    Ok(())
}
