//! Command-line front end: one subcommand per provider operation, JSON on stdout.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::ledger::{LedgerApiClient, LedgerOAuthClient};
use crate::persistence::Persistence;
use crate::phone::{OpenPhoneHttp, PhoneApi};
use crate::sync::trigger_openphone_sync;

/// Sync QuickBooks and OpenPhone data into the local client database
#[derive(Debug, Parser)]
#[command(name = "bizsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file to use instead of the default search path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Phone provider operations
    #[command(subcommand)]
    Phone(PhoneCommand),

    /// Ledger provider operations
    #[command(subcommand)]
    Ledger(LedgerCommand),

    /// Local client records
    #[command(subcommand)]
    Clients(ClientsCommand),
}

#[derive(Debug, Subcommand)]
pub enum PhoneCommand {
    /// Pull lines, calls and messages into the local database
    Sync {
        /// Override both the call and message fetch limit
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Print recent calls as the provider returns them
    Calls {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Print recent messages as the provider returns them
    Messages {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Print the account's phone numbers
    Numbers,
}

#[derive(Debug, Args)]
pub struct RealmArg {
    /// Company (realm) id the credentials belong to
    #[arg(long)]
    pub realm: String,
}

#[derive(Debug, Subcommand)]
pub enum LedgerCommand {
    /// Print the consent URL to start the OAuth flow
    AuthUrl {
        #[arg(long)]
        state: Option<String>,
    },
    /// Exchange an authorization code and store the tokens
    Exchange {
        #[arg(long)]
        code: String,
        #[command(flatten)]
        realm: RealmArg,
    },
    /// Force a refresh of the stored tokens
    Refresh(RealmArg),
    /// Revoke the stored tokens and forget them
    Revoke(RealmArg),
    Customers(RealmArg),
    Invoices {
        #[command(flatten)]
        realm: RealmArg,
        #[arg(long)]
        customer: Option<String>,
    },
    /// Invoices with an open balance past their due date
    Overdue(RealmArg),
    Payments {
        #[command(flatten)]
        realm: RealmArg,
        #[arg(long)]
        customer: Option<String>,
    },
    /// Financial reports
    #[command(subcommand)]
    Report(ReportCommand),
}

#[derive(Debug, Subcommand)]
pub enum ReportCommand {
    /// Profit and loss
    Pnl {
        #[command(flatten)]
        realm: RealmArg,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    BalanceSheet {
        #[command(flatten)]
        realm: RealmArg,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ClientsCommand {
    List,
}

/// Loaded configuration plus the open database.
pub struct CliState {
    pub config: AppConfig,
    pub persistence: Arc<Persistence>,
}

impl CliState {
    /// Load configuration and open the database.
    pub fn initialize(config_path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => AppConfig::load_from_file(path)?,
            None => AppConfig::load()?,
        };
        config.apply_env_overrides();
        config.validate()?;
        let persistence = Persistence::new(&config.database.path).with_context(|| {
            format!("opening database at {}", config.database.path.display())
        })?;
        Ok(Self {
            config,
            persistence: Arc::new(persistence),
        })
    }

    pub async fn run(&self, command: Commands, cancel: CancellationToken) -> Result<()> {
        match command {
            Commands::Phone(cmd) => self.run_phone(cmd, cancel).await,
            Commands::Ledger(cmd) => self.run_ledger(cmd).await,
            Commands::Clients(ClientsCommand::List) => {
                print_json(&self.persistence.list_clients()?)
            }
        }
    }

    async fn run_phone(&self, command: PhoneCommand, cancel: CancellationToken) -> Result<()> {
        match command {
            PhoneCommand::Sync { limit } => {
                let config = self.sync_config(limit);
                let summary =
                    trigger_openphone_sync(&config, self.persistence.clone(), cancel).await?;
                print_json(&summary)
            }
            PhoneCommand::Calls { limit } => print_json(&self.phone_api()?.list_calls(limit).await?),
            PhoneCommand::Messages { limit } => {
                print_json(&self.phone_api()?.list_messages(limit).await?)
            }
            PhoneCommand::Numbers => print_json(&self.phone_api()?.list_phone_numbers().await?),
        }
    }

    async fn run_ledger(&self, command: LedgerCommand) -> Result<()> {
        let oauth = Arc::new(LedgerOAuthClient::new(
            self.config.ledger_auth_config()?,
            self.persistence.clone(),
        )?);
        let api = LedgerApiClient::new(oauth.clone());

        match command {
            LedgerCommand::AuthUrl { state } => {
                println!("{}", oauth.authorization_url(state.as_deref()));
                Ok(())
            }
            LedgerCommand::Exchange { code, realm } => {
                let token = oauth.exchange_code_for_tokens(&code, &realm.realm).await?;
                print_json(&serde_json::json!({
                    "realm_id": token.realm_id,
                    "access_expires_at": token.access_expires_at,
                    "refresh_expires_at": token.refresh_expires_at,
                }))
            }
            LedgerCommand::Refresh(realm) => {
                let token = oauth.force_refresh(&realm.realm).await?;
                print_json(&serde_json::json!({
                    "realm_id": token.realm_id,
                    "access_expires_at": token.access_expires_at,
                }))
            }
            LedgerCommand::Revoke(realm) => {
                let removed = oauth.disconnect(&realm.realm).await?;
                print_json(&serde_json::json!({ "realm_id": realm.realm, "revoked": removed }))
            }
            LedgerCommand::Customers(realm) => print_json(&api.get_customers(&realm.realm).await?),
            LedgerCommand::Invoices { realm, customer } => {
                print_json(&api.get_invoices(&realm.realm, customer.as_deref()).await?)
            }
            LedgerCommand::Overdue(realm) => {
                print_json(&api.get_overdue_invoices(&realm.realm).await?)
            }
            LedgerCommand::Payments { realm, customer } => {
                print_json(&api.get_payments(&realm.realm, customer.as_deref()).await?)
            }
            LedgerCommand::Report(ReportCommand::Pnl { realm, start, end }) => {
                print_json(&api.get_profit_and_loss(&realm.realm, start, end).await?)
            }
            LedgerCommand::Report(ReportCommand::BalanceSheet { realm, as_of }) => {
                print_json(&api.get_balance_sheet(&realm.realm, as_of).await?)
            }
        }
    }

    /// Configuration for one sync run, with `--limit` applied to both phases.
    fn sync_config(&self, limit: Option<u32>) -> AppConfig {
        let mut config = self.config.clone();
        if let Some(limit) = limit {
            config.sync.call_limit = limit;
            config.sync.message_limit = limit;
        }
        config
    }

    fn phone_api(&self) -> Result<OpenPhoneHttp> {
        Ok(OpenPhoneHttp::new(&self.config.phone_sync_config()?)?)
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
