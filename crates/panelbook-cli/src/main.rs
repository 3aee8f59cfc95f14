//! panelbook - command-line client for the panelbook scheduling platform.
//!
//! Drives the session core end to end: log in, restore the stored session,
//! look up interviews through the stale-while-revalidate cache, log out.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use panelbook_core::{
    ApiClient, AuthState, CacheEntry, Config, CredentialStore, Interview, InterviewCache,
    KeyringStore, MemoryStore,
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: panelbook [--ephemeral] <command>

Commands:
  login [email]         Log in and store the session in the OS keychain
  whoami                Restore the stored session and print the identity
  interview <id>...     Show interviews (cached copy first, then fresh)
  logout                Forget the stored session

Options:
  --ephemeral           Keep credentials in memory only

Environment:
  PANELBOOK_API_URL       Backend base URL
  PANELBOOK_TIMEOUT_SECS  Request timeout in seconds
  PANELBOOK_LOG_DIR       Also write daily log files to this directory
  RUST_LOG                Log filter (default: warn)";

/// Initialize the tracing subscriber for logging.
///
/// Returns the file writer guard, which must live until exit so buffered
/// lines are flushed.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var("PANELBOOK_LOG_DIR") {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "panelbook.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

enum Command {
    Login(Option<String>),
    WhoAmI,
    Interview(Vec<i64>),
    Logout,
}

struct Args {
    ephemeral: bool,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut ephemeral = false;
    let mut rest = Vec::new();
    for arg in args {
        match arg.as_str() {
            "--ephemeral" => ephemeral = true,
            "-h" | "--help" => bail!("{}", USAGE),
            _ => rest.push(arg.as_str()),
        }
    }

    let command = match rest.split_first() {
        Some((&"login", tail)) => Command::Login(tail.first().map(|s| s.to_string())),
        Some((&"whoami", _)) => Command::WhoAmI,
        Some((&"logout", _)) => Command::Logout,
        Some((&"interview", ids)) if !ids.is_empty() => {
            let ids = ids
                .iter()
                .map(|id| {
                    id.parse::<i64>()
                        .with_context(|| format!("Invalid interview id: {}", id))
                })
                .collect::<Result<Vec<_>>>()?;
            Command::Interview(ids)
        }
        _ => bail!("{}", USAGE),
    };

    Ok(Args { ephemeral, command })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&argv)?;

    let mut config = Config::load()?;
    config.apply_env();
    info!(api = %config.api_base_url, "panelbook starting");

    let store: Arc<dyn CredentialStore> = if args.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(KeyringStore::new(config.keyring_service.clone()))
    };
    let client = ApiClient::new(&config, store)?;

    match args.command {
        Command::Login(email) => login(&client, &mut config, email).await,
        Command::WhoAmI => whoami(&client).await,
        Command::Interview(ids) => show_interviews(&client, &ids).await,
        Command::Logout => {
            client.logout();
            println!("Logged out.");
            Ok(())
        }
    }
}

fn prompt_email(default: Option<&str>) -> Result<String> {
    match default {
        Some(email) => print!("Email [{}]: ", email),
        None => print!("Email: "),
    }
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();
    match (input.is_empty(), default) {
        (true, Some(email)) => Ok(email.to_string()),
        (true, None) => bail!("Email is required"),
        (false, _) => Ok(input.to_string()),
    }
}

async fn login(client: &ApiClient, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt_email(config.last_email.as_deref())?,
    };
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;

    let identity = client.login(&email, &password).await?;

    config.last_email = Some(email.clone());
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }

    match identity {
        Some(identity) => println!("Logged in as {} ({})", identity.display_name(), identity.role),
        None => println!("Logged in as {}", email),
    }
    Ok(())
}

async fn require_session(client: &ApiClient) -> Result<()> {
    if client.restore_session().await != AuthState::Authenticated {
        bail!("Not logged in. Run `panelbook login` first.");
    }
    Ok(())
}

async fn whoami(client: &ApiClient) -> Result<()> {
    require_session(client).await?;
    match client.session().identity() {
        Some(identity) => {
            println!("Name:         {}", identity.display_name());
            println!("Email:        {}", identity.email);
            println!("Role:         {}", identity.role);
            if let Some(committee) = identity.committee_id {
                println!("Committee:    {}", committee);
            }
            if let Some(subcommittee) = identity.subcommittee_id {
                println!("Subcommittee: {}", subcommittee);
            }
        }
        None => println!("Logged in (identity details unavailable)"),
    }
    Ok(())
}

/// "fetched"/"updated" plus how old the cached copy is, when there is one.
fn delivery_label(deliveries: usize, entry: Option<&CacheEntry<Interview>>) -> String {
    let kind = if deliveries == 1 { "fetched" } else { "updated" };
    match entry {
        Some(entry) => format!("{} {}", kind, entry.age_display()),
        None => kind.to_string(),
    }
}

fn print_interview(interview: &Interview, label: &str) {
    println!(
        "[{}] #{} {} - {} @ {}",
        label,
        interview.id,
        interview.title,
        interview.formatted_date(),
        interview.location_display()
    );
    let names = interview.participant_names();
    if !names.is_empty() {
        println!("       participants: {}", names.join(", "));
    }
}

async fn show_interviews(client: &ApiClient, ids: &[i64]) -> Result<()> {
    require_session(client).await?;
    let cache = InterviewCache::new(client.clone());

    let lookups = ids.iter().map(|&id| {
        let cache = cache.clone();
        async move {
            let mut deliveries = 0;
            let result = cache
                .fetch_with_cache(id, None, |interview| {
                    deliveries += 1;
                    let label = delivery_label(deliveries, cache.entry(id).as_ref());
                    print_interview(&interview, &label);
                })
                .await;
            (id, result)
        }
    });

    let mut failed = false;
    for (id, result) in futures::future::join_all(lookups).await {
        if let Err(e) = result {
            failed = true;
            if e.is_auth_failure() {
                eprintln!("Session expired. Run `panelbook login` again.");
                break;
            }
            eprintln!("Interview #{}: {}", id, e);
        }
    }

    if failed {
        bail!("Some interviews could not be loaded");
    }
    Ok(())
}
