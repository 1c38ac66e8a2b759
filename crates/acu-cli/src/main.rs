//! acu - command-line client for the ACU storefront API.
//!
//! Signs customers in and out, registers accounts and submits the contact
//! form against the storefront backend, keeping the session between runs.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use acu_core::config::BackendKind;
use acu_core::services::{ContactForm, LoginPayload, RegisterPayload};
use acu_core::validation;
use acu_core::{ApiClient, ApiError, Config, CredentialStore, Route, SessionWatcher};

// ============================================================================
// Constants
// ============================================================================

/// How long to wait for the session watcher to record a forced sign-out
const SIGN_OUT_GRACE_MS: u64 = 200;

/// Log file name inside `ACU_LOG_DIR`
const LOG_FILE_PREFIX: &str = "acu.log";

const USAGE: &str = "\
Usage: acu [--ephemeral] <command> [args]

Commands:
  login [email]                    Sign in (password is prompted)
  register                         Create an account
  logout                           Sign out and forget stored tokens
  me                               Show the signed-in customer
  status                           Show local session state
  contact [name] [email] [message] Send the contact form

Options:
  --ephemeral   Keep credentials in memory only for this run

Environment:
  ACU_API_BASE_URL, ACU_API_KEY, ACU_REQUEST_TIMEOUT_SECS,
  ACU_CREDENTIAL_BACKEND (file|keyring|memory), ACU_LOG_DIR, RUST_LOG";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var("ACU_LOG_DIR") {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
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

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let ephemeral = take_flag(&mut args, "--ephemeral");
    if args.is_empty() || take_flag(&mut args, "--help") {
        println!("{}", USAGE);
        return Ok(());
    }
    let command = args.remove(0);

    let mut config = Config::load()?;
    if ephemeral {
        config.credential_backend = BackendKind::Memory;
    }
    info!(command = %command, api = %config.api_base_url, "acu starting");

    let store = Arc::new(CredentialStore::open(config.credential_backend()?));
    let watcher = SessionWatcher::spawn(store.clone());
    let mut session = watcher.subscribe();
    let client = ApiClient::new(&config, store)?;

    let result = match command.as_str() {
        "login" => login(&client, args.first().cloned()).await,
        "register" => register(&client).await,
        "logout" => {
            client.logout().await;
            println!("Você saiu da sua conta.");
            Ok(())
        }
        "me" => me(&client).await,
        "status" => {
            status(&watcher);
            Ok(())
        }
        "contact" => contact(&client, &args).await,
        other => {
            eprintln!("{}", USAGE);
            bail!("Unknown command: {}", other)
        }
    };

    if let Err(ref e) = result {
        if may_have_signed_out(e) {
            let _ = tokio::time::timeout(
                Duration::from_millis(SIGN_OUT_GRACE_MS),
                session.wait_for(|s| s.route == Route::SignIn),
            )
            .await;
            if watcher.current().route == Route::SignIn {
                eprintln!("Sua sessão expirou. Faça login novamente: acu login");
            }
        }
    }

    result
}

/// Whether `error` came from an auth failure that can clear the session.
fn may_have_signed_out(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<ApiError>())
        .any(|e| matches!(e, ApiError::Unauthorized) || e.is_terminal_auth())
}

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|a| a != flag);
    args.len() != before
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn login(client: &ApiClient, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt("Email")?,
    };
    let password = rpassword::prompt_password("Senha: ")?;
    if let Err(e) = validation::validate_login(&email, &password) {
        bail!(e);
    }

    match client.login(&LoginPayload { email, password }).await {
        Ok(Some(user)) => println!("Login bem-sucedido. Olá, {}!", user.display_name()),
        Ok(None) => println!("Login bem-sucedido."),
        Err(failure) => bail!("{}: {}", failure.title(), failure.message()),
    }
    Ok(())
}

async fn register(client: &ApiClient) -> Result<()> {
    let name = prompt("Nome")?;
    let email = prompt("Email")?;
    let password = rpassword::prompt_password("Senha: ")?;
    let confirm = rpassword::prompt_password("Confirmar senha: ")?;
    if let Err(e) = validation::validate_registration(&name, &email, &password, &confirm) {
        bail!(e);
    }

    match client.register(&RegisterPayload { name, email, password }).await {
        Ok(()) => {
            println!("Conta criada! Faça login para continuar: acu login");
            Ok(())
        }
        Err(failure) => bail!("{}: {}", failure.title(), failure.message()),
    }
}

async fn me(client: &ApiClient) -> Result<()> {
    if !client.store().is_signed_in() {
        bail!("Você não está conectado. Use: acu login");
    }
    let user = client.fetch_me().await?;
    client.store().set_user(user.clone());
    println!("{}", serde_json::to_string_pretty(&user)?);
    Ok(())
}

fn status(watcher: &SessionWatcher) {
    let state = watcher.current();
    if state.is_authenticated {
        let who = state.user.as_ref().map(|u| u.display_name()).unwrap_or("(perfil não carregado)");
        println!("Conectado como {}", who);
    } else {
        println!("Não conectado");
    }
}

async fn contact(client: &ApiClient, args: &[String]) -> Result<()> {
    let name = match args.first() {
        Some(name) => name.clone(),
        None => prompt("Nome")?,
    };
    let email = match args.get(1) {
        Some(email) => email.clone(),
        None => prompt("Email")?,
    };
    let message = if args.len() > 2 {
        args[2..].join(" ")
    } else {
        prompt("Mensagem")?
    };

    let errors = validation::contact_errors(&name, &email, &message);
    if !errors.is_empty() {
        for (field, error) in &errors {
            eprintln!("  {}: {}", field.as_str(), error);
        }
        bail!("Formulário inválido");
    }

    let response = client
        .send_contact(&ContactForm { name, email, message })
        .await?;
    println!("{}", response.message);
    Ok(())
}
