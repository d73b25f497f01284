// ABOUTME: Command implementations for the escape CLI
// ABOUTME: Login, poke, scry, subscribe, and thread against the configured ship

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use escape_airlock::auth::{
    is_valid_access_code, login_client, normalize_ship_url, ship_from_cookie,
};
use escape_airlock::{
    Airlock, AirlockError, ChannelObserver, ConnectionStatus, SubscriptionEvent, ThreadRequest,
};
use serde_json::Value;
use tokio::sync::mpsc;

pub use config::EscapeConfig;

/// Log in with an access code and save the session.
pub async fn login(url: String, password: Option<String>, desk: Option<String>) -> Result<()> {
    let ship_url = normalize_ship_url(&url).context("Invalid ship URL")?;

    let password = match password {
        Some(p) => p,
        None => dialoguer::Password::new()
            .with_prompt(format!("Access code for {ship_url}"))
            .interact()
            .context("Failed to read access code")?,
    };
    let password = password.trim().to_string();
    if !is_valid_access_code(&password) {
        bail!("Please enter a valid access code (four groups of six letters, e.g. sampel-ticlyt-migfun-falmel)");
    }

    println!("{} Logging in to {}...", "[1/2]".dimmed(), ship_url);
    let http = login_client()?;
    let cookie = escape_airlock::auth::login(&http, &ship_url, &password)
        .await
        .context("Login failed")?;
    let ship = ship_from_cookie(&cookie).context("Ship did not identify itself in its cookie")?;

    let config = EscapeConfig {
        ship_url,
        ship,
        cookie,
        desk,
    };
    config.save()?;

    println!(
        "{} Logged in as {}",
        "[2/2]".dimmed(),
        format!("~{}", config.ship).green().bold()
    );
    println!(
        "  Config saved to {}",
        EscapeConfig::config_path()?.display().to_string().dimmed()
    );
    Ok(())
}

/// Poke `app` with a JSON payload.
pub async fn poke(app: String, mark: String, json: String, ship: Option<String>) -> Result<()> {
    let payload = parse_json_arg(&json)?;
    let airlock = connect()?;
    let ship = ship.unwrap_or_else(|| airlock.ship().to_string());

    let id = airlock
        .poke_ship(&ship, &app, &mark, payload)
        .await
        .with_context(|| format!("Poke to {app} failed"))?;
    println!("{} poke {} acknowledged", "✓".green().bold(), id);

    airlock.reset().await;
    Ok(())
}

/// Print one scry result.
pub async fn scry(app: String, path: String) -> Result<()> {
    let airlock = connect()?;
    let value = airlock
        .scry(&app, &path)
        .await
        .with_context(|| format!("Scry of {app}{path} failed"))?;
    println!("{}", pretty(&value));
    Ok(())
}

/// Print facts from a subscription until it quits or Ctrl-C.
pub async fn subscribe(app: String, path: String, once: bool, timeout_secs: u64) -> Result<()> {
    let airlock = connect()?;
    airlock.set_observer(Arc::new(StatusPrinter));

    if once {
        let timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));
        let fact = airlock.subscribe_once(&app, &path, timeout).await;
        airlock.reset().await;
        println!("{}", pretty(&fact.context("No fact received")?));
        return Ok(());
    }

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let id = airlock
        .subscribe(&app, &path, events_tx)
        .await
        .with_context(|| format!("Subscribe to {app}{path} failed"))?;
    eprintln!(
        "{} subscribed to {}{} (id {}), Ctrl-C to stop",
        "●".green(),
        app,
        path,
        id
    );
    if let Some(path) = escape_log::log_path("escape") {
        eprintln!("  logs: {}", path.display().to_string().dimmed());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if let Err(err) = airlock.unsubscribe(id).await {
                    tracing::warn!(id, error = %err, "unsubscribe failed");
                }
                break;
            }
            event = events_rx.recv() => match event {
                Some(SubscriptionEvent::Fact { json, .. }) => println!("{}", pretty(&json)),
                Some(SubscriptionEvent::Error { err, .. }) => {
                    airlock.reset().await;
                    bail!("Subscription rejected: {err}");
                }
                Some(SubscriptionEvent::Quit { .. }) => {
                    eprintln!("{} subscription ended by ship", "!".yellow().bold());
                    break;
                }
                None => bail!("Channel closed"),
            },
        }
    }

    airlock.reset().await;
    Ok(())
}

/// Run a thread and print its result.
pub async fn thread(
    input_mark: String,
    output_mark: String,
    thread_name: String,
    json: String,
    desk: Option<String>,
) -> Result<()> {
    let body = parse_json_arg(&json)?;
    let airlock = connect()?;

    let mut request = ThreadRequest::new(input_mark, output_mark, thread_name.clone(), body);
    request.desk = desk;
    let result = airlock.thread(request).await.map_err(|err| match err {
        AirlockError::MissingDesk => {
            anyhow::anyhow!(
                "{}: pass --desk or set `desk` in the config file",
                AirlockError::MissingDesk
            )
        }
        other => anyhow::Error::new(other).context(format!("Thread {thread_name} failed")),
    })?;
    println!("{}", pretty(&result));
    Ok(())
}

/// Build a client from the saved config.
fn connect() -> Result<Airlock> {
    if !EscapeConfig::exists() {
        bail!("Not logged in. Run `escape login <url>` first.");
    }
    let config = EscapeConfig::load()?;
    Airlock::new(config.to_airlock_config()).context("Failed to create channel client")
}

/// Parse a JSON command-line argument.
pub fn parse_json_arg(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| {
        format!("Invalid JSON argument: {raw} (strings need quotes, e.g. '\"hi\"')")
    })
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Prints connection changes to stderr while a subscription runs.
struct StatusPrinter;

impl ChannelObserver for StatusPrinter {
    fn on_retry(&self, attempt: u32, delay: Duration) {
        eprintln!(
            "{} connection lost, retry {} in {}ms",
            "!".yellow().bold(),
            attempt,
            delay.as_millis()
        );
    }

    fn on_fatal(&self, error: &AirlockError) {
        eprintln!("{} {}", "✗".red().bold(), error);
    }

    fn on_status(&self, status: ConnectionStatus) {
        tracing::debug!(%status, "connection status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_arg() {
        assert_eq!(
            parse_json_arg(r#"{"a": 1}"#).unwrap(),
            serde_json::json!({"a": 1})
        );
        assert_eq!(parse_json_arg(r#""hi""#).unwrap(), Value::String("hi".into()));
        assert!(parse_json_arg("hi").is_err());
    }

    #[test]
    fn test_pretty_is_indented() {
        let value = serde_json::json!({"a": [1, 2]});
        assert!(pretty(&value).contains("\n  \"a\""));
    }
}
