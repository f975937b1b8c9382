use std::{env, path::PathBuf};

use sqlx::postgres::PgConnectOptions;

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_ATTACHMENT_DIR: &str = "./chat_attachments";
const DEFAULT_UNREAD_POLL_SECONDS: u64 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// `None` runs the service on the in-memory store.
    pub database: Option<PgConnectOptions>,
    pub attachment_dir: PathBuf,
    pub unread_poll_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database: None,
            attachment_dir: PathBuf::from(DEFAULT_ATTACHMENT_DIR),
            unread_poll_seconds: DEFAULT_UNREAD_POLL_SECONDS,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// `DATABASE_URL` wins. Otherwise connection parts are read from
/// `POSTGRES_*` (or libpq's `PG*`) variables, only when a host or database
/// was given. Parts are set individually so passwords need no escaping.
fn resolve_database(
    var: impl Fn(&str) -> Option<String>,
) -> Result<Option<PgConnectOptions>, sqlx::Error> {
    if let Some(url) = var("DATABASE_URL") {
        return url.parse::<PgConnectOptions>().map(Some);
    }
    let either = |primary: &str, libpq: &str| var(primary).or_else(|| var(libpq));

    let host = either("POSTGRES_HOST", "PGHOST");
    let db = either("POSTGRES_DB", "PGDATABASE");
    if host.is_none() && db.is_none() {
        return Ok(None);
    }
    let port = either("POSTGRES_PORT", "PGPORT")
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(5432);
    let user = either("POSTGRES_USER", "PGUSER").unwrap_or_else(|| "postgres".to_string());

    let mut options = PgConnectOptions::new()
        .host(host.as_deref().unwrap_or("localhost"))
        .port(port)
        .username(&user)
        .database(db.as_deref().unwrap_or("motormatch_support"));
    if let Some(password) = either("POSTGRES_PASSWORD", "PGPASSWORD") {
        options = options.password(&password);
    }
    Ok(Some(options))
}

impl Config {
    /// Reads `.env` (if present) and the process environment. Fails only on
    /// a malformed `DATABASE_URL`.
    pub fn from_env() -> Result<Self, sqlx::Error> {
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let port = non_empty_var("PORT")
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(defaults.port);
        let attachment_dir = non_empty_var("ATTACHMENT_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.attachment_dir);
        let unread_poll_seconds = non_empty_var("UNREAD_POLL_SECONDS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(defaults.unread_poll_seconds);

        Ok(Self {
            port,
            database: resolve_database(non_empty_var)?,
            attachment_dir,
            unread_poll_seconds,
        })
    }
}
