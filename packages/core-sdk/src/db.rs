use anyhow::{anyhow, bail, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{path::Path, thread, time::Duration};

use crate::models::{ProviderConfig, ProviderKind};

pub use rusqlite::Connection as DbConnection;

pub const DEFAULT_DB_FILE: &str = "chartpilot.db";

/**
 * \brief A saved provider profile.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct StoredProvider {
    /** \brief Row id. */
    pub id: i64,
    /** \brief Display name chosen by the user. */
    pub name: String,
    pub config: ProviderConfig,
}

impl StoredProvider {
    /**
     * \brief Key shown as `abcd…wxyz`, or `-` when absent.
     */
    pub fn masked_key(&self) -> String {
        match self.config.api_key() {
            None => "-".to_string(),
            Some(key) if key.chars().count() <= 8 => "****".to_string(),
            Some(key) => {
                let head: String = key.chars().take(4).collect();
                let tail: String = key
                    .chars()
                    .rev()
                    .take(4)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                format!("{}…{}", head, tail)
            }
        }
    }
}

/**
 * \brief Opens (or creates) the settings database at `path`.
 */
pub fn open_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief Creates the tables used by the CLI and server.
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS providers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            provider TEXT NOT NULL,
            api_key TEXT,
            model TEXT NOT NULL,
            base_url TEXT
        );

        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

fn set_bool_config(conn: &Connection, key: &str, value: bool) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, if value { "1" } else { "0" }],
        )
    })?;
    Ok(())
}

fn get_bool_config(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    let val = conn
        .query_row(
            "SELECT value FROM app_config WHERE key=?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(val.map(|s| s == "1").unwrap_or(default))
}

/**
 * \brief Saves a provider profile; blank key / base URL are stored as NULL.
 */
pub fn insert_provider(conn: &Connection, name: &str, config: &ProviderConfig) -> Result<i64> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO providers (name, provider, api_key, model, base_url) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                name,
                config.provider.as_str(),
                config.api_key(),
                config.model,
                config.base_url()
            ],
        )
    })?;
    Ok(conn.last_insert_rowid())
}

pub fn update_provider(
    conn: &Connection,
    id: i64,
    name: &str,
    config: &ProviderConfig,
) -> Result<()> {
    let rows = retry_on_locked(|| {
        conn.execute(
            "UPDATE providers SET name=?1, provider=?2, api_key=?3, model=?4, base_url=?5 WHERE id=?6",
            params![
                name,
                config.provider.as_str(),
                config.api_key(),
                config.model,
                config.base_url(),
                id
            ],
        )
    })?;
    if rows == 0 {
        bail!("provider id {} not found", id);
    }
    Ok(())
}

/**
 * \brief Removes a profile, clearing the default pointer if it referenced it.
 */
pub fn delete_provider(conn: &Connection, id: i64) -> Result<()> {
    if get_default_provider_id(conn)? == Some(id) {
        clear_default_provider(conn)?;
    }
    let rows = retry_on_locked(|| conn.execute("DELETE FROM providers WHERE id=?1", params![id]))?;
    if rows == 0 {
        bail!("provider id {} not found", id);
    }
    Ok(())
}

const PROVIDER_COLUMNS: &str = "id, name, provider, api_key, model, base_url";

fn map_provider(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, String, ProviderConfigParts)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        ProviderConfigParts {
            api_key: row.get(3)?,
            model: row.get(4)?,
            base_url: row.get(5)?,
        },
    ))
}

struct ProviderConfigParts {
    api_key: Option<String>,
    model: String,
    base_url: Option<String>,
}

fn into_stored(
    (id, name, provider, parts): (i64, String, String, ProviderConfigParts),
) -> Result<StoredProvider> {
    let kind = ProviderKind::parse(&provider)
        .ok_or_else(|| anyhow!("provider id {} has unknown kind {}", id, provider))?;
    Ok(StoredProvider {
        id,
        name,
        config: ProviderConfig {
            provider: kind,
            api_key: parts.api_key,
            model: parts.model,
            base_url: parts.base_url,
        },
    })
}

/**
 * \brief All saved profiles, oldest first.
 */
pub fn list_providers(conn: &Connection) -> Result<Vec<StoredProvider>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM providers ORDER BY id ASC",
        PROVIDER_COLUMNS
    ))?;
    let rows = stmt
        .query_map([], map_provider)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(into_stored).collect()
}

pub fn get_provider_by_id(conn: &Connection, id: i64) -> Result<Option<StoredProvider>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM providers WHERE id=?1", PROVIDER_COLUMNS),
            params![id],
            map_provider,
        )
        .optional()?;
    row.map(into_stored).transpose()
}

/**
 * \brief Marks a saved profile as the default used by `generate`/`suggest`/`serve`.
 */
pub fn set_default_provider_id(conn: &Connection, id: i64) -> Result<()> {
    if get_provider_by_id(conn, id)?.is_none() {
        bail!("provider id {} not found", id);
    }
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES ('default_provider_id', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![id.to_string()],
        )
    })?;
    Ok(())
}

fn clear_default_provider(conn: &Connection) -> Result<()> {
    retry_on_locked(|| conn.execute("DELETE FROM app_config WHERE key='default_provider_id'", []))?;
    Ok(())
}

pub fn get_default_provider_id(conn: &Connection) -> Result<Option<i64>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT value FROM app_config WHERE key='default_provider_id'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.and_then(|s| s.parse::<i64>().ok()))
}

pub fn get_default_provider(conn: &Connection) -> Result<Option<StoredProvider>> {
    match get_default_provider_id(conn)? {
        Some(id) => get_provider_by_id(conn, id),
        None => Ok(None),
    }
}

/**
 * \brief Saves a profile and makes it the default in one step.
 */
pub fn upsert_default_provider(
    conn: &Connection,
    name: &str,
    config: &ProviderConfig,
) -> Result<i64> {
    let id = insert_provider(conn, name, config)?;
    set_default_provider_id(conn, id)?;
    Ok(id)
}

pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    get_bool_config(conn, "telemetry_enabled", false)
}

pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_bool_config(conn, "telemetry_enabled", enabled)
}

/**
 * \brief Retries on SQLite busy/locked with linear backoff, six attempts in total.
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    let mut attempt = 0;
    loop {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                attempt += 1;
                thread::sleep(Duration::from_millis(200 * attempt as u64));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        migrate(&conn).expect("migrate");
        conn
    }

    fn config(provider: ProviderKind, key: Option<&str>, base: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            provider,
            api_key: key.map(str::to_string),
            model: "gpt-4o".to_string(),
            base_url: base.map(str::to_string),
        }
    }

    #[test]
    fn test_provider_crud_and_default() {
        let conn = mem_conn();
        let id1 = insert_provider(&conn, "cloud", &config(ProviderKind::OpenAi, Some("sk-1"), None))
            .expect("insert provider 1");
        let id2 = insert_provider(
            &conn,
            "local",
            &config(ProviderKind::Ollama, None, Some("http://localhost:11434")),
        )
        .expect("insert provider 2");
        let list = list_providers(&conn).expect("list providers");
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].config.provider, ProviderKind::Ollama);
        assert_eq!(list[1].config.api_key, None);

        set_default_provider_id(&conn, id2).expect("set default");
        let def = get_default_provider(&conn).expect("get default").expect("some");
        assert_eq!(def.id, id2);

        update_provider(
            &conn,
            id1,
            "cloud-2",
            &config(ProviderKind::Anthropic, Some("sk-ant"), None),
        )
        .expect("update provider");
        let one = get_provider_by_id(&conn, id1).expect("get by id").expect("some");
        assert_eq!(one.name, "cloud-2");
        assert_eq!(one.config.provider, ProviderKind::Anthropic);
    }

    #[test]
    fn test_blank_fields_stored_as_null() {
        let conn = mem_conn();
        let id = insert_provider(
            &conn,
            "blank",
            &config(ProviderKind::OpenAiCompatible, Some("  "), Some("http://localhost:1234/v1")),
        )
        .expect("insert");
        let p = get_provider_by_id(&conn, id).expect("get").expect("some");
        assert_eq!(p.config.api_key, None);
        assert_eq!(p.config.base_url.as_deref(), Some("http://localhost:1234/v1"));
    }

    #[test]
    fn test_delete_default_clears_pointer() {
        let conn = mem_conn();
        let id = upsert_default_provider(&conn, "p", &config(ProviderKind::Google, Some("k"), None))
            .expect("upsert");
        assert_eq!(get_default_provider_id(&conn).expect("id"), Some(id));
        delete_provider(&conn, id).expect("delete");
        assert_eq!(get_default_provider_id(&conn).expect("id"), None);
        assert!(get_default_provider(&conn).expect("default").is_none());
        assert!(delete_provider(&conn, id).is_err());
    }

    #[test]
    fn test_set_default_unknown_id_fails() {
        let conn = mem_conn();
        assert!(set_default_provider_id(&conn, 42).is_err());
    }

    #[test]
    fn test_telemetry_flag_roundtrip() {
        let conn = mem_conn();
        assert!(!get_telemetry_enabled(&conn).expect("get"));
        set_telemetry_enabled(&conn, true).expect("set");
        assert!(get_telemetry_enabled(&conn).expect("get"));
    }

    #[test]
    fn test_masked_key() {
        let p = StoredProvider {
            id: 1,
            name: "p".into(),
            config: config(ProviderKind::OpenAi, Some("sk-abcdefghijkl"), None),
        };
        assert_eq!(p.masked_key(), "sk-a…ijkl");
        let short = StoredProvider {
            config: config(ProviderKind::OpenAi, Some("short"), None),
            ..p.clone()
        };
        assert_eq!(short.masked_key(), "****");
        let none = StoredProvider {
            config: config(ProviderKind::Ollama, None, None),
            ..p
        };
        assert_eq!(none.masked_key(), "-");
    }

    #[test]
    fn test_open_db_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.db");
        let conn = open_db(&path).expect("open");
        migrate(&conn).expect("migrate");
        insert_provider(&conn, "p", &config(ProviderKind::OpenAi, Some("sk"), None)).expect("insert");
        drop(conn);
        let again = open_db(&path).expect("reopen");
        assert_eq!(list_providers(&again).expect("list").len(), 1);
    }
}
