pub mod migrations;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use directories::BaseDirs;
use duckdb::{params, Connection, OptionalExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::store::{SyncStore, TokenStore};
use crate::types::{CallDirection, Call, Client, LiveLine, Message, NewClient, OAuthToken};

#[derive(Clone)]
pub struct Persistence {
    conn: Arc<Mutex<Connection>>,
}

impl Persistence {
    /// Create or open the database at the provided path and run migrations.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = expand_tilde(db_path.as_ref())?;
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir).context("creating DB directory")?;
        }
        let conn = Connection::open(&db_path).context("opening DuckDB")?;
        migrations::run(&conn).context("running migrations")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates or opens the default database at ~/.bizsync/bizsync.duckdb
    pub fn new_default() -> Result<Self> {
        let base = BaseDirs::new().context("base directories not available")?;
        let path = base.home_dir().join(".bizsync").join("bizsync.duckdb");
        Self::new(path)
    }

    /// Checkpoint the database so WAL data lands in the main file before shutdown.
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch("CHECKPOINT;")
            .context("checkpointing database")
    }

    /// Exclusive access to the shared connection.
    pub fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("database connection mutex poisoned"))
    }

    // ---------- Clients ----------

    pub fn find_client_id_by_phone(&self, phone: &str) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM clients WHERE phone = ?")?;
        let id = stmt
            .query_row(params![phone], |row| row.get::<_, i64>(0))
            .optional()?;
        Ok(id)
    }

    pub fn create_client_if_absent(&self, client: &NewClient) -> Result<i64> {
        let conn = self.conn()?;
        // The unique phone column arbitrates concurrent creators; losers read the winner's id.
        conn.execute(
            "INSERT INTO clients (name, email, phone) VALUES (?, ?, ?) ON CONFLICT (phone) DO NOTHING",
            params![client.name, client.email, client.phone],
        )
        .context("inserting client")?;
        let mut stmt = conn.prepare("SELECT id FROM clients WHERE phone = ?")?;
        let id: i64 = stmt
            .query_row(params![client.phone], |row| row.get(0))
            .context("reading client id after insert")?;
        Ok(id)
    }

    /// Insert a client entered through the dashboard (no phone uniqueness race involved).
    pub fn insert_client(
        &self,
        name: &str,
        email: &str,
        phone: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "INSERT INTO clients (name, email, phone) VALUES (?, ?, ?) RETURNING id",
        )?;
        let id: i64 = stmt.query_row(params![name, email, phone], |row| row.get(0))?;
        Ok(id)
    }

    pub fn get_client(&self, client_id: i64) -> Result<Option<Client>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, email, phone, quickbooks_id, CAST(created_at AS TEXT) FROM clients WHERE id = ?",
        )?;
        let mut rows = stmt.query(params![client_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(client_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_clients(&self) -> Result<Vec<Client>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, email, phone, quickbooks_id, CAST(created_at AS TEXT) FROM clients ORDER BY id",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(client_from_row(row)?);
        }
        Ok(out)
    }

    /// Correlate a local client with its ledger customer id.
    pub fn link_client_to_ledger(&self, client_id: i64, quickbooks_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE clients SET quickbooks_id = ? WHERE id = ?",
            params![quickbooks_id, client_id],
        )?;
        Ok(changed > 0)
    }

    pub fn count_rows(&self, table: &str) -> Result<i64> {
        let table = match table {
            "clients" | "calls" | "messages" | "live_calls" | "quickbooks_tokens" => table,
            other => anyhow::bail!("unknown table {}", other),
        };
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT COUNT(*) FROM {}", table))?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(count)
    }

    // ---------- Calls ----------

    pub fn upsert_call(&self, call: &Call) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO calls (id, client_id, direction, start_time, end_time, duration, status,
                                from_number, to_number, recording_url, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT (id) DO UPDATE SET
                client_id = EXCLUDED.client_id,
                direction = EXCLUDED.direction,
                start_time = EXCLUDED.start_time,
                end_time = EXCLUDED.end_time,
                duration = EXCLUDED.duration,
                status = EXCLUDED.status,
                from_number = EXCLUDED.from_number,
                to_number = EXCLUDED.to_number,
                recording_url = EXCLUDED.recording_url,
                updated_at = CURRENT_TIMESTAMP",
            params![
                call.id,
                call.client_id,
                call.direction.as_str(),
                call.start_time.to_rfc3339(),
                call.end_time.to_rfc3339(),
                call.duration,
                call.status,
                call.from_number,
                call.to_number,
                call.recording_url,
            ],
        )
        .with_context(|| format!("upserting call {}", call.id))?;
        Ok(())
    }

    pub fn get_call(&self, call_id: &str) -> Result<Option<Call>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, client_id, direction, start_time, end_time, duration, status,
                    from_number, to_number, recording_url
             FROM calls WHERE id = ?",
        )?;
        let mut rows = stmt.query(params![call_id])?;
        if let Some(row) = rows.next()? {
            let direction: String = row.get(2)?;
            let start_time: String = row.get(3)?;
            let end_time: String = row.get(4)?;
            Ok(Some(Call {
                id: row.get(0)?,
                client_id: row.get(1)?,
                direction: CallDirection::from_str(&direction),
                start_time: parse_rfc3339(&start_time)?,
                end_time: parse_rfc3339(&end_time)?,
                duration: row.get(5)?,
                status: row.get(6)?,
                from_number: row.get(7)?,
                to_number: row.get(8)?,
                recording_url: row.get(9)?,
            }))
        } else {
            Ok(None)
        }
    }

    pub fn list_call_ids_for_client(&self, client_id: i64) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id FROM calls WHERE client_id = ? ORDER BY start_time DESC")?;
        let mut rows = stmt.query(params![client_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row.get(0)?);
        }
        Ok(out)
    }

    // ---------- Messages ----------

    pub fn upsert_message(&self, message: &Message) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (id, client_id, direction, content, status, from_number,
                                   to_number, sent_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT (id) DO UPDATE SET
                client_id = EXCLUDED.client_id,
                direction = EXCLUDED.direction,
                content = EXCLUDED.content,
                status = EXCLUDED.status,
                from_number = EXCLUDED.from_number,
                to_number = EXCLUDED.to_number,
                sent_at = EXCLUDED.sent_at,
                updated_at = CURRENT_TIMESTAMP",
            params![
                message.id,
                message.client_id,
                message.direction.as_str(),
                message.content,
                message.status,
                message.from_number,
                message.to_number,
                message.sent_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("upserting message {}", message.id))?;
        Ok(())
    }

    pub fn get_message(&self, message_id: &str) -> Result<Option<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, client_id, direction, content, status, from_number, to_number, sent_at
             FROM messages WHERE id = ?",
        )?;
        let mut rows = stmt.query(params![message_id])?;
        if let Some(row) = rows.next()? {
            let direction: String = row.get(2)?;
            let sent_at: String = row.get(7)?;
            Ok(Some(Message {
                id: row.get(0)?,
                client_id: row.get(1)?,
                direction: CallDirection::from_str(&direction),
                content: row.get(3)?,
                status: row.get(4)?,
                from_number: row.get(5)?,
                to_number: row.get(6)?,
                sent_at: parse_rfc3339(&sent_at)?,
            }))
        } else {
            Ok(None)
        }
    }

    // ---------- Live call lines ----------

    pub fn upsert_live_line(&self, line: &LiveLine) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO live_calls (call_id, phone_number, name, details, updated_at)
             VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT (call_id) DO UPDATE SET
                phone_number = EXCLUDED.phone_number,
                name = EXCLUDED.name,
                details = EXCLUDED.details,
                updated_at = CURRENT_TIMESTAMP",
            params![
                line.call_id,
                line.phone_number,
                line.name,
                line.details.to_string(),
            ],
        )
        .with_context(|| format!("upserting line {}", line.call_id))?;
        Ok(())
    }

    pub fn list_live_lines(&self) -> Result<Vec<LiveLine>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT call_id, phone_number, name, details FROM live_calls ORDER BY call_id",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let call_id: String = row.get(0)?;
            let details: String = row.get(3)?;
            let details = serde_json::from_str(&details)
                .with_context(|| format!("invalid stored details for line {}", call_id))?;
            out.push(LiveLine {
                call_id,
                phone_number: row.get(1)?,
                name: row.get(2)?,
                details,
            });
        }
        Ok(out)
    }

    // ---------- Ledger credentials ----------

    pub fn token_get(&self, realm_id: &str) -> Result<Option<OAuthToken>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT realm_id, access_token, refresh_token, access_expires_at, refresh_expires_at, updated_at
             FROM quickbooks_tokens WHERE realm_id = ?",
        )?;
        let mut rows = stmt.query(params![realm_id])?;
        if let Some(row) = rows.next()? {
            let access_expires_at: String = row.get(3)?;
            let refresh_expires_at: String = row.get(4)?;
            let updated_at: String = row.get(5)?;
            Ok(Some(OAuthToken {
                realm_id: row.get(0)?,
                access_token: row.get(1)?,
                refresh_token: row.get(2)?,
                access_expires_at: parse_rfc3339(&access_expires_at)?,
                refresh_expires_at: parse_rfc3339(&refresh_expires_at)?,
                updated_at: parse_rfc3339(&updated_at)?,
            }))
        } else {
            Ok(None)
        }
    }

    pub fn token_upsert(&self, token: &OAuthToken) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO quickbooks_tokens (realm_id, access_token, refresh_token,
                                            access_expires_at, refresh_expires_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (realm_id) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                access_expires_at = EXCLUDED.access_expires_at,
                refresh_expires_at = EXCLUDED.refresh_expires_at,
                updated_at = EXCLUDED.updated_at",
            params![
                token.realm_id,
                token.access_token,
                token.refresh_token,
                token.access_expires_at.to_rfc3339(),
                token.refresh_expires_at.to_rfc3339(),
                token.updated_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("storing tokens for realm {}", token.realm_id))?;
        Ok(())
    }

    pub fn token_delete(&self, realm_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "DELETE FROM quickbooks_tokens WHERE realm_id = ?",
            params![realm_id],
        )?;
        Ok(changed > 0)
    }
}

impl TokenStore for Persistence {
    fn load_token(&self, realm_id: &str) -> Result<Option<OAuthToken>> {
        self.token_get(realm_id)
    }

    fn save_token(&self, token: &OAuthToken) -> Result<()> {
        self.token_upsert(token)
    }

    fn delete_token(&self, realm_id: &str) -> Result<bool> {
        self.token_delete(realm_id)
    }
}

impl SyncStore for Persistence {
    fn find_client_id_by_phone(&self, phone: &str) -> Result<Option<i64>> {
        Persistence::find_client_id_by_phone(self, phone)
    }

    fn create_client_if_absent(&self, client: &NewClient) -> Result<i64> {
        Persistence::create_client_if_absent(self, client)
    }

    fn upsert_call(&self, call: &Call) -> Result<()> {
        Persistence::upsert_call(self, call)
    }

    fn upsert_message(&self, message: &Message) -> Result<()> {
        Persistence::upsert_message(self, message)
    }

    fn upsert_live_line(&self, line: &LiveLine) -> Result<()> {
        Persistence::upsert_live_line(self, line)
    }
}

fn client_from_row(row: &duckdb::Row<'_>) -> Result<Client> {
    let created_at: String = row.get(5)?;
    Ok(Client {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        quickbooks_id: row.get(4)?,
        created_at: parse_db_timestamp(&created_at)?,
    })
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp {}", value))
}

// DuckDB renders TIMESTAMP columns cast to text as `YYYY-MM-DD HH:MM:SS[.ffffff]`.
fn parse_db_timestamp(value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .with_context(|| format!("invalid stored timestamp {}", value))
}

fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();
    if path_str == "~" {
        let base = BaseDirs::new().context("base directories not available")?;
        Ok(base.home_dir().to_path_buf())
    } else if let Some(stripped) = path_str.strip_prefix("~/") {
        let base = BaseDirs::new().context("base directories not available")?;
        Ok(base.home_dir().join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
