//! SQLite-based mail storage with zstd-compressed message bodies

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{ApplyOutcome, MailStore};
use crate::models::{Account, EmailAddress, EmailLabel, Message, MessageId, Thread, ThreadId};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Mirrored mailboxes and their feed cursors
            CREATE TABLE accounts (
                user_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                access_token TEXT NOT NULL,
                updated_cursor TEXT,
                deleted_cursor TEXT,
                days_within INTEGER NOT NULL DEFAULT 30,
                created_at TEXT NOT NULL
            );

            -- Every address ever seen, unique by email
            CREATE TABLE email_addresses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE CHECK (email <> ''),
                name TEXT
            );

            CREATE TABLE threads (
                id TEXT PRIMARY KEY,
                subject TEXT NOT NULL,
                last_message_date TEXT NOT NULL,
                brief TEXT NOT NULL,
                inbox_status INTEGER NOT NULL DEFAULT 0,
                draft_status INTEGER NOT NULL DEFAULT 0,
                sent_status INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_threads_last_message_date
                ON threads(last_message_date DESC);

            CREATE TABLE messages (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL REFERENCES threads(id),
                from_address_id INTEGER NOT NULL REFERENCES email_addresses(id),
                subject TEXT NOT NULL,
                created_time TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                received_at TEXT NOT NULL,
                last_modified_time TEXT NOT NULL,
                email_label TEXT NOT NULL,
                body_snippet TEXT,
                body BLOB,  -- zstd compressed
                in_reply_to TEXT,
                internet_message_id TEXT
            );

            CREATE INDEX idx_messages_thread ON messages(thread_id, received_at);

            -- Provider system labels, in provider order
            CREATE TABLE message_labels (
                message_id TEXT NOT NULL,
                label TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (message_id, label),
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
            );

            -- to/cc/bcc/reply-to (message <-> address)
            CREATE TABLE message_recipients (
                message_id TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('to', 'cc', 'bcc', 'reply_to')),
                position INTEGER NOT NULL,
                address_id INTEGER NOT NULL REFERENCES email_addresses(id),
                PRIMARY KEY (message_id, kind, position),
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
            );

            -- Access edges: which addresses can see which threads
            CREATE TABLE thread_access (
                thread_id TEXT NOT NULL REFERENCES threads(id),
                address_id INTEGER NOT NULL REFERENCES email_addresses(id),
                PRIMARY KEY (thread_id, address_id)
            );

            CREATE INDEX idx_thread_access_address ON thread_access(address_id);
            "#,
        ),
    ])
}

/// Attempts at bringing a freshly opened file to the latest schema
const MIGRATION_ATTEMPTS: u32 = 10;

/// Run `migrations` on a file other processes may be opening at the same time.
///
/// Two openers can both read an old `user_version`; the loser's transaction
/// fails (table exists, or a busy snapshot) and rolls back. Once the winner
/// commits, the retry finds the schema current and does nothing.
pub(crate) fn run_migrations(conn: &mut Connection, migrations: &Migrations<'_>) -> Result<()> {
    let mut attempt = 1;
    loop {
        match migrations.to_latest(conn) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < MIGRATION_ATTEMPTS => {
                warn!(
                    "[STORE] Migration attempt {}/{} failed, retrying: {}",
                    attempt, MIGRATION_ATTEMPTS, e
                );
                std::thread::sleep(Duration::from_millis(20 * u64::from(attempt)));
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

const RECIPIENT_KINDS: [&str; 4] = ["to", "cc", "bcc", "reply_to"];

const THREAD_COLUMNS: &str = "t.id, t.subject, t.last_message_date, t.brief,
     t.inbox_status, t.draft_status, t.sent_status";

const MESSAGE_COLUMNS: &str = "m.id, m.thread_id, a.email, a.name, m.subject,
     m.created_time, m.sent_at, m.received_at, m.last_modified_time,
     m.email_label, m.body_snippet, m.body, m.in_reply_to, m.internet_message_id";

/// SQLite-based mail storage
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let mut conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {:?}", db_path))?;

        // WAL lets readers (status surface, CLI) run during a sync cycle.
        // foreign_keys is required for ON DELETE CASCADE.
        conn.execute_batch(
            r#"
            PRAGMA busy_timeout = 5000;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        run_migrations(&mut conn, &migrations()).context("Failed to run database migrations")?;

        debug!("[STORE] Opened mail database at {:?}", db_path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("mail database mutex poisoned"))
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    // Fixed-width UTC so lexical order matches chronological order; full
    // precision so a stored date compares equal to the one it came from
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn column_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: ThreadId::new(row.get::<_, String>(0)?),
        subject: row.get(1)?,
        last_message_date: column_timestamp(row, 2)?,
        brief: row.get(3)?,
        inbox_status: row.get(4)?,
        draft_status: row.get(5)?,
        sent_status: row.get(6)?,
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        user_id: row.get(0)?,
        account_id: row.get(1)?,
        access_token: row.get(2)?,
        updated_cursor: row.get(3)?,
        deleted_cursor: row.get(4)?,
        days_within: row.get(5)?,
        created_at: column_timestamp(row, 6)?,
    })
}

/// Message columns before recipients, labels and body are attached
struct MessageRow {
    message: Message,
    body: Option<Vec<u8>>,
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let label: String = row.get(9)?;
    let email_label = label
        .parse::<EmailLabel>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, e.into()))?;

    let message = Message {
        id: MessageId::new(row.get::<_, String>(0)?),
        thread_id: ThreadId::new(row.get::<_, String>(1)?),
        from: EmailAddress {
            email: row.get(2)?,
            name: row.get(3)?,
        },
        subject: row.get(4)?,
        created_time: column_timestamp(row, 5)?,
        sent_at: column_timestamp(row, 6)?,
        received_at: column_timestamp(row, 7)?,
        last_modified_time: column_timestamp(row, 8)?,
        email_label,
        body_snippet: row.get(10)?,
        body: None,
        in_reply_to: row.get(12)?,
        internet_message_id: row.get(13)?,
        labels: Vec::new(),
        to: Vec::new(),
        cc: Vec::new(),
        bcc: Vec::new(),
        reply_to: Vec::new(),
    };

    Ok(MessageRow {
        message,
        body: row.get(11)?,
    })
}

/// Attach recipients, labels and the decompressed body
fn hydrate(conn: &Connection, row: MessageRow) -> Result<Message> {
    let MessageRow { mut message, body } = row;
    let id = message.id.as_str().to_string();

    let mut stmt = conn.prepare_cached(
        "SELECT r.kind, a.email, a.name FROM message_recipients r
         JOIN email_addresses a ON a.id = r.address_id
         WHERE r.message_id = ?
         ORDER BY r.kind, r.position",
    )?;
    let recipients = stmt
        .query_map([&id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                EmailAddress {
                    email: row.get(1)?,
                    name: row.get(2)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (kind, address) in recipients {
        match kind.as_str() {
            "to" => message.to.push(address),
            "cc" => message.cc.push(address),
            "bcc" => message.bcc.push(address),
            "reply_to" => message.reply_to.push(address),
            other => bail!("unknown recipient kind {:?} on message {}", other, id),
        }
    }

    let mut stmt = conn.prepare_cached(
        "SELECT label FROM message_labels WHERE message_id = ? ORDER BY position",
    )?;
    message.labels = stmt
        .query_map([&id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    message.body = body
        .map(|data| {
            zstd::decode_all(data.as_slice())
                .context("Failed to decompress message body")
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        })
        .transpose()?;

    Ok(message)
}

/// Insert the address or refresh its name, returning the row id
fn resolve_address(conn: &Connection, address: &EmailAddress) -> Result<i64> {
    let id = conn
        .prepare_cached(
            "INSERT INTO email_addresses (email, name) VALUES (?, ?)
             ON CONFLICT(email) DO UPDATE SET
                name = COALESCE(excluded.name, email_addresses.name)
             RETURNING id",
        )?
        .query_row(params![address.email, address.name], |row| row.get(0))
        .with_context(|| format!("Failed to resolve address {:?}", address.email))?;
    Ok(id)
}

fn load_thread(conn: &Connection, id: &ThreadId) -> Result<Option<Thread>> {
    let thread = conn
        .query_row(
            &format!("SELECT {} FROM threads t WHERE t.id = ?", THREAD_COLUMNS),
            [id.as_str()],
            thread_from_row,
        )
        .optional()?;
    Ok(thread)
}

fn save_thread(conn: &Connection, thread: &Thread) -> Result<()> {
    // ON CONFLICT DO UPDATE rather than INSERT OR REPLACE, which would
    // delete the old row first
    conn.execute(
        "INSERT INTO threads
         (id, subject, last_message_date, brief, inbox_status, draft_status, sent_status)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            subject = excluded.subject,
            last_message_date = excluded.last_message_date,
            brief = excluded.brief,
            inbox_status = excluded.inbox_status,
            draft_status = excluded.draft_status,
            sent_status = excluded.sent_status",
        params![
            thread.id.as_str(),
            thread.subject,
            timestamp(&thread.last_message_date),
            thread.brief,
            thread.inbox_status,
            thread.draft_status,
            thread.sent_status,
        ],
    )?;
    Ok(())
}

impl MailStore for SqliteMailStore {
    fn upsert_account(&self, account: &Account) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts
             (user_id, account_id, access_token, updated_cursor, deleted_cursor, days_within, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                account_id = excluded.account_id,
                access_token = excluded.access_token,
                updated_cursor = excluded.updated_cursor,
                deleted_cursor = excluded.deleted_cursor,
                days_within = excluded.days_within",
            params![
                account.user_id,
                account.account_id,
                account.access_token,
                account.updated_cursor,
                account.deleted_cursor,
                account.days_within,
                timestamp(&account.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_account(&self, user_id: &str) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let account = conn
            .query_row(
                "SELECT user_id, account_id, access_token, updated_cursor, deleted_cursor,
                        days_within, created_at
                 FROM accounts WHERE user_id = ?",
                [user_id],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, account_id, access_token, updated_cursor, deleted_cursor,
                    days_within, created_at
             FROM accounts ORDER BY user_id",
        )?;
        let accounts = stmt
            .query_map([], account_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    fn save_cursors(
        &self,
        user_id: &str,
        updated_cursor: Option<&str>,
        deleted_cursor: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE accounts SET updated_cursor = ?, deleted_cursor = ? WHERE user_id = ?",
            params![updated_cursor, deleted_cursor, user_id],
        )?;
        if changed == 0 {
            bail!("no account registered for {}", user_id);
        }
        Ok(())
    }

    fn apply_message(&self, message: &Message) -> Result<ApplyOutcome> {
        let body = message
            .body
            .as_ref()
            .map(|text| zstd::encode_all(text.as_bytes(), 3))
            .transpose()
            .context("Failed to compress message body")?;

        let mut conn = self.conn()?;
        // Dropped without commit on any error, discarding the partial writes
        let tx = conn.transaction()?;
        let mut outcome = ApplyOutcome::default();

        let from_id = resolve_address(&tx, &message.from)?;
        let mut members = BTreeSet::from([from_id]);
        let mut recipients = Vec::new();
        for (kind, list) in RECIPIENT_KINDS
            .iter()
            .zip([&message.to, &message.cc, &message.bcc, &message.reply_to])
        {
            for (position, address) in list.iter().enumerate() {
                let id = resolve_address(&tx, address)?;
                members.insert(id);
                recipients.push((*kind, position as i64, id));
            }
        }

        match load_thread(&tx, &message.thread_id)? {
            None => {
                save_thread(&tx, &Thread::from_message(message))?;
                outcome.thread_created = true;
            }
            Some(mut thread) => {
                if thread.absorb(message) {
                    save_thread(&tx, &thread)?;
                    outcome.thread_updated = true;
                }
            }
        }

        let exists = tx
            .query_row(
                "SELECT 1 FROM messages WHERE id = ?",
                [message.id.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        if !exists {
            tx.execute(
                "INSERT INTO messages
                 (id, thread_id, from_address_id, subject, created_time, sent_at, received_at,
                  last_modified_time, email_label, body_snippet, body, in_reply_to,
                  internet_message_id)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    message.id.as_str(),
                    message.thread_id.as_str(),
                    from_id,
                    message.subject,
                    timestamp(&message.created_time),
                    timestamp(&message.sent_at),
                    timestamp(&message.received_at),
                    timestamp(&message.last_modified_time),
                    message.email_label.as_str(),
                    message.body_snippet,
                    body,
                    message.in_reply_to,
                    message.internet_message_id,
                ],
            )?;

            let mut stmt = tx.prepare_cached(
                "INSERT INTO message_recipients (message_id, kind, position, address_id)
                 VALUES (?, ?, ?, ?)",
            )?;
            for (kind, position, address_id) in &recipients {
                stmt.execute(params![message.id.as_str(), kind, position, address_id])?;
            }

            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO message_labels (message_id, label, position)
                 VALUES (?, ?, ?)",
            )?;
            for (position, label) in message.labels.iter().enumerate() {
                stmt.execute(params![message.id.as_str(), label, position as i64])?;
            }

            outcome.message_created = true;
        }

        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO thread_access (thread_id, address_id) VALUES (?, ?)",
            )?;
            for address_id in members {
                outcome.members_added +=
                    stmt.execute(params![message.thread_id.as_str(), address_id])?;
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn delete_messages(&self, ids: &[MessageId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM messages WHERE id = ?")?;
            for id in ids {
                deleted += stmt.execute([id.as_str()])?;
            }
        }
        tx.commit()?;

        debug!("[STORE] Deleted {} of {} messages", deleted, ids.len());
        Ok(deleted)
    }

    fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>> {
        let conn = self.conn()?;
        load_thread(&conn, id)
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM messages m
                     JOIN email_addresses a ON a.id = m.from_address_id
                     WHERE m.id = ?",
                    MESSAGE_COLUMNS
                ),
                [id.as_str()],
                message_from_row,
            )
            .optional()?;

        row.map(|row| hydrate(&conn, row)).transpose()
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE id = ?",
            [id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn get_address(&self, email: &str) -> Result<Option<EmailAddress>> {
        let conn = self.conn()?;
        let address = conn
            .query_row(
                "SELECT email, name FROM email_addresses WHERE email = ?",
                [email.trim().to_lowercase()],
                |row| {
                    Ok(EmailAddress {
                        email: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(address)
    }

    fn thread_members(&self, thread_id: &ThreadId) -> Result<Vec<EmailAddress>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT a.email, a.name FROM thread_access ta
             JOIN email_addresses a ON a.id = ta.address_id
             WHERE ta.thread_id = ?
             ORDER BY a.email",
        )?;
        let members = stmt
            .query_map([thread_id.as_str()], |row| {
                Ok(EmailAddress {
                    email: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }

    fn list_threads_for_address(
        &self,
        email: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Thread>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM threads t
             JOIN thread_access ta ON ta.thread_id = t.id
             JOIN email_addresses a ON a.id = ta.address_id
             WHERE a.email = ?
             ORDER BY t.last_message_date DESC, t.id
             LIMIT ? OFFSET ?",
            THREAD_COLUMNS
        ))?;
        let threads = stmt
            .query_map(
                params![email.trim().to_lowercase(), limit as i64, offset as i64],
                thread_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(threads)
    }

    fn list_messages_for_thread(&self, thread_id: &ThreadId) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let rows = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages m
                 JOIN email_addresses a ON a.id = m.from_address_id
                 WHERE m.thread_id = ?
                 ORDER BY m.received_at ASC, m.id",
                MESSAGE_COLUMNS
            ))?;
            stmt.query_map([thread_id.as_str()], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?
        };

        rows.into_iter().map(|row| hydrate(&conn, row)).collect()
    }

    fn count_messages(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn count_threads(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM threads", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn count_addresses(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM email_addresses", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn create_test_store() -> (SqliteMailStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        // Use .test.sqlite extension to clearly distinguish from production databases
        let db_path = dir.path().join("mirror.test.sqlite");
        let store = SqliteMailStore::new(&db_path).unwrap();
        (store, dir)
    }

    fn make_test_message(id: &str, thread_id: &str, from: &str, to: &[&str]) -> Message {
        Message::builder(MessageId::new(id), ThreadId::new(thread_id))
            .from(EmailAddress::new(from))
            .to(to.iter().map(|a| EmailAddress::new(*a)).collect())
            .subject(format!("Subject {}", id))
            .body(Some(format!("Body of {}", id)))
            .labels(vec!["inbox".to_string(), "unread".to_string()])
            .received_at(Utc::now())
            .build()
    }

    #[test]
    fn test_account_roundtrip_and_cursors() {
        let (store, _dir) = create_test_store();

        let account = Account::new("user@example.com", "acc-1", "token").with_days_within(14);
        store.upsert_account(&account).unwrap();

        let loaded = store.get_account("user@example.com").unwrap().unwrap();
        assert_eq!(loaded.account_id, "acc-1");
        assert_eq!(loaded.days_within, 14);
        assert!(loaded.needs_initialization());

        store
            .save_cursors("user@example.com", Some("A"), Some("D"))
            .unwrap();
        let loaded = store.get_account("user@example.com").unwrap().unwrap();
        assert_eq!(loaded.updated_cursor.as_deref(), Some("A"));
        assert_eq!(loaded.deleted_cursor.as_deref(), Some("D"));

        assert!(store.save_cursors("nobody", Some("A"), None).is_err());
        assert_eq!(store.list_accounts().unwrap().len(), 1);
    }

    #[test]
    fn test_apply_builds_graph() {
        let (store, _dir) = create_test_store();

        let message = make_test_message("m1", "t1", "alice@example.com", &["bob@example.com"]);
        let outcome = store.apply_message(&message).unwrap();
        assert!(outcome.message_created);
        assert!(outcome.thread_created);
        assert_eq!(outcome.members_added, 2);

        let loaded = store.get_message(&MessageId::new("m1")).unwrap().unwrap();
        assert_eq!(loaded, message_with_stored_precision(&message));

        let members: Vec<String> = store
            .thread_members(&ThreadId::new("t1"))
            .unwrap()
            .into_iter()
            .map(|a| a.email)
            .collect();
        assert_eq!(members, vec!["alice@example.com", "bob@example.com"]);
    }

    /// Timestamps are persisted with microsecond precision
    fn message_with_stored_precision(message: &Message) -> Message {
        let trim = |at: DateTime<Utc>| parse_timestamp(0, &timestamp(&at)).unwrap();
        Message {
            created_time: trim(message.created_time),
            sent_at: trim(message.sent_at),
            received_at: trim(message.received_at),
            last_modified_time: trim(message.last_modified_time),
            ..message.clone()
        }
    }

    #[test]
    fn test_handles_opened_concurrently_share_schema() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("mirror.test.sqlite");
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(6));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let db_path = db_path.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let store = SqliteMailStore::new(&db_path).unwrap();
                    store
                        .upsert_account(&Account::new(format!("user-{}", i), "acc", "tok"))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = SqliteMailStore::new(&db_path).unwrap();
        assert_eq!(store.list_accounts().unwrap().len(), 6);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let (store, _dir) = create_test_store();
        let message = make_test_message("m1", "t1", "alice@example.com", &["bob@example.com"]);

        store.apply_message(&message).unwrap();
        let second = store.apply_message(&message).unwrap();

        assert_eq!(second, ApplyOutcome::default());
        assert_eq!(store.count_messages().unwrap(), 1);
        assert_eq!(store.count_threads().unwrap(), 1);
        assert_eq!(store.count_addresses().unwrap(), 2);
    }

    #[test]
    fn test_name_is_refreshed_but_never_cleared() {
        let (store, _dir) = create_test_store();

        let mut first = make_test_message("m1", "t1", "alice@example.com", &[]);
        first.from = EmailAddress::with_name("Alice", "alice@example.com");
        store.apply_message(&first).unwrap();

        let second = make_test_message("m2", "t1", "alice@example.com", &[]);
        store.apply_message(&second).unwrap();
        assert_eq!(
            store.get_address("Alice@Example.com").unwrap().unwrap().name.as_deref(),
            Some("Alice")
        );

        let mut third = make_test_message("m3", "t1", "alice@example.com", &[]);
        third.from = EmailAddress::with_name("Alice Liddell", "alice@example.com");
        store.apply_message(&third).unwrap();
        assert_eq!(
            store.get_address("alice@example.com").unwrap().unwrap().name.as_deref(),
            Some("Alice Liddell")
        );
    }

    #[test]
    fn test_failed_apply_leaves_no_partial_writes() {
        let (store, _dir) = create_test_store();

        // empty recipient violates the address CHECK after the sender was written
        let mut message = make_test_message("m1", "t1", "alice@example.com", &[]);
        message.cc = vec![EmailAddress::new("")];

        assert!(store.apply_message(&message).is_err());
        assert_eq!(store.count_addresses().unwrap(), 0);
        assert_eq!(store.count_threads().unwrap(), 0);
        assert_eq!(store.count_messages().unwrap(), 0);

        // the store is still usable afterwards
        let ok = make_test_message("m2", "t1", "alice@example.com", &[]);
        assert!(store.apply_message(&ok).unwrap().message_created);
    }

    #[test]
    fn test_delete_messages_keeps_thread_and_access() {
        let (store, _dir) = create_test_store();
        store
            .apply_message(&make_test_message("m1", "t1", "alice@example.com", &["bob@example.com"]))
            .unwrap();
        store
            .apply_message(&make_test_message("m2", "t1", "carol@example.com", &[]))
            .unwrap();

        let ids = vec![MessageId::new("m1"), MessageId::new("m2")];
        assert_eq!(store.delete_messages(&ids).unwrap(), 2);
        assert_eq!(store.delete_messages(&ids).unwrap(), 0);
        assert_eq!(store.delete_messages(&[]).unwrap(), 0);

        assert_eq!(store.count_messages().unwrap(), 0);
        assert!(store.get_thread(&ThreadId::new("t1")).unwrap().is_some());
        assert_eq!(store.thread_members(&ThreadId::new("t1")).unwrap().len(), 3);
    }

    #[test]
    fn test_list_threads_for_address_newest_first() {
        let (store, _dir) = create_test_store();
        let now = Utc::now();

        for (i, offset) in [3, 1, 2].into_iter().enumerate() {
            let mut message = make_test_message(
                &format!("m{}", i),
                &format!("t{}", i),
                "alice@example.com",
                &["bob@example.com"],
            );
            message.received_at = now - Duration::hours(offset);
            store.apply_message(&message).unwrap();
        }
        store
            .apply_message(&make_test_message("mx", "tx", "carol@example.com", &[]))
            .unwrap();

        let threads = store.list_threads_for_address("bob@example.com", 10, 0).unwrap();
        let ids: Vec<&str> = threads.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t0"]);

        let page = store.list_threads_for_address("bob@example.com", 1, 1).unwrap();
        assert_eq!(page[0].id.as_str(), "t2");

        assert!(store.list_threads_for_address("nobody@example.com", 10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_list_messages_for_thread_ordered() {
        let (store, _dir) = create_test_store();
        let now = Utc::now();

        let mut late = make_test_message("late", "t1", "alice@example.com", &[]);
        late.received_at = now;
        let mut early = make_test_message("early", "t1", "bob@example.com", &["alice@example.com"]);
        early.received_at = now - Duration::minutes(5);

        store.apply_message(&late).unwrap();
        store.apply_message(&early).unwrap();

        let messages = store.list_messages_for_thread(&ThreadId::new("t1")).unwrap();
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert_eq!(messages[0].to, vec![EmailAddress::new("alice@example.com")]);
        assert_eq!(messages[0].body.as_deref(), Some("Body of early"));

        // older message did not regress the thread
        let thread = store.get_thread(&ThreadId::new("t1")).unwrap().unwrap();
        assert_eq!(thread.subject, "Subject late");
    }
}
