use crate::models::UserRow;
use crate::{Database, OptionalExt};
use anyhow::Result;
use rusqlite::{Connection, params};
use swapdesk_types::Language;
use tracing::{debug, info};

impl Database {
    // -- Users --

    pub fn is_user_registered(&self, handle: &str) -> Result<bool> {
        self.with_conn(|conn| user_exists(conn, handle))
    }

    /// Returns false (and inserts nothing) if the handle is already registered.
    pub fn add_user(&self, handle: &str) -> Result<bool> {
        self.with_conn(|conn| insert_user(conn, handle))
    }

    pub fn get_user(&self, handle: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, handle))
    }

    /// Removes the user and everything hanging off the handle: requests (and
    /// their processing locks), locks the user takes part in, notification
    /// subscription, votes cast and received, and language preference.
    pub fn delete_user(&self, handle: &str) -> Result<bool> {
        self.with_tx(|conn| delete_user_rows(conn, handle))
    }

    /// Everything a private message does to the user record, in one step:
    /// rename reconciliation, lazy registration, chat id and numeric id.
    /// Returns true if the user was registered by this call.
    pub fn touch_user(&self, handle: &str, user_id: i64, chat_id: i64) -> Result<bool> {
        self.with_tx(|conn| {
            reconcile(conn, handle, user_id)?;
            let created = insert_user(conn, handle)?;
            conn.execute(
                "UPDATE users SET chat_id = ?1, user_id = ?2 WHERE username = ?3",
                params![chat_id, user_id, handle],
            )?;
            Ok(created)
        })
    }

    pub fn user_chat_id(&self, handle: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let chat_id = conn
                .query_row(
                    "SELECT chat_id FROM users WHERE username = ?1",
                    [handle],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()?;
            Ok(chat_id.flatten())
        })
    }

    pub fn users_count(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
    }

    // -- Language --

    /// Stored preference; the first lookup persists `default`.
    pub fn user_language(&self, handle: &str, default: Language) -> Result<Language> {
        self.with_conn(|conn| {
            let stored: Option<i64> = conn
                .query_row(
                    "SELECT language FROM users_languages WHERE username = ?1",
                    [handle],
                    |row| row.get(0),
                )
                .optional()?;

            match stored {
                Some(code) => Ok(Language::from_code(code).unwrap_or(default)),
                None => {
                    conn.execute(
                        "INSERT OR IGNORE INTO users_languages (username, language) VALUES (?1, ?2)",
                        params![handle, default.code()],
                    )?;
                    Ok(default)
                }
            }
        })
    }

    pub fn set_user_language(&self, handle: &str, language: Language) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users_languages (username, language) VALUES (?1, ?2)
                 ON CONFLICT(username) DO UPDATE SET language = excluded.language",
                params![handle, language.code()],
            )?;
            Ok(())
        })
    }

    // -- Notifications --

    pub fn is_subscribed(&self, handle: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE username = ?1",
                [handle],
                |r| r.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub fn subscribe(&self, handle: &str, chat_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (username, chat_id) VALUES (?1, ?2)
                 ON CONFLICT(username) DO UPDATE SET chat_id = excluded.chat_id",
                params![handle, chat_id],
            )?;
            Ok(())
        })
    }

    pub fn unsubscribe(&self, handle: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM notifications WHERE username = ?1", [handle])?;
            Ok(())
        })
    }

    /// `(handle, chat_id)` of every subscriber except `excluding`.
    pub fn subscribers(&self, excluding: &str) -> Result<Vec<(String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT username, chat_id FROM notifications WHERE username != ?1 ORDER BY username",
            )?;
            let subs = stmt
                .query_map([excluding], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(subs)
        })
    }

    pub fn subscribers_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM notifications", [], |r| r.get(0))?)
        })
    }
}

pub(crate) fn user_exists(conn: &Connection, handle: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE username = ?1",
        [handle],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

fn insert_user(conn: &Connection, handle: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO users (username) VALUES (?1)",
        [handle],
    )?;
    if inserted > 0 {
        info!("Registered user {}", handle);
    }
    Ok(inserted > 0)
}

fn query_user(conn: &Connection, handle: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare("SELECT username, user_id, chat_id FROM users WHERE username = ?1")?;

    let row = stmt
        .query_row([handle], |row| {
            Ok(UserRow {
                username: row.get(0)?,
                user_id: row.get(1)?,
                chat_id: row.get(2)?,
            })
        })
        .optional()?;

    Ok(row)
}

pub(crate) fn delete_user_rows(conn: &Connection, handle: &str) -> Result<bool> {
    conn.execute(
        "DELETE FROM processing_requests
         WHERE seller = ?1 OR buyer = ?1
            OR request_id IN (SELECT id FROM requests WHERE username = ?1)",
        [handle],
    )?;
    conn.execute("DELETE FROM requests WHERE username = ?1", [handle])?;
    conn.execute("DELETE FROM notifications WHERE username = ?1", [handle])?;
    conn.execute(
        "DELETE FROM users_votes WHERE username = ?1 OR voted_user = ?1",
        [handle],
    )?;
    conn.execute("DELETE FROM users_languages WHERE username = ?1", [handle])?;
    let removed = conn.execute("DELETE FROM users WHERE username = ?1", [handle])?;

    if removed > 0 {
        info!("Deleted user {}", handle);
    }
    Ok(removed > 0)
}

fn reconcile(conn: &Connection, handle: &str, user_id: i64) -> Result<()> {
    if user_id == 0 {
        return Ok(());
    }

    let previous: Option<String> = conn
        .query_row(
            "SELECT username FROM users WHERE user_id = ?1 AND username != ?2",
            params![user_id, handle],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(old) = previous {
        info!("User {} renamed to {}", old, handle);
        // A row under the new handle can only be a stale or freshly created one.
        delete_user_rows(conn, handle)?;

        const RENAMES: &[&str] = &[
            "UPDATE users SET username = ?1 WHERE username = ?2",
            "UPDATE requests SET username = ?1 WHERE username = ?2",
            "UPDATE notifications SET username = ?1 WHERE username = ?2",
            "UPDATE users_votes SET username = ?1 WHERE username = ?2",
            "UPDATE users_votes SET voted_user = ?1 WHERE voted_user = ?2",
            "UPDATE users_languages SET username = ?1 WHERE username = ?2",
            "UPDATE processing_requests SET seller = ?1 WHERE seller = ?2",
            "UPDATE processing_requests SET buyer = ?1 WHERE buyer = ?2",
        ];
        for sql in RENAMES {
            conn.execute(sql, params![handle, old])?;
        }
    }

    let updated = conn.execute(
        "UPDATE users SET user_id = ?1 WHERE username = ?2",
        params![user_id, handle],
    )?;
    debug!("Reconciled {} -> {} ({} rows)", handle, user_id, updated);
    Ok(())
}
