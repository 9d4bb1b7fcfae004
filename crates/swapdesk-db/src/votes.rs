use crate::Database;
use crate::users::user_exists;
use anyhow::Result;
use rusqlite::{Connection, params};
use swapdesk_types::EscrowEntry;
use tracing::info;

/// How many trusted users a single voter may back at once.
pub const MAX_VOTES: i64 = 5;

impl Database {
    /// Records `voter -> trusted`. Returns false without inserting if the voter
    /// is not registered, votes for themselves, has already voted for
    /// `trusted`, or has used up `MAX_VOTES`.
    pub fn vote(&self, voter: &str, trusted: &str) -> Result<bool> {
        self.with_conn(|conn| {
            if voter == trusted
                || !user_exists(conn, voter)?
                || already_voted(conn, voter, trusted)?
                || cast_count(conn, voter)? >= MAX_VOTES
            {
                return Ok(false);
            }
            conn.execute(
                "INSERT INTO users_votes (username, voted_user) VALUES (?1, ?2)",
                params![voter, trusted],
            )?;
            info!("{} voted for {}", voter, trusted);
            Ok(true)
        })
    }

    pub fn unvote(&self, voter: &str, trusted: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM users_votes WHERE username = ?1 AND voted_user = ?2",
                params![voter, trusted],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn has_voted(&self, voter: &str, trusted: &str) -> Result<bool> {
        self.with_conn(|conn| already_voted(conn, voter, trusted))
    }

    pub fn votes_cast_count(&self, voter: &str) -> Result<i64> {
        self.with_conn(|conn| cast_count(conn, voter))
    }

    pub fn voted_users(&self, voter: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT voted_user FROM users_votes WHERE username = ?1 ORDER BY voted_user",
            )?;
            let users = stmt
                .query_map([voter], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(users)
        })
    }

    /// Trusted users by vote count, most votes first, ties by handle.
    pub fn escrow_ranking(&self) -> Result<Vec<EscrowEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT voted_user, COUNT(*) AS votes FROM users_votes
                 GROUP BY voted_user
                 ORDER BY votes DESC, voted_user ASC",
            )?;
            let entries = stmt
                .query_map([], |row| {
                    Ok(EscrowEntry {
                        handle: row.get(0)?,
                        votes: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(entries)
        })
    }
}

fn already_voted(conn: &Connection, voter: &str, trusted: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users_votes WHERE username = ?1 AND voted_user = ?2",
        params![voter, trusted],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

fn cast_count(conn: &Connection, voter: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM users_votes WHERE username = ?1",
        [voter],
        |r| r.get(0),
    )?)
}
