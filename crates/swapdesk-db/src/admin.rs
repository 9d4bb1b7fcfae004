use crate::users::delete_user_rows;
use crate::{Database, OptionalExt};
use anyhow::Result;
use rusqlite::params;
use swapdesk_types::UsageStats;
use tracing::{info, warn};

impl Database {
    // -- Master chat --

    pub fn master_chat_id(&self) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT chat_id FROM masterchat LIMIT 1", [], |row| row.get(0))
                .optional()
        })
    }

    /// First claim wins: stores `chat_id` only if no master chat exists yet.
    pub fn claim_master_chat(&self, chat_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO masterchat (chat_id)
                 SELECT ?1 WHERE NOT EXISTS (SELECT 1 FROM masterchat)",
                [chat_id],
            )?;
            if inserted > 0 {
                info!("Master chat set to {}", chat_id);
            }
            Ok(inserted > 0)
        })
    }

    // -- Blacklist --

    /// Blacklists the owner of request `request_id` by numeric id and removes
    /// the owner with everything attached. Returns the owner's handle, or
    /// `None` if the request does not exist.
    pub fn blacklist_by_request(&self, request_id: i64) -> Result<Option<String>> {
        self.with_tx(|conn| {
            let owner: Option<String> = conn
                .query_row(
                    "SELECT username FROM requests WHERE id = ?1",
                    [request_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(owner) = owner else {
                return Ok(None);
            };

            let user_id: Option<i64> = conn
                .query_row(
                    "SELECT user_id FROM users WHERE username = ?1",
                    [&owner],
                    |row| row.get(0),
                )
                .optional()?;

            match user_id {
                Some(id) if id != 0 => {
                    conn.execute(
                        "INSERT OR IGNORE INTO users_blacklist (user_id) VALUES (?1)",
                        [id],
                    )?;
                    info!("Blacklisted {} ({})", owner, id);
                }
                _ => warn!("{} has no known account id; removing without blacklisting", owner),
            }

            // Covers the request itself even if the owner was never registered.
            conn.execute(
                "DELETE FROM processing_requests WHERE request_id = ?1",
                [request_id],
            )?;
            conn.execute("DELETE FROM requests WHERE id = ?1", [request_id])?;
            delete_user_rows(conn, &owner)?;
            Ok(Some(owner))
        })
    }

    pub fn is_blacklisted(&self, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users_blacklist WHERE user_id = ?1",
                [user_id],
                |r| r.get(0),
            )?;
            Ok(count > 0)
        })
    }

    // -- Assets --

    /// Replaces the static catalog. Additional assets are left alone.
    pub fn seed_assets(&self, assets: &[String]) -> Result<()> {
        self.with_tx(|conn| {
            conn.execute("DELETE FROM assets", [])?;
            let mut stmt = conn.prepare("INSERT INTO assets (asset_name) VALUES (?1)")?;
            for asset in assets {
                stmt.execute([asset])?;
            }
            info!("Seeded {} assets", assets.len());
            Ok(())
        })
    }

    /// Static assets first, then additional ones, without duplicates.
    pub fn assets(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT asset_name FROM (
                     SELECT asset_name, 0 AS src, rowid AS pos FROM assets
                     UNION ALL
                     SELECT asset_name, 1 AS src, rowid AS pos FROM additional_assets
                 ) ORDER BY src, pos",
            )?;
            let mut assets: Vec<String> = Vec::new();
            for name in stmt.query_map([], |row| row.get::<_, String>(0))? {
                let name = name?;
                if !assets.iter().any(|a| a.eq_ignore_ascii_case(&name)) {
                    assets.push(name);
                }
            }
            Ok(assets)
        })
    }

    /// Appends to the dynamic catalog. False if the name is already known.
    pub fn add_asset(&self, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let known: i64 = conn.query_row(
                "SELECT COUNT(*) FROM (
                     SELECT asset_name FROM assets UNION ALL SELECT asset_name FROM additional_assets
                 ) WHERE asset_name = ?1 COLLATE NOCASE",
                [name],
                |r| r.get(0),
            )?;
            if known > 0 {
                return Ok(false);
            }
            conn.execute(
                "INSERT INTO additional_assets (asset_name) VALUES (?1)",
                [name],
            )?;
            Ok(true)
        })
    }

    // -- Maintenance --

    pub fn usage_stats(&self) -> Result<UsageStats> {
        self.with_conn(|conn| {
            let (users, with_notifications) = conn.query_row(
                "SELECT (SELECT COUNT(*) FROM users), (SELECT COUNT(*) FROM notifications)",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?;
            Ok(UsageStats {
                users,
                with_notifications,
            })
        })
    }

    /// Drops rows that reference unknown users or missing requests.
    pub fn purge_orphans(&self) -> Result<usize> {
        const PURGES: &[&str] = &[
            "DELETE FROM requests WHERE username NOT IN (SELECT username FROM users)",
            "DELETE FROM notifications WHERE username NOT IN (SELECT username FROM users)",
            "DELETE FROM users_votes WHERE username NOT IN (SELECT username FROM users)",
            "DELETE FROM users_votes WHERE voted_user NOT IN (SELECT username FROM users)",
            "DELETE FROM users_languages WHERE username NOT IN (SELECT username FROM users)",
            "DELETE FROM processing_requests WHERE request_id NOT IN (SELECT id FROM requests)",
        ];
        self.with_tx(|conn| {
            let mut removed = 0;
            for sql in PURGES {
                removed += conn.execute(sql, params![])?;
            }
            if removed > 0 {
                info!("Purged {} orphaned rows", removed);
            }
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use swapdesk_types::{Direction, NewTradeRequest};

    fn new_request(owner: &str) -> NewTradeRequest {
        NewTradeRequest {
            owner: owner.into(),
            direction: Direction::Sell,
            quantity: 10,
            currency: "USD".into(),
            bank: "Chase".into(),
            fee: 1.0,
            start_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2030, 1, 2).unwrap(),
        }
    }

    #[test]
    fn master_chat_first_claim_wins() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.master_chat_id().unwrap(), None);
        assert!(db.claim_master_chat(-100).unwrap());
        assert!(!db.claim_master_chat(-200).unwrap());
        assert_eq!(db.master_chat_id().unwrap(), Some(-100));
    }

    #[test]
    fn block_by_request_blacklists_and_cascades() {
        let db = Database::open_in_memory().unwrap();
        db.touch_user("spammer", 666, 9).unwrap();
        db.add_user("victim").unwrap();
        let first = db.create_request(&new_request("spammer")).unwrap();
        let second = db.create_request(&new_request("spammer")).unwrap();
        let kept = db.create_request(&new_request("victim")).unwrap();

        let blocked = db.blacklist_by_request(first).unwrap();

        assert_eq!(blocked.as_deref(), Some("spammer"));
        assert!(db.is_blacklisted(666).unwrap());
        assert!(!db.is_user_registered("spammer").unwrap());
        assert!(db.get_request(first).unwrap().is_none());
        assert!(db.get_request(second).unwrap().is_none());
        assert!(db.get_request(kept).unwrap().is_some());
    }

    #[test]
    fn block_unknown_request_is_a_no_op() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.blacklist_by_request(42).unwrap(), None);
    }

    #[test]
    fn assets_merge_static_and_additional() {
        let db = Database::open_in_memory().unwrap();
        db.seed_assets(&["USD".into(), "EUR".into()]).unwrap();
        assert!(db.add_asset("DOGE").unwrap());
        assert!(!db.add_asset("usd").unwrap());
        db.seed_assets(&["USD".into(), "RUB".into()]).unwrap();
        assert_eq!(db.assets().unwrap(), vec!["USD", "RUB", "DOGE"]);
    }

    #[test]
    fn stats_and_orphan_purge() {
        let db = Database::open_in_memory().unwrap();
        db.add_user("alice").unwrap();
        db.subscribe("alice", 1).unwrap();
        db.create_request(&new_request("ghost")).unwrap();
        db.subscribe("ghost", 2).unwrap();

        assert_eq!(db.purge_orphans().unwrap(), 2);
        let stats = db.usage_stats().unwrap();
        assert_eq!(stats.users, 1);
        assert_eq!(stats.with_notifications, 1);
        assert_eq!(db.requests_count().unwrap(), 0);
    }
}
