use crate::models::{REQUEST_COLUMNS, request_from_row};
use crate::{Database, OptionalExt};
use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{Connection, params};
use swapdesk_types::{NewTradeRequest, ProcessingLock, TradeRequest};
use tracing::{debug, info};

impl Database {
    // -- Requests --

    /// Inserts and returns the new id. The caller has already checked that
    /// the owner is registered.
    pub fn create_request(&self, req: &NewTradeRequest) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO requests (username, direction, quantity, currency, bank_name, fee, start_date, end_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    req.owner,
                    req.direction.code(),
                    req.quantity,
                    req.currency,
                    req.bank,
                    req.fee,
                    req.start_date,
                    req.end_date,
                ],
            )?;
            let id = conn.last_insert_rowid();
            info!("Request #{} created by {}", id, req.owner);
            Ok(id)
        })
    }

    pub fn get_request(&self, id: i64) -> Result<Option<TradeRequest>> {
        self.with_conn(|conn| query_request(conn, id))
    }

    pub fn requests_for(&self, owner: &str) -> Result<Vec<TradeRequest>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM requests WHERE username = ?1 ORDER BY id",
                REQUEST_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([owner], request_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn requests_count(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM requests", [], |r| r.get(0))?))
    }

    /// One page of requests, newest first.
    pub fn list_requests(&self, offset: usize, limit: usize) -> Result<Vec<TradeRequest>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM requests ORDER BY id DESC LIMIT ?1 OFFSET ?2",
                REQUEST_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![limit as i64, offset as i64], request_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Overwrites the editable fields of request `id`, but only if `owner`
    /// owns it. Returns false when nothing matched.
    pub fn update_request(&self, id: i64, owner: &str, fields: &NewTradeRequest) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE requests
                 SET direction = ?1, quantity = ?2, currency = ?3, bank_name = ?4, fee = ?5,
                     start_date = ?6, end_date = ?7
                 WHERE id = ?8 AND username = ?9",
                params![
                    fields.direction.code(),
                    fields.quantity,
                    fields.currency,
                    fields.bank,
                    fields.fee,
                    fields.start_date,
                    fields.end_date,
                    id,
                    owner,
                ],
            )?;
            Ok(updated > 0)
        })
    }

    /// Moderated removal: deletes regardless of owner.
    pub fn delete_request(&self, id: i64) -> Result<bool> {
        self.with_tx(|conn| {
            conn.execute("DELETE FROM processing_requests WHERE request_id = ?1", [id])?;
            let removed = conn.execute("DELETE FROM requests WHERE id = ?1", [id])?;
            Ok(removed > 0)
        })
    }

    pub fn delete_request_owned(&self, id: i64, owner: &str) -> Result<bool> {
        self.with_tx(|conn| {
            let removed = conn.execute(
                "DELETE FROM requests WHERE id = ?1 AND username = ?2",
                params![id, owner],
            )?;
            if removed > 0 {
                conn.execute("DELETE FROM processing_requests WHERE request_id = ?1", [id])?;
            }
            Ok(removed > 0)
        })
    }

    /// Deletes every request whose end date is strictly before `today`,
    /// together with any processing lock on it. Returns how many went.
    pub fn expire_old_requests(&self, today: NaiveDate) -> Result<usize> {
        self.with_tx(|conn| {
            let expired: Vec<i64> = {
                let mut stmt = conn.prepare("SELECT id FROM requests WHERE end_date < ?1")?;
                stmt.query_map([today], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            for id in &expired {
                conn.execute("DELETE FROM processing_requests WHERE request_id = ?1", [id])?;
                conn.execute("DELETE FROM requests WHERE id = ?1", [id])?;
            }

            debug!("Expired requests: {:?}", expired);
            Ok(expired.len())
        })
    }

    // -- Processing locks --

    /// Claims the request for a negotiation between `seller` and `buyer`.
    /// Returns false, without touching anything, if it is already claimed.
    pub fn acquire_processing_lock(&self, request_id: i64, seller: &str, buyer: &str) -> Result<bool> {
        self.with_conn(|conn| {
            if query_lock(conn, request_id)?.is_some() {
                return Ok(false);
            }
            conn.execute(
                "INSERT INTO processing_requests (request_id, seller, buyer) VALUES (?1, ?2, ?3)",
                params![request_id, seller, buyer],
            )?;
            info!("Request #{} locked: seller {} buyer {}", request_id, seller, buyer);
            Ok(true)
        })
    }

    pub fn processing_lock(&self, request_id: i64) -> Result<Option<ProcessingLock>> {
        self.with_conn(|conn| query_lock(conn, request_id))
    }

    /// Releases the lock on `request_id` only if `party` is its seller or
    /// buyer. Returns the released lock.
    pub fn release_processing_lock(&self, request_id: i64, party: &str) -> Result<Option<ProcessingLock>> {
        self.with_conn(|conn| {
            let Some(lock) = query_lock_for(conn, request_id, party)? else {
                return Ok(None);
            };
            conn.execute(
                "DELETE FROM processing_requests
                 WHERE request_id = ?1 AND (seller = ?2 OR buyer = ?2)",
                params![request_id, party],
            )?;
            info!("Request #{} unlocked by {}", request_id, party);
            Ok(Some(lock))
        })
    }

    /// Closes a finished negotiation: drops the lock and the request, but
    /// only if `party` takes part in the current lock. Returns that lock.
    pub fn complete_deal(&self, request_id: i64, party: &str) -> Result<Option<ProcessingLock>> {
        self.with_tx(|conn| {
            let Some(lock) = query_lock_for(conn, request_id, party)? else {
                return Ok(None);
            };
            conn.execute(
                "DELETE FROM processing_requests
                 WHERE request_id = ?1 AND (seller = ?2 OR buyer = ?2)",
                params![request_id, party],
            )?;
            conn.execute("DELETE FROM requests WHERE id = ?1", [request_id])?;
            info!("Request #{} completed by {}", request_id, party);
            Ok(Some(lock))
        })
    }

    /// Locks where `handle` is either party.
    pub fn locks_held_by(&self, handle: &str) -> Result<Vec<ProcessingLock>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT request_id, seller, buyer FROM processing_requests
                 WHERE seller = ?1 OR buyer = ?1 ORDER BY request_id",
            )?;
            let rows = stmt
                .query_map([handle], |row| {
                    Ok(ProcessingLock {
                        request_id: row.get(0)?,
                        seller: row.get(1)?,
                        buyer: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub(crate) fn query_request(conn: &Connection, id: i64) -> Result<Option<TradeRequest>> {
    let sql = format!("SELECT {} FROM requests WHERE id = ?1", REQUEST_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([id], request_from_row).optional()
}

fn query_lock_for(conn: &Connection, request_id: i64, party: &str) -> Result<Option<ProcessingLock>> {
    Ok(query_lock(conn, request_id)?.filter(|l| l.seller == party || l.buyer == party))
}

fn query_lock(conn: &Connection, request_id: i64) -> Result<Option<ProcessingLock>> {
    conn.query_row(
        "SELECT request_id, seller, buyer FROM processing_requests WHERE request_id = ?1",
        [request_id],
        |row| {
            Ok(ProcessingLock {
                request_id: row.get(0)?,
                seller: row.get(1)?,
                buyer: row.get(2)?,
            })
        },
    )
    .optional()
}
