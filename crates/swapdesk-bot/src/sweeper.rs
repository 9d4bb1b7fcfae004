use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use swapdesk_db::Database;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Background task that deletes requests whose validity window has passed.
///
/// The first sweep runs immediately, then once per `interval`. A failed
/// sweep is logged and the loop keeps going.
pub async fn run_sweep_loop(db: Arc<Database>, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        match sweep_once(db.clone(), Local::now().date_naive()).await {
            Ok(count) => {
                if count > 0 {
                    info!("Sweep: removed {} expired requests", count);
                }
            }
            Err(e) => {
                warn!("Sweep error: {}", e);
            }
        }
    }
}

pub fn spawn_sweeper(db: Arc<Database>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(run_sweep_loop(db, interval))
}

async fn sweep_once(db: Arc<Database>, today: NaiveDate) -> anyhow::Result<usize> {
    tokio::task::spawn_blocking(move || db.expire_old_requests(today)).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;
    use swapdesk_types::{Direction, NewTradeRequest};

    fn request(end_date: NaiveDate) -> NewTradeRequest {
        NewTradeRequest {
            owner: "alice".into(),
            direction: Direction::Sell,
            quantity: 1,
            currency: "USD".into(),
            bank: "Chase".into(),
            fee: 0.0,
            start_date: end_date - Days::new(5),
            end_date,
        }
    }

    #[tokio::test]
    async fn sweep_removes_only_past_requests() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let today = Local::now().date_naive();
        let stale = db.create_request(&request(today - Days::new(1))).unwrap();
        let fresh = db.create_request(&request(today + Days::new(1))).unwrap();

        assert_eq!(sweep_once(db.clone(), today).await.unwrap(), 1);
        assert!(db.get_request(stale).unwrap().is_none());
        assert!(db.get_request(fresh).unwrap().is_some());
    }

    #[tokio::test]
    async fn spawned_sweeper_runs_first_pass_immediately() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let today = Local::now().date_naive();
        let stale = db.create_request(&request(today - Days::new(3))).unwrap();

        let handle = spawn_sweeper(db.clone(), Duration::from_secs(3600));
        for _ in 0..100 {
            if db.get_request(stale).unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert!(db.get_request(stale).unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_sweeps_do_not_stop_the_loop() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let today = Local::now().date_naive();
        let stale = db.create_request(&request(today - Days::new(2))).unwrap();
        db.with_conn(|c| Ok(c.execute_batch("ALTER TABLE requests RENAME TO requests_hidden")?))
            .unwrap();
        assert!(sweep_once(db.clone(), today).await.is_err());

        let handle = spawn_sweeper(db.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        db.with_conn(|c| Ok(c.execute_batch("ALTER TABLE requests_hidden RENAME TO requests")?))
            .unwrap();
        for _ in 0..200 {
            if db.get_request(stale).unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!handle.is_finished());
        handle.abort();
        assert!(db.get_request(stale).unwrap().is_none());
    }
}
