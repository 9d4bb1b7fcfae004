/// Integration test: drive the bot through the dispatcher the way a chat
/// network would, and check what lands in the store.
///
/// Two users trade through one request, a third is locked out while the
/// negotiation is active, and an admin cleans up afterwards.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use swapdesk_bot::{Dispatcher, Localizer, MemoryTransport, SessionCache};
use swapdesk_db::Database;
use swapdesk_types::{ChatKind, Direction, InboundEvent, Language, Payload};

const MASTER: i64 = -1001;

fn setup() -> Dispatcher<MemoryTransport> {
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.seed_assets(&["USD".into(), "EUR".into(), "RUB".into()]).unwrap();
    Dispatcher::new(
        db,
        MemoryTransport::new(),
        Localizer::new(Language::En),
        SessionCache::new(64, Duration::from_secs(3600)),
    )
}

fn direct(handle: &str, chat_id: i64, payload: Payload) -> InboundEvent {
    InboundEvent {
        chat_id,
        chat_kind: ChatKind::Direct,
        sender_handle: Some(handle.into()),
        sender_id: chat_id + 1000,
        payload,
    }
}

async fn say(d: &Dispatcher<MemoryTransport>, handle: &str, chat_id: i64, text: &str) {
    d.dispatch(direct(handle, chat_id, Payload::Text(text.into()))).await;
}

async fn press(d: &Dispatcher<MemoryTransport>, handle: &str, chat_id: i64, data: &str) {
    d.dispatch(direct(handle, chat_id, Payload::Callback(data.into()))).await;
}

async fn publish_sell_request(d: &Dispatcher<MemoryTransport>, handle: &str, chat_id: i64) -> i64 {
    say(d, handle, chat_id, "/start").await;
    press(d, handle, chat_id, "menu:new").await;
    press(d, handle, chat_id, "dir:sell").await;
    say(d, handle, chat_id, "100").await;
    press(d, handle, chat_id, "USD").await;
    say(d, handle, chat_id, "Chase").await;
    say(d, handle, chat_id, "0").await;
    say(d, handle, chat_id, "01.01.2030-01.02.2030").await;
    press(d, handle, chat_id, "confirm:yes").await;

    let mine = d.database().requests_for(handle).unwrap();
    mine.last().unwrap().id
}

#[tokio::test]
async fn sell_request_round_trip() {
    let d = setup();
    let id = publish_sell_request(&d, "alice", 1).await;

    let all = d.database().list_requests(0, 10).unwrap();
    assert_eq!(all.len(), 1);
    let req = &all[0];
    assert_eq!(req.id, id);
    assert_eq!(req.owner, "alice");
    assert_eq!(req.direction, Direction::Sell);
    assert_eq!(req.quantity, 100);
    assert_eq!(req.currency, "USD");
    assert_eq!(req.bank, "Chase");
    assert_eq!(req.fee, 0.0);
    assert_eq!(req.start_date, NaiveDate::from_ymd_opt(2030, 1, 1).unwrap());
    assert_eq!(req.end_date, NaiveDate::from_ymd_opt(2030, 2, 1).unwrap());

    let replies = d.transport().sent_to(1);
    assert!(replies.iter().any(|m| m.text == format!("Request #{} published.", id)));
}

#[tokio::test]
async fn negotiation_is_exclusive_until_released() {
    let d = setup();
    let id = publish_sell_request(&d, "alice", 1).await;
    d.transport().take();

    press(&d, "bob", 2, "menu:browse").await;
    press(&d, "bob", 2, &format!("req:{}", id)).await;
    press(&d, "carol", 3, "menu:browse").await;
    press(&d, "carol", 3, &format!("req:{}", id)).await;

    let lock = d.database().processing_lock(id).unwrap().unwrap();
    assert_eq!(lock.seller, "alice");
    assert_eq!(lock.buyer, "bob");
    assert!(
        d.transport()
            .sent_to(3)
            .iter()
            .any(|m| m.text.contains("already being handled"))
    );
    assert!(d.transport().sent_to(1).iter().any(|m| m.text.contains("@bob took your request")));

    press(&d, "alice", 1, &format!("deal:cancel:{}", id)).await;
    press(&d, "carol", 3, &format!("req:{}", id)).await;
    assert_eq!(d.database().processing_lock(id).unwrap().unwrap().buyer, "carol");

    press(&d, "carol", 3, &format!("deal:done:{}", id)).await;
    assert!(d.database().get_request(id).unwrap().is_none());
    assert!(d.database().processing_lock(id).unwrap().is_none());
}

#[tokio::test]
async fn concurrent_takers_get_exactly_one_lock() {
    let d = setup();
    let id = publish_sell_request(&d, "alice", 1).await;

    let takers: Vec<_> = (0..10)
        .map(|i| {
            let d = d.clone();
            let handle = format!("taker{}", i);
            tokio::spawn(async move {
                press(&d, &handle, 100 + i, &format!("req:{}", id)).await;
            })
        })
        .collect();
    for t in takers {
        t.await.unwrap();
    }

    let lock = d.database().processing_lock(id).unwrap().unwrap();
    assert!(lock.buyer.starts_with("taker"));
    let unavailable = (0..10)
        .flat_map(|i| d.transport().sent_to(100 + i))
        .filter(|m| m.text.contains("already being handled"))
        .count();
    assert_eq!(unavailable, 9);
}

#[tokio::test]
async fn admin_blocks_owner_and_everything_goes() {
    let d = setup();
    d.transport().set_admins(MASTER, &["root"]);
    d.dispatch(InboundEvent {
        chat_id: MASTER,
        chat_kind: ChatKind::Group,
        sender_handle: Some("root".into()),
        sender_id: 1,
        payload: Payload::Text("/setmasterchat".into()),
    })
    .await;

    let id = publish_sell_request(&d, "mallory", 7).await;
    press(&d, "bob", 2, "menu:vote").await;
    say(&d, "bob", 2, "@mallory").await;
    assert!(d.database().has_voted("bob", "mallory").unwrap());

    say(&d, "root", 5, "/admin").await;
    press(&d, "root", 5, "admin:block").await;
    say(&d, "root", 5, &id.to_string()).await;

    assert!(d.database().is_blacklisted(1007).unwrap());
    assert!(!d.database().is_user_registered("mallory").unwrap());
    assert!(d.database().escrow_ranking().unwrap().is_empty());

    d.transport().take();
    say(&d, "mallory", 7, "/start").await;
    let sent = d.transport().take();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("You are in the blacklist!"));
}
