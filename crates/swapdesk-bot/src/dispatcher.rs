use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use swapdesk_db::Database;
use swapdesk_types::{ChatKind, InboundEvent, OutgoingMessage};
use tracing::{debug, error, info, warn};

use crate::admin::{GroupCommand, GroupContext, run_group_command};
use crate::conversation::Context;
use crate::i18n::{Key, Localizer};
use crate::session::SessionCache;
use crate::transport::ChatTransport;

/// Routes inbound events to group commands or to the sender's conversation.
pub struct Dispatcher<T: ChatTransport> {
    inner: Arc<DispatcherInner<T>>,
}

struct DispatcherInner<T> {
    db: Arc<Database>,
    transport: T,
    i18n: Localizer,
    sessions: SessionCache,
}

impl<T: ChatTransport> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ChatTransport> Dispatcher<T> {
    pub fn new(db: Arc<Database>, transport: T, i18n: Localizer, sessions: SessionCache) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                db,
                transport,
                i18n,
                sessions,
            }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.inner.db
    }

    /// Handles one event end to end. Failures are logged, never returned,
    /// so the caller can fire and forget.
    pub async fn dispatch(&self, event: InboundEvent) {
        let result = match event.chat_kind {
            ChatKind::Group => self.dispatch_group(&event).await,
            ChatKind::Direct => self.dispatch_private(&event).await,
        };
        if let Err(e) = result {
            error!(
                "Event from {:?} in chat {} failed: {:#}",
                event.sender_handle, event.chat_id, e
            );
        }
    }

    async fn dispatch_private(&self, event: &InboundEvent) -> Result<()> {
        let chat_id = event.chat_id;
        let user_id = event.sender_id;

        if self.blocking(move |db, _| db.is_blacklisted(user_id)).await? {
            debug!("Ignoring blacklisted account {}", user_id);
            return self.reply_bilingual(chat_id, Key::Blacklisted).await;
        }
        let Some(handle) = event.handle().map(str::to_string) else {
            return self.reply_bilingual(chat_id, Key::NeedHandle).await;
        };

        let h = handle.clone();
        if self.blocking(move |db, _| db.touch_user(&h, user_id, chat_id)).await? {
            info!("Registered {} on first contact", handle);
        }

        // Held until every reply is sent: one event per user at a time.
        let mut session = self
            .inner
            .sessions
            .get_or_create(&handle, chat_id)
            .lock_owned()
            .await;
        session.set_chat_id(chat_id);

        let input = event.payload.as_str().to_string();
        let is_admin = if input.trim() == "/admin" || session.step().is_admin() {
            self.is_master_admin(&handle).await
        } else {
            false
        };
        let today = Local::now().date_naive();

        let (mut session, messages) = self
            .blocking(move |db, i18n| {
                let ctx = Context {
                    db,
                    i18n,
                    today,
                    is_admin,
                };
                let messages = session.handle(&ctx, &input)?;
                Ok((session, messages))
            })
            .await?;

        let removed = session.take_removed_users();
        self.deliver(messages).await;
        drop(session);
        for handle in removed {
            self.inner.sessions.reset(&handle);
        }
        Ok(())
    }

    async fn dispatch_group(&self, event: &InboundEvent) -> Result<()> {
        let Some(command) = GroupCommand::parse(event.payload.as_str()) else {
            return Ok(());
        };
        let Some(sender) = event.handle().map(str::to_string) else {
            return self.reply_bilingual(event.chat_id, Key::NeedHandle).await;
        };

        let master_chat = self.blocking(|db, _| db.master_chat_id()).await?;
        let sender_is_admin = match (&command, master_chat) {
            (GroupCommand::SetMasterChat, None) => self.is_admin_of(event.chat_id, &sender).await?,
            (command, Some(master)) if command.requires_admin() => self.is_admin_of(master, &sender).await?,
            _ => false,
        };
        debug!("{} ran {:?} (admin: {})", sender, command, sender_is_admin);

        let chat_id = event.chat_id;
        let reply = self
            .blocking(move |db, i18n| {
                let ctx = GroupContext {
                    db,
                    i18n,
                    chat_id,
                    sender: &sender,
                    master_chat,
                    sender_is_admin,
                };
                run_group_command(&ctx, &command)
            })
            .await?;

        if let Some(handle) = &reply.removed_user {
            self.inner.sessions.reset(handle);
        }
        self.deliver(reply.messages).await;
        Ok(())
    }

    /// Whether `handle` currently administers the master chat. Transport
    /// failures count as "no".
    async fn is_master_admin(&self, handle: &str) -> bool {
        let master = match self.blocking(|db, _| db.master_chat_id()).await {
            Ok(Some(master)) => master,
            Ok(None) => return false,
            Err(e) => {
                warn!("Master chat lookup failed: {}", e);
                return false;
            }
        };
        match self.is_admin_of(master, handle).await {
            Ok(admin) => admin,
            Err(e) => {
                warn!("Admin list for chat {} unavailable: {}", master, e);
                false
            }
        }
    }

    async fn is_admin_of(&self, chat_id: i64, handle: &str) -> Result<bool> {
        let admins = self.inner.transport.chat_administrators(chat_id).await?;
        Ok(admins.iter().any(|a| same_handle(a, handle)))
    }

    /// Runs store work off the async workers.
    async fn blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Database, &Localizer) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner.db, &inner.i18n)).await?
    }

    async fn reply_bilingual(&self, chat_id: i64, key: Key) -> Result<()> {
        let text = self.inner.i18n.bilingual(key);
        self.deliver(vec![OutgoingMessage::html(chat_id, text)]).await;
        Ok(())
    }

    async fn deliver(&self, messages: Vec<OutgoingMessage>) {
        for message in messages {
            let chat_id = message.chat_id;
            if let Err(e) = self.inner.transport.send(message).await {
                warn!("Send to chat {} failed: {}", chat_id, e);
            }
        }
    }
}

fn same_handle(a: &str, b: &str) -> bool {
    a.trim_start_matches('@')
        .eq_ignore_ascii_case(b.trim_start_matches('@'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Step;
    use crate::transport::MemoryTransport;
    use std::time::Duration;
    use swapdesk_types::{Language, Payload};

    const MASTER: i64 = -500;

    fn dispatcher() -> Dispatcher<MemoryTransport> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.seed_assets(&["USD".into()]).unwrap();
        Dispatcher::new(
            db,
            MemoryTransport::new(),
            Localizer::new(Language::En),
            SessionCache::new(100, Duration::from_secs(600)),
        )
    }

    fn private(handle: Option<&str>, id: i64, text: &str) -> InboundEvent {
        InboundEvent {
            chat_id: id,
            chat_kind: ChatKind::Direct,
            sender_handle: handle.map(str::to_string),
            sender_id: id * 100,
            payload: Payload::Text(text.into()),
        }
    }

    fn group(chat_id: i64, handle: &str, text: &str) -> InboundEvent {
        InboundEvent {
            chat_id,
            chat_kind: ChatKind::Group,
            sender_handle: Some(handle.into()),
            sender_id: 1,
            payload: Payload::Text(text.into()),
        }
    }

    #[tokio::test]
    async fn first_private_message_registers_and_replies() {
        let d = dispatcher();
        d.dispatch(private(Some("alice"), 1, "/start")).await;

        assert!(d.database().is_user_registered("alice").unwrap());
        assert_eq!(d.database().user_chat_id("alice").unwrap(), Some(1));
        let sent = d.transport().take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "What would you like to do?");
        assert!(sent[0].markup.is_some());
    }

    #[tokio::test]
    async fn missing_handle_is_asked_for() {
        let d = dispatcher();
        d.dispatch(private(None, 1, "/start")).await;
        let sent = d.transport().take();
        assert!(sent[0].text.contains("Set your username"));
        assert_eq!(d.database().users_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn blacklisted_accounts_are_turned_away() {
        let d = dispatcher();
        d.database().touch_user("spammer", 900, 9).unwrap();
        d.database().claim_master_chat(MASTER).unwrap();
        d.transport().set_admins(MASTER, &["root"]);

        let id = d
            .database()
            .create_request(&swapdesk_types::NewTradeRequest {
                owner: "spammer".into(),
                direction: swapdesk_types::Direction::Buy,
                quantity: 1,
                currency: "USD".into(),
                bank: "x".into(),
                fee: 0.0,
                start_date: chrono::NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
                end_date: chrono::NaiveDate::from_ymd_opt(2030, 1, 2).unwrap(),
            })
            .unwrap();
        d.dispatch(group(MASTER, "root", &format!("/blockbyreqid {}", id))).await;
        d.transport().take();

        d.dispatch(private(Some("spammer2"), 9, "/start")).await;
        let sent = d.transport().take();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("blacklist"));
        assert!(!d.database().is_user_registered("spammer2").unwrap());
    }

    #[tokio::test]
    async fn master_chat_admins_reach_private_moderation() {
        let d = dispatcher();
        d.transport().set_admins(MASTER, &["@Root"]);
        d.dispatch(group(MASTER, "root", "/setmasterchat")).await;
        assert_eq!(d.database().master_chat_id().unwrap(), Some(MASTER));
        assert_eq!(d.transport().sent_to(MASTER)[0].text, "Done");

        d.dispatch(private(Some("root"), 2, "/admin")).await;
        d.dispatch(private(Some("eve"), 3, "/admin")).await;
        assert!(d.transport().sent_to(2)[0].text.contains("Moderation"));
        assert!(d.transport().sent_to(3)[0].text.contains("only available to administrators"));
    }

    #[tokio::test]
    async fn admin_rights_are_rechecked_each_event() {
        let d = dispatcher();
        d.database().claim_master_chat(MASTER).unwrap();
        d.transport().set_admins(MASTER, &["root"]);
        d.dispatch(private(Some("root"), 2, "/admin")).await;
        d.transport().take();

        d.transport().set_admins(MASTER, &[]);
        d.dispatch(private(Some("root"), 2, "admin:delete")).await;
        let sent = d.transport().take();
        assert!(sent[0].text.contains("only available to administrators"));
    }

    #[tokio::test]
    async fn deleted_users_keep_a_single_reset_session() {
        let d = dispatcher();
        d.database().claim_master_chat(MASTER).unwrap();
        d.transport().set_admins(MASTER, &["root"]);
        d.dispatch(private(Some("alice"), 1, "menu:new")).await;
        d.dispatch(private(Some("bob"), 2, "menu:new")).await;
        let alice = d.inner.sessions.get("alice").unwrap();
        let bob = d.inner.sessions.get("bob").unwrap();
        assert_eq!(alice.lock().await.step(), Step::AwaitingDirection);

        d.dispatch(group(MASTER, "root", "/unregister @alice")).await;
        assert!(!d.database().is_user_registered("alice").unwrap());
        assert!(Arc::ptr_eq(&alice, &d.inner.sessions.get("alice").unwrap()));
        assert_eq!(alice.lock().await.step(), Step::Start);

        for text in ["dir:buy", "5", "USD", "N26", "0", "01.01.2099-02.01.2099", "confirm:yes"] {
            d.dispatch(private(Some("bob"), 2, text)).await;
        }
        let id = d.database().requests_for("bob").unwrap()[0].id;
        d.dispatch(private(Some("bob"), 2, "menu:new")).await;

        d.dispatch(private(Some("root"), 3, "/admin")).await;
        d.dispatch(private(Some("root"), 3, "admin:block")).await;
        d.dispatch(private(Some("root"), 3, &id.to_string())).await;
        assert!(!d.database().is_user_registered("bob").unwrap());
        assert_eq!(bob.lock().await.step(), Step::Start);
    }

    #[tokio::test]
    async fn group_commands_need_a_handle() {
        let d = dispatcher();
        let mut event = group(MASTER, "x", "/register");
        event.sender_handle = Some("  ".into());
        d.dispatch(event).await;
        assert!(d.transport().take()[0].text.contains("Set your username"));

        d.dispatch(group(MASTER, "x", "just chatting")).await;
        assert!(d.transport().take().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn double_submit_publishes_once() {
        let d = dispatcher();
        for text in ["menu:new", "dir:sell", "100", "USD", "Chase", "0", "01.01.2099-02.01.2099"] {
            d.dispatch(private(Some("alice"), 1, text)).await;
        }

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let d = d.clone();
                tokio::spawn(async move { d.dispatch(private(Some("alice"), 1, "confirm:yes")).await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(d.database().requests_for("alice").unwrap().len(), 1);
    }
}
