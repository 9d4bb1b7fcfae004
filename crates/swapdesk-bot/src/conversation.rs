use anyhow::Result;
use chrono::NaiveDate;
use swapdesk_db::Database;
use swapdesk_types::{Button, Direction, Language, Markup, NewTradeRequest, OutgoingMessage, TradeRequest};
use tracing::{debug, info, warn};

use crate::i18n::{Key, Localizer, escape_html};
use crate::input::{self, DATE_FORMAT, Dates, InputError};

pub const PAGE_SIZE: usize = 10;
pub const NAV_BACK: &str = "⬅️";
pub const NAV_FORWARD: &str = "➡️";

const CURRENCY_BUTTONS_PER_ROW: usize = 4;
const REQUEST_BUTTONS_PER_ROW: usize = 5;

/// What a single event handler may touch.
pub struct Context<'a> {
    pub db: &'a Database,
    pub i18n: &'a Localizer,
    pub today: NaiveDate,
    /// Sender is currently an administrator of the master chat.
    pub is_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Delete,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Step {
    #[default]
    Start,
    AwaitingDirection,
    AwaitingQuantity,
    AwaitingCurrency,
    AwaitingBank,
    AwaitingFee,
    AwaitingDates,
    ConfirmPublish,
    Browsing,
    Negotiating(i64),
    MyRequests,
    AwaitingVoteTarget,
    AwaitingLanguage,
    AwaitingAdminAction,
    AwaitingAdminTarget(AdminAction),
}

impl Step {
    pub fn is_admin(self) -> bool {
        matches!(self, Step::AwaitingAdminAction | Step::AwaitingAdminTarget(_))
    }
}

/// Fields collected so far. Nothing here is durable until published.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub direction: Option<Direction>,
    pub quantity: Option<i64>,
    pub currency: Option<String>,
    pub bank: Option<String>,
    pub fee: Option<f64>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Id of the request being edited, if any.
    pub editing: Option<i64>,
}

impl Draft {
    fn from_request(req: &TradeRequest) -> Self {
        Self {
            direction: Some(req.direction),
            quantity: Some(req.quantity),
            currency: Some(req.currency.clone()),
            bank: Some(req.bank.clone()),
            fee: Some(req.fee),
            start: Some(req.start_date),
            end: Some(req.end_date),
            editing: Some(req.id),
        }
    }

    fn complete(&self, owner: &str) -> Option<NewTradeRequest> {
        Some(NewTradeRequest {
            owner: owner.to_string(),
            direction: self.direction?,
            quantity: self.quantity?,
            currency: self.currency.clone()?,
            bank: self.bank.clone()?,
            fee: self.fee?,
            start_date: self.start?,
            end_date: self.end?,
        })
    }
}

/// Messages produced while handling one event.
struct Replies<'a> {
    i18n: &'a Localizer,
    lang: Language,
    chat_id: i64,
    messages: Vec<OutgoingMessage>,
}

impl Replies<'_> {
    fn text(&self, key: Key, args: &[&str]) -> String {
        self.i18n.text(self.lang, key, args)
    }

    fn say(&mut self, key: Key, args: &[&str]) {
        let text = self.text(key, args);
        self.messages.push(OutgoingMessage::html(self.chat_id, text));
    }

    fn say_with(&mut self, text: String, markup: Markup) {
        self.messages
            .push(OutgoingMessage::html(self.chat_id, text).with_markup(markup));
    }

    fn notify(&mut self, chat_id: i64, text: String, markup: Markup) {
        self.messages
            .push(OutgoingMessage::html(chat_id, text).with_markup(markup));
    }
}

/// One user's position in the conversation.
#[derive(Debug, Clone)]
pub struct Session {
    handle: String,
    chat_id: i64,
    step: Step,
    draft: Draft,
    page: usize,
    /// Users deleted by this session's last moderation action.
    removed_users: Vec<String>,
}

impl Session {
    pub fn new(handle: impl Into<String>, chat_id: i64) -> Self {
        Self {
            handle: handle.into(),
            chat_id,
            step: Step::Start,
            draft: Draft::default(),
            page: 0,
            removed_users: Vec::new(),
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn set_chat_id(&mut self, chat_id: i64) {
        self.chat_id = chat_id;
    }

    /// Drops every in-progress field and returns to `Start`.
    /// Handles of users a moderation step deleted since the last call.
    pub fn take_removed_users(&mut self) -> Vec<String> {
        std::mem::take(&mut self.removed_users)
    }

    pub fn reset(&mut self) {
        self.step = Step::Start;
        self.draft = Draft::default();
        self.page = 0;
    }

    /// Feeds one text or callback payload through the state machine.
    pub fn handle(&mut self, ctx: &Context<'_>, input: &str) -> Result<Vec<OutgoingMessage>> {
        let mut out = Replies {
            i18n: ctx.i18n,
            lang: ctx.i18n.language(ctx.db, &self.handle),
            chat_id: self.chat_id,
            messages: Vec::new(),
        };
        let input = input.trim();
        debug!("{} in {:?} <- {:?}", self.handle, self.step, input);
        self.route(ctx, &mut out, input)?;
        Ok(out.messages)
    }

    fn route(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>, input: &str) -> Result<()> {
        match input {
            "/start" => {
                self.reset();
                return self.show_main_menu(ctx, out);
            }
            "/help" => {
                out.say(Key::Usage, &[]);
                return Ok(());
            }
            "/admin" => {
                self.reset();
                return self.enter_admin(ctx, out);
            }
            "menu:browse" => {
                self.reset();
                return self.show_page(ctx, out);
            }
            NAV_BACK | NAV_FORWARD => {
                if self.step != Step::Browsing {
                    self.reset();
                } else if input == NAV_BACK {
                    self.page = self.page.saturating_sub(1);
                } else {
                    self.page += 1;
                }
                return self.show_page(ctx, out);
            }
            _ => {}
        }

        if let Some(item) = input.strip_prefix("menu:") {
            self.reset();
            return self.open_menu(ctx, out, item);
        }
        if let Some(id) = callback_id(input, "req:") {
            return self.take_request(ctx, out, id);
        }
        if let Some(id) = callback_id(input, "deal:done:") {
            return self.finish_deal(ctx, out, id, true);
        }
        if let Some(id) = callback_id(input, "deal:cancel:") {
            return self.finish_deal(ctx, out, id, false);
        }
        if let Some(id) = callback_id(input, "del:") {
            return self.delete_own(ctx, out, id);
        }
        if let Some(id) = callback_id(input, "edit:") {
            return self.start_edit(ctx, out, id);
        }
        if let Some(target) = input.strip_prefix("unvote:") {
            if ctx.db.unvote(&self.handle, target)? {
                out.say(Key::Unvoted, &[&escape_html(target)]);
            }
            return self.show_votes(ctx, out);
        }
        if let Some(code) = input.strip_prefix("lang:") {
            return self.choose_language(ctx, out, code);
        }

        self.step_input(ctx, out, input)
    }

    fn step_input(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>, input: &str) -> Result<()> {
        match self.step {
            Step::Start => self.show_main_menu(ctx, out),
            Step::AwaitingDirection => {
                let direction = match input {
                    "dir:buy" => Some(Direction::Buy),
                    "dir:sell" => Some(Direction::Sell),
                    text if text.eq_ignore_ascii_case(&out.text(Key::Buy, &[])) => Some(Direction::Buy),
                    text if text.eq_ignore_ascii_case(&out.text(Key::Sell, &[])) => Some(Direction::Sell),
                    _ => None,
                };
                if let Some(direction) = direction {
                    self.draft.direction = Some(direction);
                    self.step = Step::AwaitingQuantity;
                }
                self.prompt(ctx, out)
            }
            Step::AwaitingQuantity => match input::parse_quantity(input) {
                Ok(quantity) => {
                    self.draft.quantity = Some(quantity);
                    self.step = Step::AwaitingCurrency;
                    self.prompt(ctx, out)
                }
                Err(e) => self.reprompt(ctx, out, e),
            },
            Step::AwaitingCurrency => match input::match_currency(input, &ctx.db.assets()?) {
                Ok(currency) => {
                    self.draft.currency = Some(currency);
                    self.step = Step::AwaitingBank;
                    self.prompt(ctx, out)
                }
                Err(e) => self.reprompt(ctx, out, e),
            },
            Step::AwaitingBank => match input::parse_bank(input) {
                Ok(bank) => {
                    self.draft.bank = Some(bank);
                    self.step = Step::AwaitingFee;
                    self.prompt(ctx, out)
                }
                Err(e) => self.reprompt(ctx, out, e),
            },
            Step::AwaitingFee => match input::parse_fee(input) {
                Ok(fee) => {
                    self.draft.fee = Some(fee);
                    self.draft.start = None;
                    self.draft.end = None;
                    self.step = Step::AwaitingDates;
                    self.prompt(ctx, out)
                }
                Err(e) => self.reprompt(ctx, out, e),
            },
            Step::AwaitingDates => self.accept_dates(ctx, out, input),
            Step::ConfirmPublish => match input {
                "confirm:yes" => self.publish(ctx, out),
                "confirm:no" => {
                    self.reset();
                    out.say(Key::Cancelled, &[]);
                    self.show_main_menu(ctx, out)
                }
                _ => self.prompt(ctx, out),
            },
            Step::Browsing => self.show_page(ctx, out),
            Step::Negotiating(id) => self.show_deal(ctx, out, id),
            Step::MyRequests => self.show_mine(ctx, out),
            Step::AwaitingVoteTarget => self.cast_vote(ctx, out, input),
            Step::AwaitingLanguage => self.choose_language(ctx, out, input),
            Step::AwaitingAdminAction => {
                if !ctx.is_admin {
                    return self.deny_admin(ctx, out);
                }
                match input {
                    "admin:delete" => self.step = Step::AwaitingAdminTarget(AdminAction::Delete),
                    "admin:block" => self.step = Step::AwaitingAdminTarget(AdminAction::Block),
                    _ => {}
                }
                self.prompt(ctx, out)
            }
            Step::AwaitingAdminTarget(action) => {
                if !ctx.is_admin {
                    return self.deny_admin(ctx, out);
                }
                match input::parse_request_id(input) {
                    Ok(id) => self.moderate(ctx, out, action, id),
                    Err(e) => self.reprompt(ctx, out, e),
                }
            }
        }
    }

    /// Re-sends the question for the current step.
    fn prompt(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>) -> Result<()> {
        match self.step {
            Step::AwaitingDirection => {
                let markup = Markup::default().row(vec![
                    Button::new(out.text(Key::Buy, &[]), "dir:buy"),
                    Button::new(out.text(Key::Sell, &[]), "dir:sell"),
                ]);
                out.say_with(out.text(Key::AskDirection, &[]), markup);
            }
            Step::AwaitingQuantity => out.say(Key::AskQuantity, &[]),
            Step::AwaitingCurrency => {
                let assets = ctx.db.assets()?;
                let mut markup = Markup::default();
                for chunk in assets.chunks(CURRENCY_BUTTONS_PER_ROW) {
                    markup = markup.row(chunk.iter().map(|a| Button::new(a.as_str(), a.as_str())).collect());
                }
                out.say_with(out.text(Key::AskCurrency, &[]), markup);
            }
            Step::AwaitingBank => out.say(Key::AskBank, &[]),
            Step::AwaitingFee => out.say(Key::AskFee, &[]),
            Step::AwaitingDates => match self.draft.start {
                Some(start) => {
                    let start = start.format(DATE_FORMAT).to_string();
                    out.say(Key::AskEndDate, &[&start]);
                }
                None => out.say(Key::AskDates, &[]),
            },
            Step::ConfirmPublish => match self.draft.complete(&self.handle) {
                Some(fields) => {
                    let preview = fields.with_id(self.draft.editing.unwrap_or_default());
                    let rendered = ctx.i18n.render_request(out.lang, &preview);
                    let markup = Markup::default().row(vec![
                        Button::new(out.text(Key::BtnPublish, &[]), "confirm:yes"),
                        Button::new(out.text(Key::BtnCancel, &[]), "confirm:no"),
                    ]);
                    out.say_with(out.text(Key::ConfirmRequest, &[&rendered]), markup);
                }
                None => {
                    self.reset();
                    return self.show_main_menu(ctx, out);
                }
            },
            Step::AwaitingVoteTarget => out.say(Key::AskVoteTarget, &[]),
            Step::AwaitingLanguage => {
                let markup = Markup::default().row(vec![
                    Button::new("English", "lang:en"),
                    Button::new("Русский", "lang:ru"),
                ]);
                out.say_with(out.text(Key::AskLanguage, &[]), markup);
            }
            Step::AwaitingAdminAction => {
                let markup = Markup::default()
                    .row(vec![Button::new(out.text(Key::BtnAdminDelete, &[]), "admin:delete")])
                    .row(vec![Button::new(out.text(Key::BtnAdminBlock, &[]), "admin:block")]);
                out.say_with(out.text(Key::AdminMenu, &[]), markup);
            }
            Step::AwaitingAdminTarget(_) => out.say(Key::AskAdminTarget, &[]),
            Step::Start => return self.show_main_menu(ctx, out),
            Step::Browsing => return self.show_page(ctx, out),
            Step::Negotiating(id) => return self.show_deal(ctx, out, id),
            Step::MyRequests => return self.show_mine(ctx, out),
        }
        Ok(())
    }

    fn reprompt(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>, err: InputError) -> Result<()> {
        debug!("{} rejected input in {:?}: {}", self.handle, self.step, err);
        match &err {
            InputError::Currency(name) => out.say(err.key(), &[&escape_html(name)]),
            _ => out.say(err.key(), &[]),
        }
        self.prompt(ctx, out)
    }

    fn accept_dates(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>, input: &str) -> Result<()> {
        let (start, end) = match input::parse_dates(input) {
            Ok(Dates::Range(start, end)) => (start, end),
            Ok(Dates::Single(date)) => match self.draft.start {
                Some(start) => (start, date),
                None => {
                    self.draft.start = Some(date);
                    return self.prompt(ctx, out);
                }
            },
            Err(e) => return self.reprompt(ctx, out, e),
        };

        if let Err(e) = input::validate_window(start, end, ctx.today) {
            return self.reprompt(ctx, out, e);
        }
        self.draft.start = Some(start);
        self.draft.end = Some(end);
        self.step = Step::ConfirmPublish;
        self.prompt(ctx, out)
    }

    fn publish(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>) -> Result<()> {
        let Some(fields) = self.draft.complete(&self.handle) else {
            self.reset();
            return self.show_main_menu(ctx, out);
        };

        if let Some(id) = self.draft.editing {
            let id_text = id.to_string();
            if ctx.db.update_request(id, &self.handle, &fields)? {
                info!("{} updated request {}", self.handle, id);
                out.say(Key::Updated, &[&id_text]);
            } else {
                out.say(Key::UpdateFailed, &[&id_text]);
            }
        } else {
            let id = ctx.db.create_request(&fields)?;
            // The draft must not outlive the commit.
            self.reset();
            info!("{} published request {}", self.handle, id);
            out.say(Key::Published, &[&id.to_string()]);

            if let Err(e) = broadcast(ctx, out, &fields.with_id(id)) {
                warn!("Broadcast of request {} failed: {}", id, e);
            }
        }

        self.reset();
        self.show_main_menu(ctx, out)
    }

    fn show_main_menu(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>) -> Result<()> {
        self.step = Step::Start;
        let notify = if ctx.db.is_subscribed(&self.handle)? {
            Key::BtnNotifyOff
        } else {
            Key::BtnNotifyOn
        };
        let button = |key: Key, data: &str| Button::new(out.text(key, &[]), data);
        let markup = Markup::default()
            .row(vec![button(Key::BtnNewRequest, "menu:new"), button(Key::BtnBrowse, "menu:browse")])
            .row(vec![button(Key::BtnMyRequests, "menu:mine"), button(Key::BtnEscrow, "menu:escrow")])
            .row(vec![button(Key::BtnVote, "menu:vote"), button(Key::BtnMyVotes, "menu:votes")])
            .row(vec![button(notify, "menu:notify"), button(Key::BtnLanguage, "menu:lang")]);
        out.say_with(out.text(Key::MainMenu, &[]), markup);
        Ok(())
    }

    fn open_menu(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>, item: &str) -> Result<()> {
        match item {
            "new" => {
                self.step = Step::AwaitingDirection;
                self.prompt(ctx, out)
            }
            "mine" => self.show_mine(ctx, out),
            "vote" => {
                self.step = Step::AwaitingVoteTarget;
                self.prompt(ctx, out)
            }
            "votes" => self.show_votes(ctx, out),
            "escrow" => self.show_escrow(ctx, out),
            "notify" => {
                if ctx.db.is_subscribed(&self.handle)? {
                    ctx.db.unsubscribe(&self.handle)?;
                    out.say(Key::NotificationsOff, &[]);
                } else {
                    ctx.db.subscribe(&self.handle, self.chat_id)?;
                    out.say(Key::NotificationsOn, &[]);
                }
                self.show_main_menu(ctx, out)
            }
            "lang" => {
                self.step = Step::AwaitingLanguage;
                self.prompt(ctx, out)
            }
            _ => self.show_main_menu(ctx, out),
        }
    }

    // -- Browsing and negotiation --

    fn show_page(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>) -> Result<()> {
        let total = usize::try_from(ctx.db.requests_count()?).unwrap_or_default();
        if total == 0 {
            out.say(Key::Empty, &[]);
            return self.show_main_menu(ctx, out);
        }

        let pages = total.div_ceil(PAGE_SIZE);
        self.page = self.page.min(pages - 1);
        self.step = Step::Browsing;

        let requests = ctx.db.list_requests(self.page * PAGE_SIZE, PAGE_SIZE)?;
        let mut text = out.text(
            Key::PageHeader,
            &[&(self.page + 1).to_string(), &pages.to_string()],
        );
        for req in &requests {
            text.push_str("\n\n");
            text.push_str(&ctx.i18n.render_request(out.lang, req));
        }

        let mut markup = Markup::default();
        for chunk in requests.chunks(REQUEST_BUTTONS_PER_ROW) {
            markup = markup.row(
                chunk
                    .iter()
                    .map(|r| Button::new(format!("#{}", r.id), format!("req:{}", r.id)))
                    .collect(),
            );
        }
        let mut nav = Vec::new();
        if self.page > 0 {
            nav.push(Button::new(NAV_BACK, NAV_BACK));
        }
        if self.page + 1 < pages {
            nav.push(Button::new(NAV_FORWARD, NAV_FORWARD));
        }
        out.say_with(text, markup.row(nav));
        Ok(())
    }

    fn take_request(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>, id: i64) -> Result<()> {
        let id_text = id.to_string();
        let Some(req) = ctx.db.get_request(id)? else {
            out.say(Key::RequestGone, &[&id_text]);
            return self.show_page(ctx, out);
        };
        if req.owner == self.handle {
            out.say(Key::OwnRequest, &[]);
            return self.show_page(ctx, out);
        }

        let (seller, buyer) = req.parties(&self.handle);
        if !ctx.db.acquire_processing_lock(id, seller, buyer)? {
            out.say(Key::Unavailable, &[&id_text]);
            return self.show_page(ctx, out);
        }
        info!("{} took request {} from {}", self.handle, id, req.owner);

        self.step = Step::Negotiating(id);
        let rendered = ctx.i18n.render_request(out.lang, &req);
        let text = out.text(
            Key::DealStartedTaker,
            &[&id_text, &escape_html(&req.owner), &rendered],
        );
        out.say_with(text, deal_markup(ctx, out.lang, id));

        if let Some(owner_chat) = ctx.db.user_chat_id(&req.owner)? {
            let lang = ctx.i18n.language(ctx.db, &req.owner);
            let text = ctx
                .i18n
                .text(lang, Key::DealStartedOwner, &[&escape_html(&self.handle), &id_text]);
            out.notify(owner_chat, text, deal_markup(ctx, lang, id));
        }
        Ok(())
    }

    fn show_deal(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>, id: i64) -> Result<()> {
        match ctx.db.get_request(id)? {
            Some(req) => {
                let rendered = ctx.i18n.render_request(out.lang, &req);
                out.say_with(rendered, deal_markup(ctx, out.lang, id));
                Ok(())
            }
            None => {
                out.say(Key::RequestGone, &[&id.to_string()]);
                self.show_main_menu(ctx, out)
            }
        }
    }

    /// Either party may close the deal. `done` removes the request, otherwise
    /// only the lock is released and the request is open again.
    fn finish_deal(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>, id: i64, done: bool) -> Result<()> {
        let id_text = id.to_string();
        let (lock, key) = if done {
            (ctx.db.complete_deal(id, &self.handle)?, Key::DealDone)
        } else {
            (ctx.db.release_processing_lock(id, &self.handle)?, Key::DealCancelled)
        };
        let Some(lock) = lock else {
            out.say(Key::DealNotFound, &[&id_text]);
            return self.show_main_menu(ctx, out);
        };
        info!("{} closed deal on request {} (done: {})", self.handle, id, done);

        out.say(key, &[&id_text]);
        let other = if lock.seller == self.handle { &lock.buyer } else { &lock.seller };
        if let Some(chat) = ctx.db.user_chat_id(other)? {
            let text = ctx.i18n.translate(ctx.db, other, key, &[&id_text]);
            out.notify(chat, text, Markup::default());
        }

        self.reset();
        self.show_main_menu(ctx, out)
    }

    // -- Own requests --

    fn show_mine(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>) -> Result<()> {
        let requests = ctx.db.requests_for(&self.handle)?;
        if requests.is_empty() {
            out.say(Key::Empty, &[]);
            return self.show_main_menu(ctx, out);
        }

        self.step = Step::MyRequests;
        let mut text = out.text(Key::MyRequestsHeader, &[]);
        let mut markup = Markup::default();
        for req in &requests {
            text.push_str("\n\n");
            text.push_str(&ctx.i18n.render_request(out.lang, req));
            let id = req.id.to_string();
            markup = markup.row(vec![
                Button::new(out.text(Key::BtnEdit, &[&id]), format!("edit:{}", id)),
                Button::new(out.text(Key::BtnDelete, &[&id]), format!("del:{}", id)),
            ]);
        }

        let deals: Vec<String> = ctx
            .db
            .locks_held_by(&self.handle)?
            .iter()
            .map(|l| format!("#{}", l.request_id))
            .collect();
        if !deals.is_empty() {
            text.push_str("\n\n");
            text.push_str(&out.text(Key::ActiveDeals, &[&deals.join(", ")]));
        }

        out.say_with(text, markup);
        Ok(())
    }

    fn delete_own(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>, id: i64) -> Result<()> {
        let id_text = id.to_string();
        if ctx.db.delete_request_owned(id, &self.handle)? {
            info!("{} deleted request {}", self.handle, id);
            out.say(Key::Deleted, &[&id_text]);
        } else {
            out.say(Key::NotYours, &[&id_text]);
        }
        self.show_mine(ctx, out)
    }

    fn start_edit(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>, id: i64) -> Result<()> {
        match ctx.db.get_request(id)? {
            Some(req) if req.owner == self.handle => {
                self.reset();
                self.draft = Draft::from_request(&req);
                self.step = Step::AwaitingQuantity;
                self.prompt(ctx, out)
            }
            Some(_) => {
                out.say(Key::NotYours, &[&id.to_string()]);
                self.show_mine(ctx, out)
            }
            None => {
                out.say(Key::RequestGone, &[&id.to_string()]);
                self.show_mine(ctx, out)
            }
        }
    }

    // -- Votes --

    fn cast_vote(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>, input: &str) -> Result<()> {
        let target = match input::parse_handle(input) {
            Ok(target) => target,
            Err(e) => return self.reprompt(ctx, out, e),
        };

        if target.eq_ignore_ascii_case(&self.handle) {
            out.say(Key::VoteSelf, &[]);
            return self.prompt(ctx, out);
        }
        if !ctx.db.is_user_registered(&target)? {
            out.say(Key::VoteUnknownUser, &[&target]);
            return self.prompt(ctx, out);
        }

        if ctx.db.has_voted(&self.handle, &target)? {
            out.say(Key::AlreadyVoted, &[&target]);
        } else if ctx.db.vote(&self.handle, &target)? {
            out.say(Key::Voted, &[&target]);
        } else {
            out.say(Key::VoteLimit, &[&swapdesk_db::MAX_VOTES.to_string()]);
        }
        self.reset();
        self.show_main_menu(ctx, out)
    }

    fn show_votes(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>) -> Result<()> {
        let voted = ctx.db.voted_users(&self.handle)?;
        if voted.is_empty() {
            out.say(Key::Empty, &[]);
            return self.show_main_menu(ctx, out);
        }

        let mut text = out.text(Key::MyVotesHeader, &[]);
        let mut markup = Markup::default();
        for handle in &voted {
            let safe = escape_html(handle);
            text.push_str(&format!("\n@{}", safe));
            markup = markup.row(vec![Button::new(
                out.text(Key::BtnUnvote, &[handle]),
                format!("unvote:{}", handle),
            )]);
        }
        out.say_with(text, markup);
        Ok(())
    }

    fn show_escrow(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>) -> Result<()> {
        let lines = escrow_lines(ctx.db, ctx.i18n, out.lang)?;
        if lines.is_empty() {
            out.say(Key::Empty, &[]);
        } else {
            out.messages.push(OutgoingMessage::html(out.chat_id, lines));
        }
        self.show_main_menu(ctx, out)
    }

    fn choose_language(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>, code: &str) -> Result<()> {
        match code.parse::<Language>() {
            Ok(lang) => {
                ctx.db.set_user_language(&self.handle, lang)?;
                out.lang = lang;
                out.say(Key::LanguageSet, &[]);
                self.reset();
                self.show_main_menu(ctx, out)
            }
            Err(_) => {
                self.step = Step::AwaitingLanguage;
                self.prompt(ctx, out)
            }
        }
    }

    // -- Moderation --

    fn enter_admin(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>) -> Result<()> {
        if !ctx.is_admin {
            return self.deny_admin(ctx, out);
        }
        self.step = Step::AwaitingAdminAction;
        self.prompt(ctx, out)
    }

    fn deny_admin(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>) -> Result<()> {
        out.say(Key::NotAdmin, &[]);
        self.reset();
        self.show_main_menu(ctx, out)
    }

    fn moderate(&mut self, ctx: &Context<'_>, out: &mut Replies<'_>, action: AdminAction, id: i64) -> Result<()> {
        let id_text = id.to_string();
        match action {
            AdminAction::Delete => {
                if ctx.db.delete_request(id)? {
                    info!("{} removed request {}", self.handle, id);
                    out.say(Key::AdminDeleted, &[&id_text]);
                } else {
                    out.say(Key::AdminNotFound, &[&id_text]);
                }
            }
            AdminAction::Block => match ctx.db.blacklist_by_request(id)? {
                Some(owner) => {
                    info!("{} blocked {} via request {}", self.handle, owner, id);
                    out.say(Key::AdminBlocked, &[&id_text, &escape_html(&owner)]);
                    self.removed_users.push(owner);
                }
                None => out.say(Key::AdminNotFound, &[&id_text]),
            },
        }
        self.step = Step::AwaitingAdminAction;
        self.prompt(ctx, out)
    }
}

/// Announces a new request to every subscriber except its owner.
fn broadcast(ctx: &Context<'_>, out: &mut Replies<'_>, published: &TradeRequest) -> Result<()> {
    for (handle, chat_id) in ctx.db.subscribers(&published.owner)? {
        let lang = ctx.i18n.language(ctx.db, &handle);
        let rendered = ctx.i18n.render_request(lang, published);
        let text = ctx.i18n.text(lang, Key::NewRequestNotice, &[&rendered]);
        let id = published.id;
        let markup = Markup::default().row(vec![Button::new(format!("#{}", id), format!("req:{}", id))]);
        out.notify(chat_id, text, markup);
    }
    Ok(())
}

fn callback_id(input: &str, prefix: &str) -> Option<i64> {
    input.strip_prefix(prefix)?.parse().ok()
}

fn deal_markup(ctx: &Context<'_>, lang: Language, id: i64) -> Markup {
    Markup::default().row(vec![
        Button::new(ctx.i18n.text(lang, Key::BtnDealDone, &[]), format!("deal:done:{}", id)),
        Button::new(ctx.i18n.text(lang, Key::BtnDealCancel, &[]), format!("deal:cancel:{}", id)),
    ])
}

/// The escrow ranking, one line per trusted user. Empty when nobody has votes.
pub fn escrow_lines(db: &Database, i18n: &Localizer, lang: Language) -> Result<String> {
    let lines: Vec<String> = db
        .escrow_ranking()?
        .iter()
        .map(|e| i18n.text(lang, Key::EscrowLine, &[&escape_html(&e.handle), &e.votes.to_string()]))
        .collect();
    Ok(lines.join("\n"))
}
