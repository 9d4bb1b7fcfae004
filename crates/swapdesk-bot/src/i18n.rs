use swapdesk_db::Database;
use swapdesk_types::{Direction, Language, TradeRequest};
use tracing::warn;

use crate::input::DATE_FORMAT;

/// Every user-facing string. Templates use positional `{0}`, `{1}`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    MainMenu,
    Usage,
    BtnNewRequest,
    BtnBrowse,
    BtnMyRequests,
    BtnVote,
    BtnMyVotes,
    BtnEscrow,
    BtnNotifyOn,
    BtnNotifyOff,
    BtnLanguage,
    Buy,
    Sell,
    AskDirection,
    AskQuantity,
    AskCurrency,
    AskBank,
    AskFee,
    AskDates,
    AskEndDate,
    ConfirmRequest,
    BtnPublish,
    BtnCancel,
    Published,
    Updated,
    UpdateFailed,
    Cancelled,
    InvalidQuantity,
    UnknownCurrency,
    InvalidBank,
    InvalidFee,
    InvalidDate,
    EndBeforeStart,
    EndInPast,
    InvalidHandle,
    InvalidRequestId,
    RequestTemplate,
    FeePayBuyer,
    FeePaySeller,
    FeeSplit,
    Empty,
    PageHeader,
    Unavailable,
    OwnRequest,
    RequestGone,
    DealStartedTaker,
    DealStartedOwner,
    BtnDealDone,
    BtnDealCancel,
    DealDone,
    DealCancelled,
    DealNotFound,
    ActiveDeals,
    MyRequestsHeader,
    BtnDelete,
    BtnEdit,
    Deleted,
    NotYours,
    AskVoteTarget,
    Voted,
    AlreadyVoted,
    VoteLimit,
    VoteSelf,
    VoteUnknownUser,
    MyVotesHeader,
    BtnUnvote,
    Unvoted,
    EscrowLine,
    NotificationsOn,
    NotificationsOff,
    AskLanguage,
    LanguageSet,
    NewRequestNotice,
    AdminMenu,
    BtnAdminDelete,
    BtnAdminBlock,
    AskAdminTarget,
    AdminDeleted,
    AdminBlocked,
    AdminNotFound,
    NotAdmin,
    Blacklisted,
    NeedHandle,
    AlreadyRegistered,
    Registered,
    UserDeleted,
    UserNotRegistered,
    UnregisterUsage,
    BlockUsage,
    Stats,
    MasterChatSet,
    MasterChatAlreadySet,
    AddAssetUsage,
    AssetAdded,
    AssetKnown,
}

fn en(key: Key) -> &'static str {
    use Key::*;
    match key {
        MainMenu => "What would you like to do?",
        Usage => "<b>Usage:</b>\n/start - start",
        BtnNewRequest => "New request",
        BtnBrowse => "All requests",
        BtnMyRequests => "My requests",
        BtnVote => "Vote for escrow",
        BtnMyVotes => "My votes",
        BtnEscrow => "Escrow list",
        BtnNotifyOn => "Turn notifications on",
        BtnNotifyOff => "Turn notifications off",
        BtnLanguage => "Language",
        Buy => "Buy",
        Sell => "Sell",
        AskDirection => "Do you want to buy or sell?",
        AskQuantity => "Enter the amount (whole number):",
        AskCurrency => "Choose the currency:",
        AskBank => "Enter the bank name:",
        AskFee => "Enter the fee in percent. Positive: the buyer pays, negative: the seller pays, 0: split.",
        AskDates => "Enter the validity period as dd.mm.yyyy-dd.mm.yyyy, or the start date alone:",
        AskEndDate => "Start date {0}. Now enter the end date (dd.mm.yyyy):",
        ConfirmRequest => "Publish this request?\n\n{0}",
        BtnPublish => "Publish",
        BtnCancel => "Cancel",
        Published => "Request #{0} published.",
        Updated => "Request #{0} updated.",
        UpdateFailed => "Request #{0} could not be updated.",
        Cancelled => "Cancelled.",
        InvalidQuantity => "The amount must be a positive whole number.",
        UnknownCurrency => "Unknown currency {0}. Pick one of the buttons.",
        InvalidBank => "The bank name must be 1 to 64 characters.",
        InvalidFee => "The fee must be a number from -100 to 100.",
        InvalidDate => "Dates must look like 31.12.2030.",
        EndBeforeStart => "The end date is before the start date.",
        EndInPast => "The end date is already in the past.",
        InvalidHandle => "That does not look like a username.",
        InvalidRequestId => "That is not a request number.",
        RequestTemplate => "<b>#{0}</b> @{1} {2} <b>{3} {4}</b>\nFee: {5}% {6}\nBank: {7}\nValid: {8} - {9}",
        FeePayBuyer => "(buyer pays)",
        FeePaySeller => "(seller pays)",
        FeeSplit => "(split)",
        Empty => "Nothing here yet.",
        PageHeader => "Requests, page {0} of {1}:",
        Unavailable => "Request #{0} is already being handled by someone else.",
        OwnRequest => "This is your own request.",
        RequestGone => "Request #{0} no longer exists.",
        DealStartedTaker => "You took request #{0}. Contact @{1} to agree on the details.\n\n{2}",
        DealStartedOwner => "@{0} took your request #{1}. Contact them to agree on the details.",
        BtnDealDone => "Deal done",
        BtnDealCancel => "Cancel deal",
        DealDone => "Deal on request #{0} is complete; the request was removed.",
        DealCancelled => "Deal on request #{0} was cancelled; the request is open again.",
        DealNotFound => "You have no active deal on request #{0}.",
        ActiveDeals => "Active deals: {0}",
        MyRequestsHeader => "Your requests:",
        BtnDelete => "Delete #{0}",
        BtnEdit => "Edit #{0}",
        Deleted => "Request #{0} deleted.",
        NotYours => "Request #{0} is not yours.",
        AskVoteTarget => "Enter the username of the person you trust:",
        Voted => "Your vote for @{0} was recorded.",
        AlreadyVoted => "You already voted for @{0}.",
        VoteLimit => "You can back at most {0} people. Remove a vote first.",
        VoteSelf => "You cannot vote for yourself.",
        VoteUnknownUser => "@{0} is not registered.",
        MyVotesHeader => "You voted for:",
        BtnUnvote => "Remove @{0}",
        Unvoted => "Your vote for @{0} was removed.",
        EscrowLine => "@{0} - <b>{1}</b>",
        NotificationsOn => "You will be notified about new requests.",
        NotificationsOff => "Notifications are off.",
        AskLanguage => "Choose your language:",
        LanguageSet => "Language set.",
        NewRequestNotice => "New request:\n\n{0}",
        AdminMenu => "Moderation:",
        BtnAdminDelete => "Delete a request",
        BtnAdminBlock => "Block a request owner",
        AskAdminTarget => "Enter the request number:",
        AdminDeleted => "Request #{0} was deleted.",
        AdminBlocked => "Request #{0} was deleted and @{1} was blacklisted.",
        AdminNotFound => "Request #{0} not found.",
        NotAdmin => "This is only available to administrators.",
        Blacklisted => "You are in the blacklist!",
        NeedHandle => "Set your username in your profile first, please.",
        AlreadyRegistered => "@{0} is already registered.",
        Registered => "@{0} has been registered.",
        UserDeleted => "User @{0} was deleted.",
        UserNotRegistered => "User @{0} is not registered.",
        UnregisterUsage => "Please use <b>/unregister username</b>",
        BlockUsage => "Please use <b>/blockbyreqid request-number</b>",
        Stats => "users: {0}\nwith notifications: {1}",
        MasterChatSet => "Done",
        MasterChatAlreadySet => "This chat is already the master chat.",
        AddAssetUsage => "Please use <b>/addasset NAME</b> (letters and digits, up to 16).",
        AssetAdded => "{0} was added to the currency list.",
        AssetKnown => "{0} is already in the currency list.",
    }
}

fn ru(key: Key) -> &'static str {
    use Key::*;
    match key {
        MainMenu => "Что вы хотите сделать?",
        Usage => "<b>Использование:</b>\n/start - начало процесса",
        BtnNewRequest => "Новая заявка",
        BtnBrowse => "Все заявки",
        BtnMyRequests => "Мои заявки",
        BtnVote => "Голосовать за гаранта",
        BtnMyVotes => "Мои голоса",
        BtnEscrow => "Список гарантов",
        BtnNotifyOn => "Включить уведомления",
        BtnNotifyOff => "Выключить уведомления",
        BtnLanguage => "Язык",
        Buy => "Купить",
        Sell => "Продать",
        AskDirection => "Вы хотите купить или продать?",
        AskQuantity => "Введите сумму (целое число):",
        AskCurrency => "Выберите валюту:",
        AskBank => "Введите название банка:",
        AskFee => "Введите комиссию в процентах. Положительная: платит покупатель, отрицательная: продавец, 0: пополам.",
        AskDates => "Введите срок действия в виде дд.мм.гггг-дд.мм.гггг или только дату начала:",
        AskEndDate => "Дата начала {0}. Теперь введите дату окончания (дд.мм.гггг):",
        ConfirmRequest => "Опубликовать заявку?\n\n{0}",
        BtnPublish => "Опубликовать",
        BtnCancel => "Отмена",
        Published => "Заявка #{0} опубликована.",
        Updated => "Заявка #{0} обновлена.",
        UpdateFailed => "Не удалось обновить заявку #{0}.",
        Cancelled => "Отменено.",
        InvalidQuantity => "Сумма должна быть положительным целым числом.",
        UnknownCurrency => "Неизвестная валюта {0}. Выберите одну из кнопок.",
        InvalidBank => "Название банка должно быть от 1 до 64 символов.",
        InvalidFee => "Комиссия должна быть числом от -100 до 100.",
        InvalidDate => "Даты вводятся в виде 31.12.2030.",
        EndBeforeStart => "Дата окончания раньше даты начала.",
        EndInPast => "Дата окончания уже прошла.",
        InvalidHandle => "Это не похоже на никнейм.",
        InvalidRequestId => "Это не номер заявки.",
        RequestTemplate => "<b>#{0}</b> @{1} {2} <b>{3} {4}</b>\nКомиссия: {5}% {6}\nБанк: {7}\nСрок: {8} - {9}",
        FeePayBuyer => "(платит покупатель)",
        FeePaySeller => "(платит продавец)",
        FeeSplit => "(пополам)",
        Empty => "Пока пусто.",
        PageHeader => "Заявки, страница {0} из {1}:",
        Unavailable => "Заявкой #{0} уже занимается другой участник.",
        OwnRequest => "Это ваша собственная заявка.",
        RequestGone => "Заявки #{0} больше нет.",
        DealStartedTaker => "Вы взяли заявку #{0}. Свяжитесь с @{1}, чтобы обсудить детали.\n\n{2}",
        DealStartedOwner => "@{0} взял вашу заявку #{1}. Свяжитесь с ним, чтобы обсудить детали.",
        BtnDealDone => "Сделка завершена",
        BtnDealCancel => "Отменить сделку",
        DealDone => "Сделка по заявке #{0} завершена, заявка удалена.",
        DealCancelled => "Сделка по заявке #{0} отменена, заявка снова доступна.",
        DealNotFound => "У вас нет активной сделки по заявке #{0}.",
        ActiveDeals => "Активные сделки: {0}",
        MyRequestsHeader => "Ваши заявки:",
        BtnDelete => "Удалить #{0}",
        BtnEdit => "Изменить #{0}",
        Deleted => "Заявка #{0} удалена.",
        NotYours => "Заявка #{0} не ваша.",
        AskVoteTarget => "Введите никнейм человека, которому вы доверяете:",
        Voted => "Ваш голос за @{0} учтён.",
        AlreadyVoted => "Вы уже голосовали за @{0}.",
        VoteLimit => "Можно поддержать не больше {0} человек. Сначала снимите голос.",
        VoteSelf => "Нельзя голосовать за себя.",
        VoteUnknownUser => "@{0} не зарегистрирован.",
        MyVotesHeader => "Вы голосовали за:",
        BtnUnvote => "Снять @{0}",
        Unvoted => "Ваш голос за @{0} снят.",
        EscrowLine => "@{0} - <b>{1}</b>",
        NotificationsOn => "Вы будете получать уведомления о новых заявках.",
        NotificationsOff => "Уведомления выключены.",
        AskLanguage => "Выберите язык:",
        LanguageSet => "Язык установлен.",
        NewRequestNotice => "Новая заявка:\n\n{0}",
        AdminMenu => "Модерация:",
        BtnAdminDelete => "Удалить заявку",
        BtnAdminBlock => "Заблокировать автора заявки",
        AskAdminTarget => "Введите номер заявки:",
        AdminDeleted => "Заявка #{0} удалена.",
        AdminBlocked => "Заявка #{0} удалена, @{1} добавлен в черный список.",
        AdminNotFound => "Заявка #{0} не найдена.",
        NotAdmin => "Доступно только администраторам.",
        Blacklisted => "Вы в черном списке!",
        NeedHandle => "Установите сначала никнейм в профиле, пожалуйста.",
        AlreadyRegistered => "@{0} уже зарегистрирован.",
        Registered => "@{0} зарегистрирован.",
        UserDeleted => "Пользователь @{0} удален.",
        UserNotRegistered => "Пользователь @{0} не зарегистрирован.",
        UnregisterUsage => "Введите пожалуйста команду в виде <b>/unregister никнейм</b>",
        BlockUsage => "Введите пожалуйста команду в виде <b>/blockbyreqid номер-заявки</b>",
        Stats => "пользователей: {0}\nс уведомлениями: {1}",
        MasterChatSet => "Готово",
        MasterChatAlreadySet => "Этот чат уже назначен мастер-чатом.",
        AddAssetUsage => "Введите пожалуйста команду в виде <b>/addasset НАЗВАНИЕ</b> (буквы и цифры, до 16).",
        AssetAdded => "{0} добавлена в список валют.",
        AssetKnown => "{0} уже есть в списке валют.",
    }
}

/// Template lookup plus per-user language resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct Localizer {
    default: Language,
}

impl Localizer {
    pub fn new(default: Language) -> Self {
        Self { default }
    }

    /// The user's stored language. Unregistered handles get the default
    /// without anything being persisted; store errors fall back to it too.
    pub fn language(&self, db: &Database, handle: &str) -> Language {
        let resolved = db.is_user_registered(handle).and_then(|registered| {
            if registered {
                db.user_language(handle, self.default)
            } else {
                Ok(self.default)
            }
        });
        resolved.unwrap_or_else(|e| {
            warn!("Language lookup for {} failed: {}", handle, e);
            self.default
        })
    }

    pub fn text(&self, language: Language, key: Key, args: &[&str]) -> String {
        let template = match language {
            Language::En => en(key),
            Language::Ru => ru(key),
        };
        substitute(template, args)
    }

    /// Resolves `handle`'s language and renders `key`.
    pub fn translate(&self, db: &Database, handle: &str, key: Key, args: &[&str]) -> String {
        self.text(self.language(db, handle), key, args)
    }

    /// Both catalogs, one after the other, for people we cannot identify.
    pub fn bilingual(&self, key: Key) -> String {
        format!("{}\n{}", ru(key), en(key))
    }

    pub fn render_request(&self, language: Language, req: &TradeRequest) -> String {
        let direction = match req.direction {
            Direction::Buy => self.text(language, Key::Buy, &[]),
            Direction::Sell => self.text(language, Key::Sell, &[]),
        }
        .to_lowercase();

        let payer = if req.fee > 0.0 {
            Key::FeePayBuyer
        } else if req.fee < 0.0 {
            Key::FeePaySeller
        } else {
            Key::FeeSplit
        };

        let id = req.id.to_string();
        let owner = escape_html(&req.owner);
        let quantity = req.quantity.to_string();
        let currency = escape_html(&req.currency);
        let fee = req.fee.to_string();
        let payer = self.text(language, payer, &[]);
        let bank = escape_html(&req.bank);
        let start = req.start_date.format(DATE_FORMAT).to_string();
        let end = req.end_date.format(DATE_FORMAT).to_string();

        self.text(
            language,
            Key::RequestTemplate,
            &[
                id.as_str(),
                owner.as_str(),
                direction.as_str(),
                quantity.as_str(),
                currency.as_str(),
                fee.as_str(),
                payer.as_str(),
                bank.as_str(),
                start.as_str(),
                end.as_str(),
            ],
        )
    }
}

/// Fills `{n}` placeholders in one pass over the template. Inserted text is
/// never scanned again; unknown placeholders stay as they are.
fn substitute(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let arg = tail
            .find('}')
            .and_then(|close| tail[..close].parse::<usize>().ok().map(|i| (i, close)))
            .and_then(|(i, close)| args.get(i).map(|arg| (*arg, close)));
        match arg {
            Some((arg, close)) => {
                out.push_str(arg);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn substitutes_positional_args() {
        let l = Localizer::new(Language::En);
        assert_eq!(l.text(Language::En, Key::Voted, &["bob"]), "Your vote for @bob was recorded.");
        assert_eq!(l.text(Language::En, Key::Stats, &["3", "1"]), "users: 3\nwith notifications: 1");
    }

    #[test]
    fn unregistered_users_get_the_default() {
        let db = Database::open_in_memory().unwrap();
        let l = Localizer::new(Language::En);
        assert_eq!(l.language(&db, "stranger"), Language::En);

        db.add_user("alice").unwrap();
        db.set_user_language("alice", Language::Ru).unwrap();
        assert_eq!(l.language(&db, "alice"), Language::Ru);
    }

    #[test]
    fn renders_request_with_escaped_text() {
        let l = Localizer::new(Language::En);
        let req = TradeRequest {
            id: 7,
            owner: "alice".into(),
            direction: Direction::Sell,
            quantity: 100,
            currency: "USD".into(),
            bank: "<Chase>".into(),
            fee: -1.5,
            start_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2030, 2, 1).unwrap(),
        };
        let text = l.render_request(Language::En, &req);
        assert!(text.contains("#7"));
        assert!(text.contains("sell"));
        assert!(text.contains("&lt;Chase&gt;"));
        assert!(text.contains("(seller pays)"));
        assert!(text.contains("01.01.2030 - 01.02.2030"));
    }

    #[test]
    fn placeholder_shaped_user_text_is_kept_verbatim() {
        let l = Localizer::new(Language::En);
        let req = TradeRequest {
            id: 3,
            owner: "alice".into(),
            direction: Direction::Buy,
            quantity: 5,
            currency: "EUR".into(),
            bank: "Bank {9}".into(),
            fee: 0.0,
            start_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2030, 2, 1).unwrap(),
        };
        let rendered = l.render_request(Language::En, &req);
        assert!(rendered.contains("Bank {9}"), "{}", rendered);

        let notice = l.text(Language::En, Key::NewRequestNotice, &[&rendered]);
        assert!(notice.contains("Bank {9}"), "{}", notice);
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        assert_eq!(substitute("{0} and {1} {x} {", &["a {1}"]), "a {1} and {1} {x} {");
    }
}
