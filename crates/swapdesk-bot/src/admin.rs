use anyhow::Result;
use swapdesk_db::Database;
use swapdesk_types::OutgoingMessage;
use tracing::info;

use crate::conversation::escrow_lines;
use crate::i18n::{Key, Localizer, escape_html};
use crate::input;

/// How many requests `/list` shows, and how many go into one message.
const LIST_LIMIT: usize = 50;
const LIST_BATCH: usize = 10;

/// Commands understood in group chats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupCommand {
    SetMasterChat,
    List,
    Register,
    Unregister(Option<String>),
    EscrowList,
    Stats,
    BlockByRequest(Option<String>),
    AddAsset(Option<String>),
}

impl GroupCommand {
    /// Parses `/name[@bot] [argument]`. Anything else is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (head, arg) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, Some(rest.trim()).filter(|r| !r.is_empty())),
            None => (text, None),
        };
        let name = head.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        let arg = arg.map(str::to_string);

        match name.to_ascii_lowercase().as_str() {
            "setmasterchat" => Some(GroupCommand::SetMasterChat),
            "list" => Some(GroupCommand::List),
            "register" => Some(GroupCommand::Register),
            "unregister" => Some(GroupCommand::Unregister(arg)),
            "escrowlist" => Some(GroupCommand::EscrowList),
            "stats" => Some(GroupCommand::Stats),
            "blockbyreqid" => Some(GroupCommand::BlockByRequest(arg)),
            "addasset" => Some(GroupCommand::AddAsset(arg)),
            _ => None,
        }
    }

    /// Only administrators of the master chat may run these.
    pub fn requires_admin(&self) -> bool {
        !matches!(
            self,
            GroupCommand::SetMasterChat | GroupCommand::Register | GroupCommand::EscrowList
        )
    }
}

/// Facts the dispatcher gathered before the command runs.
pub struct GroupContext<'a> {
    pub db: &'a Database,
    pub i18n: &'a Localizer,
    pub chat_id: i64,
    pub sender: &'a str,
    pub master_chat: Option<i64>,
    /// For `/setmasterchat` in an unclaimed group: admin of this group.
    /// Otherwise: admin of the master chat.
    pub sender_is_admin: bool,
}

/// What a group command produced.
#[derive(Debug, Default)]
pub struct GroupReply {
    pub messages: Vec<OutgoingMessage>,
    /// Handle deleted by `/unregister` or `/blockbyreqid`.
    pub removed_user: Option<String>,
}

/// Runs one group command. Unauthorized callers get no reply at all.
pub fn run_group_command(ctx: &GroupContext<'_>, command: &GroupCommand) -> Result<GroupReply> {
    if command.requires_admin() && (ctx.master_chat.is_none() || !ctx.sender_is_admin) {
        return Ok(GroupReply::default());
    }

    let mut removed_user = None;
    let lang = ctx.i18n.language(ctx.db, ctx.sender);
    let sender = escape_html(ctx.sender);
    let reply = |key: Key, args: &[&str]| vec![OutgoingMessage::html(ctx.chat_id, ctx.i18n.text(lang, key, args))];

    let messages = match command {
        GroupCommand::SetMasterChat => match ctx.master_chat {
            Some(master) if master == ctx.chat_id => reply(Key::MasterChatAlreadySet, &[]),
            Some(_) => Vec::new(),
            None if !ctx.sender_is_admin => Vec::new(),
            None => {
                if ctx.db.claim_master_chat(ctx.chat_id)? {
                    info!("{} made chat {} the master chat", ctx.sender, ctx.chat_id);
                    reply(Key::MasterChatSet, &[])
                } else {
                    Vec::new()
                }
            }
        },
        GroupCommand::Register => {
            if ctx.master_chat.is_none() {
                Vec::new()
            } else if ctx.db.add_user(ctx.sender)? {
                info!("Registering {}", ctx.sender);
                reply(Key::Registered, &[&sender])
            } else {
                reply(Key::AlreadyRegistered, &[&sender])
            }
        }
        GroupCommand::EscrowList => {
            let lines = escrow_lines(ctx.db, ctx.i18n, lang)?;
            if lines.is_empty() {
                reply(Key::Empty, &[])
            } else {
                vec![OutgoingMessage::html(ctx.chat_id, lines)]
            }
        }
        GroupCommand::List => {
            let requests = ctx.db.list_requests(0, LIST_LIMIT)?;
            if requests.is_empty() {
                reply(Key::Empty, &[])
            } else {
                requests
                    .chunks(LIST_BATCH)
                    .map(|batch| {
                        let text = batch
                            .iter()
                            .map(|r| ctx.i18n.render_request(lang, r))
                            .collect::<Vec<_>>()
                            .join("\n\n");
                        OutgoingMessage::html(ctx.chat_id, text)
                    })
                    .collect()
            }
        }
        GroupCommand::Unregister(arg) => match arg.as_deref().map(input::parse_handle) {
            Some(Ok(handle)) => {
                if !ctx.db.is_user_registered(&handle)? {
                    reply(Key::UserNotRegistered, &[&handle])
                } else {
                    ctx.db.delete_user(&handle)?;
                    info!("{} unregistered {}", ctx.sender, handle);
                    let messages = reply(Key::UserDeleted, &[&handle]);
                    removed_user = Some(handle);
                    messages
                }
            }
            _ => reply(Key::UnregisterUsage, &[]),
        },
        GroupCommand::Stats => {
            let stats = ctx.db.usage_stats()?;
            reply(
                Key::Stats,
                &[&stats.users.to_string(), &stats.with_notifications.to_string()],
            )
        }
        GroupCommand::BlockByRequest(arg) => match arg.as_deref().map(input::parse_request_id) {
            Some(Ok(id)) => {
                let id_text = id.to_string();
                match ctx.db.blacklist_by_request(id)? {
                    Some(owner) => {
                        info!("{} blocked {} via request {}", ctx.sender, owner, id);
                        let messages = reply(Key::AdminBlocked, &[&id_text, &escape_html(&owner)]);
                        removed_user = Some(owner);
                        messages
                    }
                    None => reply(Key::AdminNotFound, &[&id_text]),
                }
            }
            _ => reply(Key::BlockUsage, &[]),
        },
        GroupCommand::AddAsset(arg) => match arg.as_deref().map(input::parse_asset) {
            Some(Ok(name)) => {
                if ctx.db.add_asset(&name)? {
                    info!("{} added asset {}", ctx.sender, name);
                    reply(Key::AssetAdded, &[&name])
                } else {
                    reply(Key::AssetKnown, &[&name])
                }
            }
            _ => reply(Key::AddAssetUsage, &[]),
        },
    };
    Ok(GroupReply { messages, removed_user })
}
