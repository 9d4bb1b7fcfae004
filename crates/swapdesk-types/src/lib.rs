pub mod events;
pub mod models;

pub use events::{Button, ChatKind, InboundEvent, Markup, OutgoingMessage, Payload, TextFormat};
pub use models::{
    Direction, EscrowEntry, Language, NewTradeRequest, ProcessingLock, TradeRequest, UsageStats,
};
