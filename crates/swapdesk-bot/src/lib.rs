pub mod admin;
pub mod conversation;
pub mod dispatcher;
pub mod i18n;
pub mod input;
pub mod session;
pub mod sweeper;
pub mod transport;

pub use dispatcher::Dispatcher;
pub use i18n::Localizer;
pub use session::SessionCache;
pub use sweeper::spawn_sweeper;
pub use transport::{ChatTransport, MemoryTransport};
