/// Database row types. Requests map straight onto `swapdesk_types::TradeRequest`;
/// users get their own row because the numeric id and chat id are store-only.
use rusqlite::Row;
use rusqlite::types::Type;
use swapdesk_types::{Direction, TradeRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub username: String,
    /// 0 until the user first writes in a private chat.
    pub user_id: i64,
    pub chat_id: Option<i64>,
}

pub(crate) const REQUEST_COLUMNS: &str =
    "id, username, direction, quantity, currency, bank_name, fee, start_date, end_date";

pub(crate) fn request_from_row(row: &Row<'_>) -> rusqlite::Result<TradeRequest> {
    let code: i64 = row.get(2)?;
    let direction = Direction::from_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Integer,
            format!("unknown direction code {}", code).into(),
        )
    })?;

    Ok(TradeRequest {
        id: row.get(0)?,
        owner: row.get(1)?,
        direction,
        quantity: row.get(3)?,
        currency: row.get(4)?,
        bank: row.get(5)?,
        fee: row.get(6)?,
        start_date: row.get(7)?,
        end_date: row.get(8)?,
    })
}
