use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

/// Applied in order; each one exactly once, tracked in `schema_version`.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial schema",
        sql: "
            CREATE TABLE IF NOT EXISTS requests (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                username    TEXT NOT NULL,
                direction   INTEGER NOT NULL,
                quantity    INTEGER NOT NULL,
                currency    TEXT NOT NULL,
                bank_name   TEXT NOT NULL,
                fee         REAL NOT NULL,
                start_date  TEXT NOT NULL,
                end_date    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notifications (
                username    TEXT NOT NULL,
                chat_id     INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS masterchat (chat_id INTEGER NOT NULL);

            CREATE TABLE IF NOT EXISTS users (username TEXT NOT NULL);

            CREATE TABLE IF NOT EXISTS users_votes (
                username    TEXT NOT NULL,
                voted_user  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users_languages (
                username    TEXT NOT NULL,
                language    INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS assets (asset_name TEXT NOT NULL);

            CREATE TABLE IF NOT EXISTS additional_assets (asset_name TEXT NOT NULL);

            CREATE TABLE IF NOT EXISTS processing_requests (
                request_id  INTEGER NOT NULL,
                seller      TEXT NOT NULL,
                buyer       TEXT NOT NULL
            );
        ",
    },
    Migration {
        version: 2,
        description: "users.chat_id",
        sql: "ALTER TABLE users ADD COLUMN chat_id INTEGER;",
    },
    Migration {
        version: 3,
        description: "blacklist",
        sql: "
            CREATE TABLE IF NOT EXISTS users_blacklist (user_id INTEGER NOT NULL, UNIQUE(user_id));
            ALTER TABLE users ADD COLUMN user_id INTEGER NOT NULL DEFAULT 0;
        ",
    },
    Migration {
        version: 4,
        description: "integrity indexes",
        sql: "
            CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username ON users(username);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_username ON notifications(username);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_processing_request ON processing_requests(request_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_users_languages_username ON users_languages(username);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_additional_assets_name ON additional_assets(asset_name);
            CREATE INDEX IF NOT EXISTS idx_requests_owner ON requests(username);
            CREATE INDEX IF NOT EXISTS idx_requests_end_date ON requests(end_date);
            CREATE INDEX IF NOT EXISTS idx_votes_voter ON users_votes(username);
            CREATE INDEX IF NOT EXISTS idx_votes_target ON users_votes(voted_user);
        ",
    },
];

pub fn latest_version() -> i64 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

pub fn current_version(conn: &Connection) -> Result<i64> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version = current_version(conn)?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > version) {
        info!("DB: running migration v{} ({})", migration.version, migration.description);
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )?;
        tx.commit()?;
    }

    info!("Database migrations complete (schema v{})", latest_version());
    Ok(())
}
