use std::{fs, path::Path, str::FromStr, time::Duration};

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use uuid::Uuid;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// WAL plus a busy timeout so concurrent booking transactions queue on the
/// writer lock instead of failing immediately.
pub async fn connect(db_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    ensure_sqlite_dir(db_url).map_err(sqlx::Error::Io)?;

    let options = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub async fn seed_barber(
    pool: &SqlitePool,
    id: &str,
    display_name: &str,
    rating: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO barbers (id, display_name, status, rating, active, created_at)
           VALUES (?, ?, 'available', ?, 1, ?)
           ON CONFLICT(id) DO NOTHING"#,
    )
    .bind(id)
    .bind(display_name)
    .bind(rating)
    .bind(Utc::now().naive_utc())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn seed_service(
    pool: &SqlitePool,
    id: &str,
    name: &str,
    duration: i64,
    price: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO services (id, name, duration, price)
           VALUES (?, ?, ?, ?)
           ON CONFLICT(id) DO NOTHING"#,
    )
    .bind(id)
    .bind(name)
    .bind(duration)
    .bind(price)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn seed_add_on(
    pool: &SqlitePool,
    id: &str,
    name: &str,
    duration: i64,
    price: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO add_ons (id, name, duration, price)
           VALUES (?, ?, ?, ?)
           ON CONFLICT(id) DO NOTHING"#,
    )
    .bind(id)
    .bind(name)
    .bind(duration)
    .bind(price)
    .execute(pool)
    .await?;
    Ok(())
}
