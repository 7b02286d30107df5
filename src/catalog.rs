use sqlx::SqlitePool;

use crate::config::ScheduleConfig;
use crate::error::ScheduleError;

/// Durations resolved from the catalog; `None` marks a selection the catalog
/// does not know, which falls back to a default length.
pub fn total_minutes(
    services: &[Option<i64>],
    add_ons: &[Option<i64>],
    config: &ScheduleConfig,
) -> i64 {
    let service_total: i64 = services
        .iter()
        .map(|d| d.unwrap_or(config.default_service_minutes as i64))
        .sum();
    let add_on_total: i64 = add_ons
        .iter()
        .map(|d| d.unwrap_or(config.default_add_on_minutes as i64))
        .sum();

    let total = service_total + add_on_total;
    if total <= 0 {
        config.default_service_minutes as i64
    } else {
        total
    }
}

pub async fn resolve_duration(
    pool: &SqlitePool,
    config: &ScheduleConfig,
    service_ids: &[String],
    add_on_ids: &[String],
) -> Result<i64, ScheduleError> {
    let mut services = Vec::with_capacity(service_ids.len());
    for id in service_ids {
        services.push(lookup(pool, "services", id).await?);
    }
    let mut add_ons = Vec::with_capacity(add_on_ids.len());
    for id in add_on_ids {
        add_ons.push(lookup(pool, "add_ons", id).await?);
    }
    Ok(total_minutes(&services, &add_ons, config))
}

pub async fn resolve_price(
    pool: &SqlitePool,
    service_ids: &[String],
    add_on_ids: &[String],
) -> Result<f64, ScheduleError> {
    let mut total = 0.0;
    for id in service_ids {
        total += sqlx::query_scalar::<_, f64>("SELECT price FROM services WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .unwrap_or(0.0);
    }
    for id in add_on_ids {
        total += sqlx::query_scalar::<_, f64>("SELECT price FROM add_ons WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .unwrap_or(0.0);
    }
    Ok(total)
}

async fn lookup(pool: &SqlitePool, table: &str, id: &str) -> Result<Option<i64>, ScheduleError> {
    let query = match table {
        "services" => "SELECT duration FROM services WHERE id = ?",
        _ => "SELECT duration FROM add_ons WHERE id = ?",
    };
    Ok(sqlx::query_scalar::<_, i64>(query)
        .bind(id)
        .fetch_optional(pool)
        .await?)
}
