use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::clock::{Clock, SystemClock};
use crate::config::ScheduleConfig;
use crate::models::AppointmentRow;

/// Handle the request layer threads through every engine call. Cloning is
/// cheap; the pool and channel are shared.
#[derive(Clone)]
pub struct Scheduler {
    pub db: SqlitePool,
    pub config: ScheduleConfig,
    pub clock: Arc<dyn Clock>,
    pub events: broadcast::Sender<Notification>,
}

impl Scheduler {
    pub fn new(db: SqlitePool, config: ScheduleConfig) -> Self {
        Self::with_clock(db, config, Arc::new(SystemClock))
    }

    pub fn with_clock(db: SqlitePool, config: ScheduleConfig, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            db,
            config,
            clock,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    /// Fire-and-forget; delivery is the notification collaborator's problem.
    pub fn notify(&self, notification: Notification) {
        let _ = self.events.send(notification);
    }
}

/// Plain data handed to the notification collaborator. Never retried or
/// confirmed by the engine.
#[derive(Clone, Debug, Serialize)]
pub struct Notification {
    pub user_id: Option<String>,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub appointment_id: Option<String>,
    pub data: Value,
}

impl Notification {
    pub fn for_appointment(kind: &str, row: &AppointmentRow, title: &str, message: &str) -> Self {
        Self {
            user_id: row.customer_id.clone(),
            title: title.to_string(),
            message: message.to_string(),
            kind: kind.to_string(),
            appointment_id: Some(row.id.clone()),
            data: serde_json::json!({
                "barber_id": row.barber_id,
                "appointment_date": row.appointment_date,
                "status": row.status,
            }),
        }
    }
}
