use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Scheduled,
    Confirmed,
    Ongoing,
    Done,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Ongoing => "ongoing",
            AppointmentStatus::Done => "done",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Done | AppointmentStatus::Cancelled)
    }

    /// Statuses that hold capacity: they block a time slot or occupy a queue
    /// position. `confirmed` comes from the upstream accept flow and counts
    /// the same as `scheduled`.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Scheduled | AppointmentStatus::Confirmed | AppointmentStatus::Ongoing
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    Scheduled,
    Queue,
}

impl AppointmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentType::Scheduled => "scheduled",
            AppointmentType::Queue => "queue",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BarberStatus {
    Available,
    Busy,
    Break,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DayOffKind {
    DayOff,
    SickLeave,
    Vacation,
    Emergency,
}

impl DayOffKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayOffKind::DayOff => "day_off",
            DayOffKind::SickLeave => "sick_leave",
            DayOffKind::Vacation => "vacation",
            DayOffKind::Emergency => "emergency",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BarberRow {
    pub id: String,
    pub display_name: String,
    pub status: BarberStatus,
    pub rating: f64,
    pub active: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: String,
    pub barber_id: String,
    pub customer_id: Option<String>,
    pub appointment_date: NaiveDate,
    pub appointment_time: Option<NaiveTime>,
    pub appointment_type: AppointmentType,
    pub queue_position: Option<i64>,
    pub status: AppointmentStatus,
    pub is_urgent: bool,
    pub total_duration: i64,
    pub total_price: f64,
    pub services: String,
    pub add_ons: String,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: NaiveDateTime,
}

impl AppointmentRow {
    pub fn service_ids(&self) -> Vec<String> {
        serde_json::from_str(&self.services).unwrap_or_default()
    }

    pub fn add_on_ids(&self) -> Vec<String> {
        serde_json::from_str(&self.add_ons).unwrap_or_default()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DayOffRow {
    pub id: String,
    pub barber_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub kind: DayOffKind,
    pub reason: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

impl DayOffRow {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CatalogRow {
    pub id: String,
    pub name: String,
    pub duration: i64,
    pub price: f64,
}
