//! Appointment scheduling and walk-in queue engine for barbershops.
//!
//! The engine owns the hard part of a booking product: deciding whether a
//! barber can take a booking, turning service selections into a time
//! allocation, keeping per-day walk-in queues dense and ordered, and keeping
//! a barber's day consistent when unavailability is declared. Everything
//! else (UI, notification delivery, auth) lives in the consuming service;
//! the engine hands it plain data over a broadcast channel.

pub mod appointments;
pub mod availability;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod db;
pub mod dayoff;
pub mod error;
pub mod models;
pub mod queue;
pub mod slots;
pub mod state;

pub use availability::{Availability, AvailabilityKind};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::ScheduleConfig;
pub use error::ScheduleError;
pub use models::{
    AppointmentRow, AppointmentStatus, AppointmentType, BarberRow, BarberStatus, DayOffKind,
    DayOffRow,
};
pub use queue::QueueStatus;
pub use slots::{AlternativeBarber, BookingOutcome, BookingRequest, Slot, SlotType};
pub use state::{Notification, Scheduler};
