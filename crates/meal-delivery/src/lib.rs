//! Delivery lifecycle, roster records, and role gating.
//!
//! [`DeliveryEngine`] owns the create/update/list operations on deliveries;
//! [`Roster`] owns patient and diet-chart records. Both persist through a
//! shared [`meal_db::Store`] and announce every successful mutation on a
//! shared [`meal_fanout::FanOut`] exactly once.

pub mod access;
mod engine;
mod error;
mod retry;
mod roster;

pub use engine::{parse_id, parse_meal_type, parse_status, DeliveryEngine, StatusPolicy};
pub use error::{DeliveryError, DeliveryResult, ErrorKind};
pub use retry::RetryPolicy;
pub use roster::Roster;
