//! Live notification fan-out for dashboard clients.
//!
//! [`FanOut`] owns one `tokio::sync::broadcast` channel and a registry of
//! connected sessions. Every mutation in the delivery engine and roster ends
//! with a single [`FanOut::publish`]; each connected [`Session`] sees events
//! in publish order. Late joiners get no replay and fetch a baseline instead
//! (see [`view::DashboardView`]).

mod bus;
pub mod view;

pub use bus::{BusMsg, FanOut, Session, SessionId, SessionInfo, SessionStream};
