//! Core of a dual-queue coupled AQM (DualPI2) and the congestion response of
//! the senders sharing it.
//!
//! The crate is synchronous and owns no clock: an embedding event loop calls
//! [`DualQueue::submit`](queue::DualQueue::submit) or
//! [`DualQueue::enqueue`](queue::DualQueue::enqueue) on arrivals,
//! [`DualQueue::on_link_ready`](queue::DualQueue::on_link_ready) whenever the
//! link can transmit, and feeds the resulting marks and drops to a
//! [`SenderTable`](sender::SenderTable), always with the current simulation
//! time.
pub mod aqm;
pub mod classifier;
#[cfg(feature = "serde")]
pub mod config;
pub mod error;
pub mod packet;
pub mod queue;
pub mod scheduler;
pub mod sender;
pub mod telemetry;
pub mod time;
pub mod utils;

pub use error::{Error, Result};
pub use time::SimTime;
