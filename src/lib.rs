#![allow(clippy::new_without_default)]

pub mod bridge;
pub mod config;
pub mod db;
pub mod delivery;
pub mod liveness;
pub mod logger;
pub mod notification_listing;
pub mod scheduler;
pub mod timezone;


/// Shared state handed to the scheduler and its collaborators.
///
/// Every subsystem receives this explicitly; nothing lives in process-global
/// state. The sender slot is the one mutable member, written once by the
/// chat-client connector task and read by the scheduler.
pub struct Context {
    pub db: db::Pool,
    pub sender: bridge::SenderSlot,
    pub config: config::Config,
}
