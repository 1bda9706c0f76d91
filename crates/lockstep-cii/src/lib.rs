//! # lockstep-cii: the content identification protocol
//!
//! A WebSocket protocol pushing a television's content identification and
//! other state ([`lockstep_wire::Cii`]) to companion devices.
//!
//! The [`CiiServer`] holds the authoritative state. Each client receives
//! the full state on connect; afterwards [`CiiServer::update_clients`]
//! pushes each client the diff between what it was last sent and the
//! current state (always accompanying a changed `contentId` with
//! `contentIdStatus`).
//!
//! The [`CiiClient`] maintains a mirror of the server state and notifies an
//! observer of each field that changed.

mod client;
mod server;

pub use client::{CiiClient, CiiClientObserver};
pub use server::CiiServer;
