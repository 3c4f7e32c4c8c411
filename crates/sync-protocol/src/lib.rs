//! HTTP transport, account/device endpoints, and the connect handshake.
//! Built on top of `sync-core`'s error taxonomy, domain types, and sync
//! queue.

pub mod account_manager;
pub mod client;
pub mod connect;
pub mod facade;
pub mod types;

pub use account_manager::AccountManager;
pub use client::SyncClient;
pub use connect::ConnectBroker;
pub use facade::Facade;
