//! Process-level state
//!
//! The [`Vault`] ties the store, its writer and the maintenance loop
//! together for the lifetime of the process.

mod vault;

pub use vault::{ShutdownReport, Vault};
