//! Database module: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: typed view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into models.
//!
//! External modules should import from `watchlist_notifier::db`; the
//! repository API and the view models are re-exported for convenience.

pub mod model;
pub mod repo;

pub use model::{ItemUpdate, UserRecord, WatchlistEntry};
pub use repo::*;
