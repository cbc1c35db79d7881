//! File-system persistence adapters.

pub mod users_json;

pub use users_json::UsersJson;
