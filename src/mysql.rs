//! MySQL backend for the relational store.

mod client;
mod store;

pub use client::new_mysql_pool;
pub use store::MySqlStore;
