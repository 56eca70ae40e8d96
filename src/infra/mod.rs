pub mod cache;
pub mod db;
pub mod list_store;
pub mod memory;
