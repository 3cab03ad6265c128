pub mod cache;
pub mod client;
pub mod commands;
pub mod connection;
pub mod modbus;
pub mod output;
pub mod registers;
pub mod schema;
pub mod units;
