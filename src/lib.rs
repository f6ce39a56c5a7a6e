pub mod app;
pub mod cli;
pub mod config;
pub mod console;
pub mod inspect;
pub mod pmtu;
pub mod sim;
pub mod stats;
pub mod table;
pub mod transport;
