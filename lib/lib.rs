pub mod build_info;
pub mod cli;
pub mod config;
pub mod hn_client;
pub mod logging;
pub mod pager;
pub mod search;
pub mod server;
pub mod state;
pub mod types;
