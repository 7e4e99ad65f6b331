pub mod api;
pub mod config;
pub mod display;
pub mod domain;
pub mod error;
pub mod hardware;
pub mod input_fuser;
pub mod logging;
pub mod modes;
pub mod retry;
pub mod session;
