pub mod age_screen;
pub mod annotate;
pub mod artifact;
pub mod backends;
pub mod config;
pub mod error;
pub mod forward;
pub mod gatekeeper;
pub mod io_struct;
pub mod region_screen;
pub mod server;
pub mod vision;
