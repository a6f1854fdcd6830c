pub mod config;
pub mod tftp;
