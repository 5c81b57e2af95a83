//! CLI Commands

pub mod identity;
pub mod init;
pub mod network;
