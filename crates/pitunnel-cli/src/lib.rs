//! PiTunnel Manager CLI library
//!
//! Configuration handling and the interactive menu, shared by the
//! `pitunnel-manager` binary and its tests.

pub mod config;
pub mod menu;
