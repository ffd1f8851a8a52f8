//! Paced execution server for a small stack/register machine.
//!
//! Provides the assembler and single-step virtual machine, the session
//! controller that streams execution to clients, and its transports.

pub mod config;
pub mod network;
pub mod utils;
pub mod virtual_machine;
