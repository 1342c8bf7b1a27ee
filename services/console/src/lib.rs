//! Parley Console Library Crate
//!
//! Argument parsing, settings and the command language of the interactive
//! console. The `parley` binary is a thin wrapper around this library.

pub mod commands;
pub mod config;
