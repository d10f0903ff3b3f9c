//! Gateway protocol bridge for LoRaWAN networks.
//!
//! Gateways speak the Semtech packet forwarder protocol over UDP; network
//! components exchange the composable binary packets of [`core`]. This crate
//! owns the boundary between the two.

pub mod config;
pub mod core;
pub mod encoding;
pub mod error;
pub mod lorawan;
pub mod semtech;
pub mod udp;

pub use error::{Error, ErrorKind, Result};
