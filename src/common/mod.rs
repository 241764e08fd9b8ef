//! Shared configuration and helpers used across the simulator.
//!
//! - `settings`: `NetworkSettings` loading and validation
//! - `address`: MAC / IPv6 derivation and predicates
//! - `encoding`: float ⇄ bit-string packing for beacon payloads

pub mod address;
pub mod encoding;
pub mod settings;
