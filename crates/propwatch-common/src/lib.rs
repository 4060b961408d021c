//! Identifiers and record types shared by every propwatch crate.
//!
//! The four record families ([`types::AlertRule`], [`types::AlertInstance`],
//! [`types::MessageTemplate`], [`types::DeliveryLog`]) are independently keyed
//! and carry no cross-record cascade semantics.

pub mod id;
pub mod types;
