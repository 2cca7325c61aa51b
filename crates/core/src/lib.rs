//! `forgecost-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the inventory and
//! manufacturing costing crates (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult, ensure_non_negative, ensure_positive};
pub use id::{AggregateId, TenantId};
pub use value_object::ValueObject;
