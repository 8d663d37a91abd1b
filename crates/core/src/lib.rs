//! `intake-core`: record model shared by the investor and client services,
//! plus the contracts signed between them.
//!
//! This crate contains **pure** data types (no IO, no async).

pub mod contract;
pub mod entity;
pub mod error;
pub mod id;
pub mod token;

pub use contract::{
    Contract, ContractBody, ContractFilter, ContractStage, NewContract, OfferAcceptance,
};
pub use entity::{Entity, EntityDraft, EntityKind};
pub use error::{DomainError, DomainResult};
pub use id::RecordId;
pub use token::{NewToken, Token};
