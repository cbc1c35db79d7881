//! Core domain layer. No external I/O dependencies.
//!
//! Entities and business rules live here. Dependencies flow inward.

pub mod entities;
pub mod errors;
pub mod signature;

pub use entities::{
    BlockKey, ConnectionStats, ControlButton, FileDescriptor, LocationHandle, MediaEvent,
    PlayerCommand, BLOCK_SIZE,
};
pub use errors::DomainError;
pub use signature::{descriptor_hash, short_hash, verify_hash, DEFAULT_HASH_LENGTH};
