//! Shared types for the FlowMint execution engine.
//!
//! Every service crate depends on this one; it holds the domain model
//! (intents, job locks, oracle prices, receipts), the engine event set,
//! and the injectable clock used to keep timing deterministic in tests.

pub mod clock;
pub mod events;
pub mod fees;
pub mod intent;
pub mod lock;
pub mod oracle;
pub mod receipt;

pub use clock::*;
pub use events::*;
pub use fees::*;
pub use intent::*;
pub use lock::*;
pub use oracle::*;
pub use receipt::*;

/// User wallet key (base58).
pub type UserKey = String;

/// SPL token mint address (base58).
pub type TokenMint = String;

/// Price feed identifier (hex, provider-specific).
pub type FeedId = String;

/// Basis points (100 = 1%).
pub type Bps = u16;

/// Unix timestamp in milliseconds.
pub type TimestampMs = u64;
