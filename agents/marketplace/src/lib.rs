//! The ArkPunks marketplace agent.
//!
//! One process arbitrates the punk marketplace: it keeps the canonical
//! ownership registry, verifies escrow deposits against the Ark wallet,
//! runs the atomic ownership-and-payment swap, and serves the HTTP surface
//! wallets and the gallery talk to.

pub mod audit;
pub mod error;
pub mod escrow;
pub mod handlers;
pub mod locks;
pub mod registry;
pub mod router;
pub mod settings;
pub mod signer;
pub mod state;
pub mod store;

pub use error::Error;
pub use router::create as create_router;
pub use settings::Settings;
pub use state::AppState;
