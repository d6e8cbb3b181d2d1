//! `tanknet_client`
//!
//! Client-side netcode for the tank game:
//! - Session and presence management, host election
//! - Prediction, reconciliation and smoothing of remote tanks
//! - A main-thread dispatch queue fed by transport callbacks
//! - The relay transport seam plus an in-process loopback relay
//! - A fixed-tick client driver tying them together

pub mod client;
pub mod dispatch;
pub mod input;
pub mod predictor;
pub mod session;
pub mod transport;

pub use client::{TankClient, TickReport};
pub use dispatch::{DispatchHandle, DispatchQueue};
pub use predictor::EntityPredictor;
pub use session::{SessionEvent, SessionManager};
pub use transport::{LoopbackHub, LoopbackTransport, MatchTransport};
