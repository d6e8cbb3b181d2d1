//! `tanknet_shared`
//!
//! Shared libraries used by every tank client.
//!
//! Design goals:
//! - Deterministic kinematics, so prediction replays land on the same bits.
//! - A fixed, unversioned packet layout plus an equivalent text form.
//! - Plain data types; no I/O and no threads.
//! - No `unsafe`.

pub mod codec;
pub mod config;
pub mod kinematics;
pub mod math;
pub mod net;
pub mod rolling_average;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::codec::*;
    pub use crate::config::*;
    pub use crate::kinematics::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::rolling_average::*;
}
