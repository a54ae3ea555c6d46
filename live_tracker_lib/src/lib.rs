pub mod error;
pub mod position;
pub mod geo_math;
pub mod protocol;
pub mod route;
#[cfg(feature = "osrm")]
pub mod osrm;
pub mod demo_motion;
pub mod task;
pub mod source;
pub mod session;
pub mod relay;
pub mod channel;
pub mod config;
pub mod provider;
pub mod customer;
