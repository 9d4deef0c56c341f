//! vidpace - frame grabbing demo with an adaptive frame-rate controller.
//!
//! A single control loop grabs frames, optionally runs an image effect,
//! renders an overlay and paces itself to a maximum rate. When the loop
//! falls behind, the controller lowers the capture resolution or asks the
//! resource manager for more CPUs.

pub mod capture;
pub mod config;
pub mod core_logic;
pub mod effects;
pub mod error;
pub mod fps_monitor;
pub mod ipc_server;
pub mod logging;
pub mod metrics;
pub mod pacer;
pub mod pipeline;
pub mod render;
pub mod resolution;
pub mod scheduler;
