//! mocopi-tracker - Headless mocopi motion-capture receiver
//!
//! Receives skeleton data from mocopi over UDP and turns it into tracked
//! target transforms:
//! - Binary skeleton definition and frame packets, one receiver per endpoint
//!   shared by every consumer listening there
//! - Hierarchical, root-relative or world-space pose resolution
//! - Bone to target mappings with position and rotation offsets
//! - Session recording to JSON and fixed-rate playback

pub mod config;
pub mod error;
pub mod recording;
pub mod skeleton;
pub mod tracker;
pub mod transport;

pub use config::Config;
pub use error::{Result, TrackerError};
pub use tracker::{SkeletonObserver, TickReport, Tracker, TrackerMode};
pub use transport::ReceiverRegistry;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
