//! Plugins for individual backends.
//!
//! Each plugin only knows how to query its backend and describe its graphs;
//! the driver takes care of caching, rate conversion and output.

pub mod aws_billing;
pub mod graphite;
pub mod murmur;
pub mod sigv4;
pub mod uptimerobot;
pub mod xentop;

pub use aws_billing::AwsBillingPlugin;
pub use graphite::GraphitePlugin;
pub use murmur::MurmurPlugin;
pub use uptimerobot::UptimeRobotPlugin;
pub use xentop::XentopPlugin;
