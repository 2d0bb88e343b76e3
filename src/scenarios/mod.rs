//! Scenarios built on the lifecycle
//!
//! - [`tcp_echo`]: a TCP echo service exposed on a public cluster and
//!   exercised from both sides of a site link

pub mod tcp_echo;

pub use tcp_echo::TcpEcho;
