//! The two fixed-size worker pools of the server.
//!
//! - [`SessionPool`] runs one long-lived thread per session slot. Each thread pulls
//! connections from the admission queue and serves them one at a time.
//! - [`JobPool`] is a [`Rayon`] pool running the claim loops of the job dispatcher.
//!
//! [`Rayon`]: https://docs.rs/rayon/latest/rayon/index.html
mod job_pool;
mod session_pool;

pub use self::job_pool::JobPool;
pub use self::session_pool::SessionPool;
