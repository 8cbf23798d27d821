//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Request filter: drop scanner paths, add security headers
//! 2. Rate limiter: reject early, save resources
//! 3. Auth validator: bearer session lookup, loads the user
//! 4. Audit logger: logs after auth, has the user id

pub mod audit;
pub mod auth;
pub mod filter;
pub mod rate;
