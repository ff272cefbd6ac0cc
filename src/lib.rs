//! salute: a line-delimited request/response service.
//!
//! Clients register with a salute, issue commands, acknowledge `ok`
//! responses, and leave with a bye:
//! - `codec`: one JSON envelope per line
//! - `interpreter`: interactive text to typed requests
//! - `client`: connect, send loop, background receive loop
//! - `server`: accept loop, per-connection handlers, error sink
//! - `dispatch`: commands against the registry and the problem solvers

pub mod client;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod interpreter;
pub mod liveness;
pub mod model;
pub mod registry;
pub mod server;
pub mod solver;
