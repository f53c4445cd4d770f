//! Operator Interface (spec §4.13): the local control surface an operator
//! uses to reset, pin, or inspect a running agent.

pub mod rate_limit;
pub mod socket;

pub use rate_limit::{OperatorRateLimiter, RateLimitConfig};
pub use socket::{run_operator_processor, run_operator_socket, OperatorCall, OperatorError, OperatorSender};
