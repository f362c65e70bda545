pub mod sweep;
pub mod timeout;

pub use timeout::TimeoutScheduler;
