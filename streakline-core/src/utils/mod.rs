pub mod period;
pub mod poll_interval;
