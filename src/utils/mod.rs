pub mod clock;
pub mod log_throttle;
pub mod logger;
pub mod scheduled_task;
