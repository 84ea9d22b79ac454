pub mod completion_log;
pub mod engine;
pub mod engine_errors;
pub mod notifier;
pub mod queue;
pub mod task;
pub mod worker;
