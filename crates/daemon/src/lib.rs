pub mod cli;
pub mod config;
pub mod scheduler;
mod server;

pub use cli::{run_command, Command};
pub use scheduler::{CronSchedule, Scheduler, SchedulerStatus};
pub use server::{build_router, ApiError, AppState};
