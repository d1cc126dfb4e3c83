//! Runtime surface of a job: live control, command file polling and
//! periodic background threads.

pub mod command_watcher;
pub mod control;
pub mod ticker;

pub use command_watcher::CommandWatcher;
pub use control::JobControl;
pub use ticker::Ticker;
