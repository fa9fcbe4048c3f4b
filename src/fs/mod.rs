pub mod diff;
pub mod node;
pub mod operations;
pub mod watcher;
