pub mod cli;
pub mod commands;
pub mod prompt;
pub mod render;

pub use cli::Cli;
pub use commands::{describe, run};
pub use render::ChatRenderer;
