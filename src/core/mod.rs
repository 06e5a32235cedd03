pub mod config;
pub mod error;
pub mod io;
pub mod project;
pub mod state;
pub mod theme;
