//! Terminal interaction: the typed confirmation prompt and Ctrl+C handling.

pub mod cancel;
pub mod confirm;
