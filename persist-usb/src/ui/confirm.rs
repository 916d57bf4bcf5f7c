//! Typed confirmation for the destructive run.

use anyhow::{Context, Result};
use dialoguer::Input;

/// The only answer that lets the run proceed. Case matters.
pub const CONFIRM_TOKEN: &str = "YES";
pub const CONFIRM_PROMPT: &str = "❓ Type 'YES' to continue";

pub fn read_typed_confirmation(prompt: &str) -> Result<String> {
    Input::<String>::new()
        .with_prompt(prompt)
        .allow_empty(true)
        .interact_text()
        .context("Failed to read confirmation input")
}

pub fn is_confirmed(answer: &str) -> bool {
    answer.trim() == CONFIRM_TOKEN
}

pub fn confirm_typed_with<R>(prompt: &str, read: R) -> Result<bool>
where
    R: FnOnce(&str) -> Result<String>,
{
    Ok(is_confirmed(&read(prompt)?))
}
