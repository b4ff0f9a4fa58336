pub mod apply;
pub mod checkpoints;
pub mod diff;
pub mod inspect;
pub mod rollback;

use crate::AppContext;
use anyhow::{Result, bail};
use dialoguer::Confirm;
use std::io::IsTerminal;

/// Ask before a mutating command unless `--yes` was given.
///
/// Without a terminal there is nobody to ask, so the command refuses.
pub fn confirm(app: &AppContext, yes: bool, prompt: &str) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    if app.json || !std::io::stdin().is_terminal() {
        bail!("Refusing to continue without confirmation; pass --yes");
    }
    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(confirmed)
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
