//! Applied-template history kept on the instance itself.
//!
//! The marker file travels with the machine, so any tessera client that can
//! reach the instance sees the same history.

use crate::types::AppliedTemplate;

/// Marker file holding the JSON history array.
pub const HISTORY_PATH: &str = "/var/lib/tessera/applied-templates.json";

/// Read-only probe for the marker file.
pub const READ_COMMAND: &str = "cat /var/lib/tessera/applied-templates.json";

const HEREDOC_DELIMITER: &str = "TESSERA_HISTORY_EOF";

/// Parse the marker file, tolerating an empty or corrupt document.
pub fn parse_history(text: &str) -> Vec<AppliedTemplate> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str(text) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Ignoring unreadable template history: {}", e);
            Vec::new()
        }
    }
}

/// Script that atomically replaces the marker file with `entries`.
pub fn write_script(entries: &[AppliedTemplate]) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string_pretty(entries)?;
    Ok(format!(
        "set -e\n\
         mkdir -p /var/lib/tessera\n\
         cat > {path}.tmp <<'{eof}'\n\
         {json}\n\
         {eof}\n\
         mv {path}.tmp {path}\n",
        path = HISTORY_PATH,
        eof = HEREDOC_DELIMITER,
        json = json,
    ))
}
