use anyhow::{Context, Result, bail};
use reconcile::Template;
use std::fs;
use std::path::Path;

/// Load a resolved template from a `.toml` or `.json` file.
pub fn load(path: &Path) -> Result<Template> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read template {}", path.display()))?;

    let template: Template = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("Invalid TOML template {}", path.display()))?,
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON template {}", path.display()))?,
        other => bail!(
            "Unsupported template format {:?} for {} (expected .toml or .json)",
            other.unwrap_or(""),
            path.display()
        ),
    };

    log::debug!(
        "Loaded template {} ({} package groups, {} services, {} users)",
        template.name,
        template.packages.len(),
        template.services.len(),
        template.users.len()
    );
    Ok(template)
}
