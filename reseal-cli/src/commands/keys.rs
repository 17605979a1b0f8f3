use anyhow::{Context, Result};
use reseal_core::{FileKeySource, KeyRing, KeySource};
use std::path::Path;

use super::EXIT_OK;

/// Print label and creation time of every generation, newest first
pub async fn execute_keys_command(path: &Path) -> Result<u8> {
    let material = FileKeySource::new(path)
        .load()
        .await
        .with_context(|| format!("Failed to load key material: {}", path.display()))?;
    let keyring = KeyRing::load(&material)
        .with_context(|| format!("No usable key ring in {}", path.display()))?;

    for line in describe(&keyring) {
        println!("{}", line);
    }
    Ok(EXIT_OK)
}

fn describe(keyring: &KeyRing) -> Vec<String> {
    let latest = keyring.latest_label();
    let width = keyring
        .by_recency()
        .map(|g| g.label.len())
        .max()
        .unwrap_or(0);

    keyring
        .by_recency()
        .map(|generation| {
            let marker = if generation.label == latest { "  (latest)" } else { "" };
            format!(
                "{:<width$}  {}{}",
                generation.label,
                generation.created_at.to_rfc3339(),
                marker,
                width = width
            )
        })
        .collect()
}
