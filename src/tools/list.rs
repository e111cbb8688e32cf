//! `list_models`: the merged catalog grouped by provider.

use std::collections::BTreeMap;

use crate::backend::Backend;
use crate::error::Result;
use crate::smart::SmartBackend;

pub async fn run(smart: &SmartBackend) -> Result<String> {
    let models = smart.list_models().await?;

    let mut by_provider: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    for model in &models {
        by_provider
            .entry(model.provider_key.clone())
            .or_default()
            .push((model.id.clone(), model.display_name.clone()));
    }

    let mut out = format!("## Available Models ({})\n\n", models.len());
    if models.is_empty() {
        out.push_str(
            "No models available. Configure at least one provider (API key, \
             subscription login, or a running local server) and try again.\n",
        );
        return Ok(out.trim_end().to_string());
    }

    for (provider, entries) in by_provider {
        out.push_str(&format!("### {provider}\n\n"));
        for (id, display_name) in entries {
            if display_name.is_empty() || id.ends_with(&display_name) {
                out.push_str(&format!("- `{id}`\n"));
            } else {
                out.push_str(&format!("- `{id}` — {display_name}\n"));
            }
        }
        out.push('\n');
    }

    Ok(out.trim_end().to_string())
}
