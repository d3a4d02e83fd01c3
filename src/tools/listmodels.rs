use std::fmt::Write as _;

use serde::Serialize;

use crate::catalog::CatalogEntry;

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub vendor: String,
    pub input_per_million: f64,
    pub output_per_million: f64,
    /// Providers in the chain that serve this model by default.
    pub configured_for: Vec<String>,
}

impl From<&CatalogEntry> for ModelInfo {
    fn from(entry: &CatalogEntry) -> Self {
        Self {
            name: entry.model.clone(),
            vendor: entry.vendor.to_string(),
            input_per_million: entry.price.input_per_million,
            output_per_million: entry.price.output_per_million,
            configured_for: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListModelsResponse {
    pub models: Vec<ModelInfo>,
}

impl ListModelsResponse {
    /// Markdown table, configured models first, then by name.
    pub fn to_markdown(&self) -> String {
        let mut rows: Vec<&ModelInfo> = self.models.iter().collect();
        rows.sort_by(|a, b| {
            a.configured_for
                .is_empty()
                .cmp(&b.configured_for.is_empty())
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut out = String::from(
            "| model | vendor | input $/M | output $/M | default for |\n|---|---|---|---|---|\n",
        );
        for m in rows {
            let configured = if m.configured_for.is_empty() {
                "-".to_string()
            } else {
                m.configured_for.join(", ")
            };
            let _ = writeln!(
                out,
                "| {} | {} | {:.3} | {:.3} | {} |",
                m.name, m.vendor, m.input_per_million, m.output_per_million, configured
            );
        }
        out
    }
}
