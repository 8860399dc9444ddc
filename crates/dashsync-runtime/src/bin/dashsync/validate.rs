//! `dashsync validate`.

use std::path::Path;

use anyhow::Context;
use dashsync_layout::layout::{layout_from_json, repair};
use dashsync_layout::WidgetRegistry;

pub fn run_validate(registry: &Path, layout: &Path, write: bool) -> anyhow::Result<()> {
    let registry = WidgetRegistry::load(registry)?;
    let text = std::fs::read_to_string(layout)
        .with_context(|| format!("read layout {}", layout.display()))?;
    let stored = layout_from_json(&text)?;
    let report = repair(&stored, &registry);
    print!("{report}");
    if report.is_clean() {
        println!("layout is clean");
        return Ok(());
    }
    if write {
        let json = serde_json::to_string_pretty(&report.layout)?;
        std::fs::write(layout, json)
            .with_context(|| format!("write layout {}", layout.display()))?;
        println!("wrote repaired layout to {}", layout.display());
    }
    Ok(())
}
