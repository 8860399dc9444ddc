//! `dashsync diff`.

use std::path::Path;

use anyhow::Context;
use dashsync_layout::layout::layout_from_json;
use dashsync_layout::{detect_structural_changes, should_reload_grid, UpdateSource};

pub fn run_diff(old: &Path, new: &Path, source: &str) -> anyhow::Result<()> {
    let read = |path: &Path| -> anyhow::Result<_> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read layout {}", path.display()))?;
        Ok(layout_from_json(&text)?)
    };
    let change = detect_structural_changes(&read(old)?, &read(new)?);
    let source: UpdateSource = source.parse().unwrap_or(UpdateSource::Unrecognized);
    print!("{change}");
    let decision = if should_reload_grid(source, change.has_structural_change()) {
        "reload"
    } else {
        "keep local"
    };
    println!("{source}: {decision}");
    Ok(())
}
