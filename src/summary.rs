use crate::catalog::{Action, Catalog};
use crate::scanner::{ScanOutcome, parsed_dir};
use crate::settings::DetectorToggles;
use std::path::Path;

/// One line per enabled category that produced something, in catalog order.
/// Empty or absent categories stay silent.
pub fn summary_lines(root: &Path, catalog: &Catalog, toggles: &DetectorToggles, outcome: &ScanOutcome) -> Vec<String> {
    let dir = parsed_dir(root);
    let mut out = vec![];
    for d in catalog.iter() {
        if !toggles.is_enabled(d.kind) { continue; }
        match d.action {
            Action::AppendLine { output } => {
                let p = dir.join(output);
                let size = match std::fs::metadata(&p) { Ok(m) if m.is_file() => m.len(), _ => continue };
                if size == 0 { continue; }
                out.push(format!("-> {} detected, see {} ({}KB)", d.label, p.display(), size / 1024));
            }
            Action::IncrementCounter => {
                if outcome.sip_spam != 0 { out.push(format!("-> {} detected from suspect user agents: {} events", d.label, outcome.sip_spam)); }
            }
        }
    }
    out
}
