use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel { Error, Warn, Info, Debug, Trace }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat { Text, Json }

/// Per-detector enable flags, handed to the scan explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorToggles {
    pub irregular_ping: bool,
    pub reactor_stall: bool,
    pub irregular_pulse: bool,
    pub dns_failure: bool,
    pub sip_spam: bool,
    pub adapter_reset: bool,
    pub martian_source: bool,
}

impl Default for DetectorToggles {
    fn default() -> Self {
        Self { irregular_ping: true, reactor_stall: true, irregular_pulse: true, dns_failure: true, sip_spam: true, adapter_reset: true, martian_source: true }
    }
}

impl DetectorToggles {
    #[cfg(test)]
    pub fn none() -> Self {
        Self { irregular_ping: false, reactor_stall: false, irregular_pulse: false, dns_failure: false, sip_spam: false, adapter_reset: false, martian_source: false }
    }

    pub fn is_enabled(&self, kind: crate::catalog::DetectorKind) -> bool {
        use crate::catalog::DetectorKind::*;
        match kind {
            IrregularPing => self.irregular_ping,
            ReactorStall => self.reactor_stall,
            IrregularPulse => self.irregular_pulse,
            DnsFailure => self.dns_failure,
            SipSpam => self.sip_spam,
            AdapterReset => self.adapter_reset,
            MartianSource => self.martian_source,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportToggles {
    pub logreader: bool,
    pub dbsummary: bool,
    pub vmotion: bool,
    pub connectivity: bool,
    pub scheduling: bool,
    pub logreader_path: PathBuf,
    pub dbsummary_path: PathBuf,
    pub vmotion_path: PathBuf,
    pub connectivity_path: PathBuf,
    pub scheduling_path: PathBuf,
}

impl Default for ReportToggles {
    fn default() -> Self {
        Self {
            logreader: true,
            dbsummary: true,
            // vmotion is internal-only and the scheduling script is unfinished
            vmotion: false,
            connectivity: true,
            scheduling: false,
            logreader_path: PathBuf::from("/usr/local/bin/logreader.py"),
            dbsummary_path: PathBuf::from("/usr/local/bin/dbsummary.py"),
            vmotion_path: PathBuf::from("/usr/local/bin/vmotion.py"),
            connectivity_path: PathBuf::from("/usr/local/bin/connectivity.py"),
            scheduling_path: PathBuf::from("/usr/local/bin/scheduling.py"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub detectors: DetectorToggles,
    pub reports: ReportToggles,
    pub extract_to_snapshots_dir: bool,
    pub snapshots_dir: String,
    pub snapshot_prefix: String,
    pub cipher_tool: String,
    pub open_with: Option<String>,
    /// Preset 1-based answer for the snapshot picker; skips the prompt.
    pub snapshot_choice: Option<usize>,
    pub measure: bool,
    pub progress: bool,
    pub log_level: Option<LogLevel>,
    pub log_format: Option<LogFormat>,
    pub log_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            detectors: DetectorToggles::default(),
            reports: ReportToggles::default(),
            extract_to_snapshots_dir: false,
            snapshots_dir: "~/Downloads/snapshots".to_string(),
            snapshot_prefix: "diagnostic_snapshot_".to_string(),
            cipher_tool: "openssl".to_string(),
            open_with: None,
            snapshot_choice: None,
            measure: false,
            progress: false,
            log_level: None,
            log_format: None,
            log_path: None,
        }
    }
}

impl Settings {
    pub fn snapshots_root(&self) -> PathBuf { expand_home(&self.snapshots_dir) }
}

pub fn expand_home(p: &str) -> PathBuf {
    if p == "~" { return dirs::home_dir().unwrap_or_else(|| PathBuf::from(p)); }
    if let Some(rest) = p.strip_prefix("~/")
        && let Some(home) = dirs::home_dir() { return home.join(rest); }
    PathBuf::from(p)
}

/// Reads settings from the given path, `$PEXSNAP_CONFIG`, or `./pexsnap.toml`.
/// A file that cannot be read or parsed yields defaults plus the reason, so it
/// can be logged once logging is up.
pub fn load_settings(path_opt: Option<&str>) -> (Settings, Option<String>) {
    let path = path_opt
        .map(|s| s.to_string())
        .or_else(|| std::env::var("PEXSNAP_CONFIG").ok())
        .unwrap_or_else(|| "pexsnap.toml".to_string());
    let p = PathBuf::from(&path);
    if !p.exists() { return (Settings::default(), None); }
    let data = match std::fs::read_to_string(&p) { Ok(d) => d, Err(e) => return (Settings::default(), Some(format!("Failed to read settings file {}: {}", p.to_string_lossy(), e))) };
    match toml::from_str::<Settings>(&data) {
        Ok(s) => (s, None),
        Err(e) => (Settings::default(), Some(format!("Failed to parse settings file {}: {}", p.to_string_lossy(), e))),
    }
}
