use crate::catalog::LogSource;
use crate::error::SnapError;
use crate::scanner::{parsed_dir, source_files_by_name};
use crate::settings::ReportToggles;
use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolInput {
    /// Every support log file, live and rotated.
    SupportLogs,
    /// The extraction root.
    Root,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportTool {
    pub name: &'static str,
    pub enabled: bool,
    pub path: PathBuf,
    pub report: &'static str,
    pub banner: &'static str,
    pub input: ToolInput,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolRun {
    Disabled,
    Missing,
    Finished(Option<i32>),
    Failed(String),
}

pub fn report_tools(cfg: &ReportToggles) -> Vec<ReportTool> {
    vec![
        ReportTool { name: "logreader", enabled: cfg.logreader, path: cfg.logreader_path.clone(), report: "pex_report_logreader.log", banner: "Running logs through logreader", input: ToolInput::SupportLogs },
        ReportTool { name: "dbsummary", enabled: cfg.dbsummary, path: cfg.dbsummary_path.clone(), report: "pex_report_dbreport.log", banner: "Running database through dbsummary", input: ToolInput::Root },
        ReportTool { name: "vmotion", enabled: cfg.vmotion, path: cfg.vmotion_path.clone(), report: "pex_health_vmotionreport.log", banner: "Checking for vmotion events", input: ToolInput::Root },
        ReportTool { name: "connectivity", enabled: cfg.connectivity, path: cfg.connectivity_path.clone(), report: "pex_health_connectivity_report.log", banner: "Checking for connectivity events", input: ToolInput::Root },
        ReportTool { name: "scheduling", enabled: cfg.scheduling, path: cfg.scheduling_path.clone(), report: "pex_report_scheduling.log", banner: "Checking for exchange events", input: ToolInput::Root },
    ]
}

fn tool_args(root: &Path, input: ToolInput) -> Result<Vec<OsString>, SnapError> {
    match input {
        ToolInput::Root => Ok(vec![root.as_os_str().to_os_string()]),
        ToolInput::SupportLogs => {
            let files = source_files_by_name(root, LogSource::Support)?;
            if files.is_empty() { return Ok(vec![crate::scanner::log_dir(root).join(LogSource::Support.file_name()).into_os_string()]); }
            Ok(files.into_iter().map(PathBuf::into_os_string).collect())
        }
    }
}

fn run_tool(root: &Path, tool: &ReportTool) -> ToolRun {
    let report = parsed_dir(root).join(tool.report);
    let args = match tool_args(root, tool.input) { Ok(a) => a, Err(e) => return ToolRun::Failed(e.to_string()) };
    let sink = match File::create(&report) { Ok(f) => f, Err(e) => return ToolRun::Failed(format!("{}: {}", report.display(), e)) };
    log::debug!("running {} > {}", tool.path.to_string_lossy(), report.to_string_lossy());
    match Command::new(&tool.path).args(&args).stdout(Stdio::from(sink)).status() {
        Ok(st) => {
            if !st.success() { log::warn!("{} exited with {}", tool.name, st); }
            ToolRun::Finished(st.code())
        }
        Err(e) => { log::warn!("{} could not be started: {}", tool.name, e); ToolRun::Failed(e.to_string()) }
    }
}

/// Runs each enabled tool that exists on disk, one after another, writing its
/// stdout to a report under `var/log/parsed/`. Nothing here is fatal.
pub fn run_reports(root: &Path, tools: &[ReportTool], out: &mut dyn Write) -> Vec<(&'static str, ToolRun)> {
    let mut results = vec![];
    for tool in tools {
        if !tool.enabled { results.push((tool.name, ToolRun::Disabled)); continue; }
        if !tool.path.is_file() {
            let _ = writeln!(out, "{} not found, skipping..", tool.name);
            results.push((tool.name, ToolRun::Missing));
            continue;
        }
        let _ = writeln!(out, "{}", tool.banner);
        let _ = out.flush();
        results.push((tool.name, run_tool(root, tool)));
    }
    results
}
