use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use anyhow::Context;
use clap::{ColorChoice, Parser};
use is_terminal::IsTerminal;
mod catalog;
mod error;
mod extract;
mod reports;
mod scanner;
mod settings;
mod snapshot;
mod summary;

use crate::settings::{LogFormat, LogLevel, Settings};
use crate::snapshot::SEPARATOR;

static ENABLE_COLOR: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug, Default)]
#[command(
    name = "pexsnap",
    version,
    about = "Extract a diagnostic snapshot and scan its logs for known events",
    long_about = "Selects a diagnostic snapshot archive, extracts it (decrypting it first when needed), scans the unified developer, support and syslog files for known events and writes one report per event category under var/log/parsed/.",
    after_long_help = "Examples:\n  pexsnap\n  pexsnap -i ~/Downloads\n  pexsnap -i ~/Downloads -o /tmp/monday_snapshot\n\nSettings are read from $PEXSNAP_CONFIG or ./pexsnap.toml when present.",
    color = ColorChoice::Auto
)]
struct Args {
    /// Path containing the snapshot(s) (default: current directory)
    #[arg(short = 'i', long = "input", value_name = "IN")]
    input: Option<String>,
    /// Path to extract the snapshot to
    #[arg(short = 'o', long = "output", value_name = "OUT")]
    output: Option<String>,
}

fn main() {
    let args = Args::parse();
    let (settings, problem) = settings::load_settings(None);
    init_logging(&settings);
    if let Some(msg) = problem { log::warn!("{}", msg); }
    let term = std::env::var("TERM").unwrap_or_default();
    let no_color_env = std::env::var_os("NO_COLOR").is_some();
    let _ = ENABLE_COLOR.set(std::io::stdout().is_terminal() && !no_color_env && term != "dumb");
    if let Err(e) = run(&args, &settings) {
        let code = crate::error::exit_code_for(&e);
        log::debug!("run failed: {:?}", e);
        eprintln!("{}", crate::error::user_message(&e));
        std::process::exit(code);
    }
}

fn init_logging(settings: &Settings) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(lvl) = settings.log_level {
        let f = match lvl { LogLevel::Error => log::LevelFilter::Error, LogLevel::Warn => log::LevelFilter::Warn, LogLevel::Info => log::LevelFilter::Info, LogLevel::Debug => log::LevelFilter::Debug, LogLevel::Trace => log::LevelFilter::Trace };
        builder.filter_level(f);
    }
    match settings.log_format {
        Some(LogFormat::Json) => {
            builder.format(|buf, record| {
                let ts = chrono::Local::now().to_rfc3339();
                let obj = serde_json::json!({
                    "ts": ts,
                    "level": record.level().to_string(),
                    "target": record.target(),
                    "msg": record.args().to_string(),
                });
                writeln!(buf, "{}", obj)
            });
        }
        Some(LogFormat::Text) => {
            builder.format(|buf, record| {
                let ts = chrono::Local::now().format("%H:%M:%S");
                writeln!(buf, "[{:<5} {}] {}", record.level(), ts, record.args())
            });
        }
        None => {}
    }
    if let Some(path) = settings.log_path.as_ref() {
        match std::fs::File::create(path) {
            Ok(f) => { builder.target(env_logger::Target::Pipe(Box::new(f))); }
            Err(e) => { eprintln!("Failed to open log file {}: {}", path, e); }
        }
    }
    builder.init();
}

fn paint(s: &str, code: &str) -> String {
    if *ENABLE_COLOR.get().unwrap_or(&false) { format!("\x1b[{}m{}\x1b[0m", code, s) } else { s.to_string() }
}

/// Prints a line to stdout; a closed stdout ends the run quietly.
fn say(line: &str) {
    let mut out = std::io::stdout().lock();
    if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() { std::process::exit(0); }
}

/// Stdout wrapper handed to the collaborators that report progress.
struct Console;

impl Write for Console {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match std::io::stdout().write(buf) { Ok(n) => Ok(n), Err(_) => std::process::exit(0) }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match std::io::stdout().flush() { Ok(()) => Ok(()), Err(_) => std::process::exit(0) }
    }
}

fn input_dir(args: &Args) -> anyhow::Result<PathBuf> {
    match args.input.as_ref() {
        Some(p) => Ok(crate::settings::expand_home(p)),
        None => std::env::current_dir().context("reading current directory"),
    }
}

fn run(args: &Args, settings: &Settings) -> anyhow::Result<()> {
    let started = Instant::now();
    let input = input_dir(args)?;
    let mut chooser: Box<dyn crate::snapshot::SnapshotChooser> = match settings.snapshot_choice {
        Some(n) => Box::new(crate::snapshot::FixedChooser(n.checked_sub(1).unwrap_or(usize::MAX))),
        None => Box::new(crate::snapshot::ConsoleChooser::stdio()),
    };
    let chosen = crate::snapshot::select_snapshot(&input, &settings.snapshot_prefix, chooser.as_mut())?;
    let folder = crate::extract::extraction_dir(&chosen, args.output.as_deref(), settings);
    log::info!("snapshot {} -> {}", chosen.to_string_lossy(), folder.to_string_lossy());
    let cipher = crate::extract::CipherTool { program: settings.cipher_tool.clone() };
    let root = crate::extract::extract_snapshot(&chosen, &folder, &cipher, &mut Console)?;

    let catalog = crate::catalog::Catalog::new()?;
    say("Checking for known events in the logs files");
    let pb = if settings.progress { Some(indicatif::ProgressBar::new_spinner()) } else { None };
    if let Some(ref pb) = pb { pb.set_message("Scanning logs"); pb.enable_steady_tick(Duration::from_millis(120)); }
    let scanned = crate::scanner::scan(&root, &catalog, &settings.detectors);
    if let Some(pb) = pb { pb.finish_and_clear(); }
    let outcome = scanned?;
    log::info!("scanned {} line(s) in {} file(s)", outcome.lines_read, outcome.files_read);
    for line in crate::summary::summary_lines(&root, &catalog, &settings.detectors, &outcome) { say(&paint(&line, "1;33")); }

    let tools = crate::reports::report_tools(&settings.reports);
    for (name, res) in crate::reports::run_reports(&root, &tools, &mut Console) {
        match res {
            crate::reports::ToolRun::Failed(msg) => log::warn!("{} report failed: {}", name, msg),
            crate::reports::ToolRun::Finished(code) => log::debug!("{} report finished with {:?}", name, code),
            crate::reports::ToolRun::Disabled | crate::reports::ToolRun::Missing => {}
        }
    }

    let parsed = crate::scanner::parsed_dir(&root);
    say(SEPARATOR);
    say(&paint(&format!("Done, you can find the parsed log files in {}/", parsed.display()), "1;36"));
    say(SEPARATOR);
    if let Some(viewer) = settings.open_with.as_ref() { open_with(viewer, &root); }
    if settings.measure { say(&format!("Duration: {:.3}s", started.elapsed().as_secs_f64())); }
    Ok(())
}

fn open_with(viewer: &str, root: &Path) {
    let _ = std::process::Command::new(viewer).arg(root).spawn().map_err(|e| log::error!("Failed to open {} with {}: {}", root.to_string_lossy(), viewer, e));
}
