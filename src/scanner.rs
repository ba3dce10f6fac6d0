use crate::catalog::{Action, Catalog, Detector, DetectorKind, LogSource};
use crate::error::SnapError;
use crate::settings::DetectorToggles;
use flate2::read::GzDecoder;
use globset::GlobBuilder;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

pub const LOG_DIR: &str = "var/log";
pub const PARSED_DIR: &str = "var/log/parsed";

const READ_BUFFER: usize = 128 * 1024;

pub fn log_dir(root: &Path) -> PathBuf { root.join(LOG_DIR) }

pub fn parsed_dir(root: &Path) -> PathBuf { root.join(PARSED_DIR) }

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// SIP INVITEs carrying a known scanner user agent.
    pub sip_spam: u64,
    /// Lines written per append-mode detector.
    pub written: HashMap<DetectorKind, u64>,
    pub files_read: usize,
    pub lines_read: u64,
}

impl ScanOutcome {
    pub fn written_for(&self, kind: DetectorKind) -> u64 { self.written.get(&kind).copied().unwrap_or(0) }
}

/// On-disk files of one log family, newest first. A missing log directory is
/// simply an empty list.
pub fn resolve_source_files(root: &Path, source: LogSource) -> Result<Vec<PathBuf>, SnapError> {
    let mut files = list_source_files(root, source)?;
    files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.file_name().cmp(&b.0.file_name())));
    Ok(files.into_iter().map(|(p, _)| p).collect())
}

/// Same files ordered by name, the way a shell glob would hand them to a tool.
pub fn source_files_by_name(root: &Path, source: LogSource) -> Result<Vec<PathBuf>, SnapError> {
    let mut files: Vec<PathBuf> = list_source_files(root, source)?.into_iter().map(|(p, _)| p).collect();
    files.sort();
    Ok(files)
}

fn list_source_files(root: &Path, source: LogSource) -> Result<Vec<(PathBuf, SystemTime)>, SnapError> {
    let dir = log_dir(root);
    if !dir.is_dir() { return Ok(vec![]); }
    let matcher = GlobBuilder::new(&source.glob())
        .literal_separator(true)
        .build()
        .map_err(|e| SnapError::io(&dir, std::io::Error::other(e)))?
        .compile_matcher();
    let mut out = vec![];
    for de in WalkDir::new(&dir).min_depth(1).max_depth(1).follow_links(true).into_iter().filter_map(Result::ok) {
        if !de.file_type().is_file() { continue; }
        if !matcher.is_match(de.file_name()) { continue; }
        let mtime = de.metadata().map_err(|e| SnapError::io(de.path(), e.into()))?.modified().map_err(|e| SnapError::io(de.path(), e))?;
        out.push((de.into_path(), mtime));
    }
    Ok(out)
}

fn open_log(path: &Path) -> Result<Box<dyn BufRead>, SnapError> {
    let f = File::open(path).map_err(|e| SnapError::io(path, e))?;
    let gz = path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("gz")).unwrap_or(false);
    if gz { Ok(Box::new(BufReader::with_capacity(READ_BUFFER, GzDecoder::new(f)))) } else { Ok(Box::new(BufReader::with_capacity(READ_BUFFER, f))) }
}

struct Sinks {
    dir: PathBuf,
    writers: HashMap<&'static str, BufWriter<File>>,
}

impl Sinks {
    fn append(&mut self, output: &'static str, file_name: &str, line: &[u8]) -> Result<(), SnapError> {
        let path = self.dir.join(output);
        let w = match self.writers.entry(output) {
            Entry::Occupied(o) => o.into_mut(),
            Entry::Vacant(v) => {
                let f = OpenOptions::new().create(true).append(true).open(&path).map_err(|e| SnapError::io(&path, e))?;
                v.insert(BufWriter::new(f))
            }
        };
        let mut write = || -> std::io::Result<()> {
            w.write_all(file_name.as_bytes())?;
            w.write_all(b":")?;
            w.write_all(line)?;
            if !line.ends_with(b"\n") { w.write_all(b"\n")?; }
            Ok(())
        };
        write().map_err(|e| SnapError::io(&path, e))
    }

    fn finish(self) -> Result<(), SnapError> {
        for (name, mut w) in self.writers {
            w.flush().map_err(|e| SnapError::io(self.dir.join(name), e))?;
        }
        Ok(())
    }
}

/// Streams every line of every log family through the enabled detectors for
/// that family. Matches are appended to `var/log/parsed/<category file>`;
/// counter detectors only bump the returned totals.
pub fn scan(root: &Path, catalog: &Catalog, toggles: &DetectorToggles) -> Result<ScanOutcome, SnapError> {
    let dir = parsed_dir(root);
    std::fs::create_dir_all(&dir).map_err(|e| SnapError::io(&dir, e))?;
    let mut sinks = Sinks { dir, writers: HashMap::new() };
    let mut outcome = ScanOutcome::default();
    for source in LogSource::ALL {
        let detectors: Vec<&Detector> = catalog.for_source(source).filter(|d| toggles.is_enabled(d.kind)).collect();
        if detectors.is_empty() { log::debug!("{}: all detectors disabled", source.file_name()); continue; }
        let files = resolve_source_files(root, source)?;
        log::info!("{}: {} file(s)", source.file_name(), files.len());
        for path in &files {
            scan_file(path, &detectors, &mut sinks, &mut outcome)?;
            outcome.files_read += 1;
        }
    }
    sinks.finish()?;
    for d in catalog.iter() {
        if toggles.is_enabled(d.kind) { log::debug!("{}: {} line(s) written", d.name, outcome.written_for(d.kind)); }
    }
    Ok(outcome)
}

fn scan_file(path: &Path, detectors: &[&Detector], sinks: &mut Sinks, outcome: &mut ScanOutcome) -> Result<(), SnapError> {
    let file_name = path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    log::debug!("scanning {}", path.to_string_lossy());
    let mut reader = open_log(path)?;
    let mut buf: Vec<u8> = Vec::new();
    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf).map_err(|e| SnapError::io(path, e))?;
        if read == 0 { break; }
        outcome.lines_read += 1;
        let text = String::from_utf8_lossy(&buf);
        for d in detectors {
            if !d.matches(&text) { continue; }
            match d.action {
                Action::AppendLine { output } => {
                    sinks.append(output, &file_name, &buf)?;
                    *outcome.written.entry(d.kind).or_insert(0) += 1;
                }
                Action::IncrementCounter => outcome.sip_spam += 1,
            }
        }
    }
    Ok(())
}
