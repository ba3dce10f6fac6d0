use crate::error::SnapError;
use comfy_table::{ContentArrangement, Table};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

pub const SEPARATOR: &str = "--------------------------------------------------";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub size_mb: u64,
}

impl Candidate {
    pub fn file_name(&self) -> String { self.path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default() }
}

/// Regular files in `dir` whose name starts with `prefix`, sorted by name.
pub fn list_snapshots(dir: &Path, prefix: &str) -> Result<Vec<Candidate>, SnapError> {
    let rd = std::fs::read_dir(dir).map_err(|e| SnapError::io(dir, e))?;
    let mut out = vec![];
    for entry in rd {
        let entry = entry.map_err(|e| SnapError::io(dir, e))?;
        if !entry.file_name().to_string_lossy().starts_with(prefix) { continue; }
        let md = entry.metadata().map_err(|e| SnapError::io(entry.path(), e))?;
        if !md.is_file() { continue; }
        out.push(Candidate { path: entry.path(), size_mb: md.len() / 1_048_576 });
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

pub fn render_candidates(candidates: &[Candidate]) -> String {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Number", "Size", "Filename"]);
    for (i, c) in candidates.iter().enumerate() {
        table.add_row(vec![i.to_string(), format!("{}MB", c.size_mb), c.file_name()]);
    }
    table.to_string()
}

/// Picks one of several snapshot candidates.
pub trait SnapshotChooser {
    fn choose(&mut self, candidates: &[Candidate]) -> Result<usize, SnapError>;
}

/// Numbered list on the terminal, answer read from the console.
pub struct ConsoleChooser<R, W> {
    input: R,
    output: W,
}

impl ConsoleChooser<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self { Self { input: std::io::stdin().lock(), output: std::io::stdout() } }
}

impl<R: BufRead, W: Write> ConsoleChooser<R, W> {
    pub fn new(input: R, output: W) -> Self { Self { input, output } }

    fn prompt(&mut self) -> Result<Option<i64>, SnapError> {
        write!(self.output, "Select a number: ").and_then(|_| self.output.flush()).map_err(|e| SnapError::io("<stdout>", e))?;
        let mut line = String::new();
        let n = self.input.read_line(&mut line).map_err(|e| SnapError::io("<stdin>", e))?;
        if n == 0 { return Ok(None); }
        Ok(line.trim().parse::<i64>().ok())
    }
}

impl<R: BufRead, W: Write> SnapshotChooser for ConsoleChooser<R, W> {
    fn choose(&mut self, candidates: &[Candidate]) -> Result<usize, SnapError> {
        let listing = format!("{}\n{}\n{}\n", SEPARATOR, render_candidates(candidates), SEPARATOR);
        self.output.write_all(listing.as_bytes()).map_err(|e| SnapError::io("<stdout>", e))?;
        loop {
            let n = self.prompt()?.ok_or(SnapError::InvalidChoice)?;
            if n >= 0 && (n as usize) < candidates.len() { return Ok(n as usize); }
            writeln!(self.output, "Not an appropriate choice.").map_err(|e| SnapError::io("<stdout>", e))?;
        }
    }
}

/// Always answers with the same index; for batch runs.
pub struct FixedChooser(pub usize);

impl SnapshotChooser for FixedChooser {
    fn choose(&mut self, candidates: &[Candidate]) -> Result<usize, SnapError> {
        if self.0 < candidates.len() { log::info!("selecting snapshot {} ({})", self.0, candidates[self.0].file_name()); Ok(self.0) } else { Err(SnapError::InvalidChoice) }
    }
}

/// A lone candidate is taken as-is; several go through the chooser.
pub fn select_snapshot(dir: &Path, prefix: &str, chooser: &mut dyn SnapshotChooser) -> Result<PathBuf, SnapError> {
    let mut candidates = list_snapshots(dir, prefix)?;
    log::debug!("{} snapshot candidate(s) in {}", candidates.len(), dir.to_string_lossy());
    match candidates.len() {
        0 => Err(SnapError::NoSnapshots(dir.to_path_buf())),
        1 => Ok(candidates.remove(0).path),
        _ => {
            let idx = chooser.choose(&candidates)?;
            Ok(candidates.swap_remove(idx).path)
        }
    }
}
