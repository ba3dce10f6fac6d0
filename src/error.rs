use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SnapError {
    #[error("No snapshots found in {}", .0.display())]
    NoSnapshots(PathBuf),
    #[error("That's not an option!")]
    InvalidChoice,
    #[error("Execution failed: {0}")]
    Decrypt(std::io::Error),
    #[error("Child was terminated by signal {0}")]
    CipherSignal(i32),
    #[error("Wrong password")]
    WrongPassword,
    #[error("Unable to extract file, the file is either corrupt or encrypted.")]
    Extract,
    #[error("{}: {source}", .path.display())]
    Io { path: PathBuf, source: std::io::Error },
}

impl SnapError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self { SnapError::Io { path: path.into(), source } }

    /// Every failure ends the run; the exit code is the same for all of them.
    pub fn exit_code(&self) -> i32 { 2 }
}

/// Maps an error chain to the process exit code, looking for a `SnapError` first.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain().find_map(|e| e.downcast_ref::<SnapError>()).map(|e| e.exit_code()).unwrap_or(2)
}

/// What the user sees on failure: the run error itself when there is one,
/// otherwise the whole context chain.
pub fn user_message(err: &anyhow::Error) -> String {
    match err.chain().find_map(|e| e.downcast_ref::<SnapError>()) { Some(e) => e.to_string(), None => format!("{:#}", err) }
}
