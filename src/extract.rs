use crate::error::SnapError;
use crate::settings::Settings;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Where a snapshot gets unpacked, following the `-o` / `extract_to_snapshots_dir` rules.
pub fn extraction_dir(archive: &Path, output: Option<&str>, settings: &Settings) -> PathBuf {
    match output {
        Some(o) if settings.extract_to_snapshots_dir => settings.snapshots_root().join(o),
        Some(o) => PathBuf::from(o),
        None => {
            let name = archive.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
            let mut stem = name.replace(".tgz", "");
            if stem == name { stem.push_str("_extracted"); }
            if settings.extract_to_snapshots_dir { settings.snapshots_root().join(stem) } else { archive.with_file_name(stem) }
        }
    }
}

fn processed_name(name: &str) -> String {
    if name.contains(".tgz") { name.replace(".tgz", "-processed.tgz") } else { format!("{}-processed", name) }
}

fn is_gzip(f: &mut File) -> std::io::Result<bool> {
    let mut magic = [0u8; 2];
    let n = f.read(&mut magic)?;
    f.seek(SeekFrom::Start(0))?;
    Ok(n == 2 && magic == GZIP_MAGIC)
}

fn open_archive(path: &Path) -> std::io::Result<tar::Archive<Box<dyn Read>>> {
    let mut f = File::open(path)?;
    let reader: Box<dyn Read> = if is_gzip(&mut f)? { Box::new(GzDecoder::new(f)) } else { Box::new(f) };
    Ok(tar::Archive::new(reader))
}

/// True when the file reads as a tar stream, gzip-compressed or not.
pub fn is_tar_container(path: &Path) -> bool {
    let mut archive = match open_archive(path) { Ok(a) => a, Err(_) => return false };
    let first = match archive.entries() { Ok(mut it) => it.next(), Err(_) => return false };
    matches!(first, Some(Ok(_)))
}

/// Turns an encrypted snapshot into a readable one.
pub trait Decryptor {
    fn decrypt(&self, input: &Path, output: &Path) -> Result<(), SnapError>;
}

/// Runs the system cipher utility; it prompts for the password itself.
pub struct CipherTool {
    pub program: String,
}

impl Decryptor for CipherTool {
    fn decrypt(&self, input: &Path, output: &Path) -> Result<(), SnapError> {
        log::info!("decrypting {} with {}", input.to_string_lossy(), self.program);
        let status = Command::new(&self.program)
            .args(["aes-256-cbc", "-d", "-md", "md5", "-in"])
            .arg(input)
            .arg("-out")
            .arg(output)
            .status()
            .map_err(SnapError::Decrypt)?;
        match status.code() {
            Some(0) => Ok(()),
            Some(1) => Err(SnapError::WrongPassword),
            Some(c) => Err(SnapError::Decrypt(std::io::Error::other(format!("{} exited with status {}", self.program, c)))),
            None => Err(SnapError::CipherSignal(signal_of(&status))),
        }
    }
}

#[cfg(unix)]
fn signal_of(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().unwrap_or(0)
}

#[cfg(not(unix))]
fn signal_of(_status: &std::process::ExitStatus) -> i32 { 0 }

/// Unpacks `archive` into `dest`, decrypting it first when it is not a tar
/// container. The encrypted original is removed once decrypted, and the
/// readable archive ends up inside `dest`. Returns the extraction root.
pub fn extract_snapshot(archive: &Path, dest: &Path, decryptor: &dyn Decryptor, out: &mut dyn Write) -> Result<PathBuf, SnapError> {
    std::fs::create_dir_all(dest).map_err(|e| SnapError::io(dest, e))?;
    let name = archive.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let mut chosen = archive.to_path_buf();
    if !is_tar_container(&chosen) {
        let decrypted = dest.join(processed_name(&name));
        decryptor.decrypt(&chosen, &decrypted)?;
        std::fs::remove_file(&chosen).map_err(|e| SnapError::io(&chosen, e))?;
        chosen = decrypted;
    }
    let chosen_name = chosen.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let _ = writeln!(out, "Extracting {} to {}", chosen_name, dest.display());
    if let Err(e) = open_archive(&chosen).and_then(|mut a| a.unpack(dest)) {
        log::debug!("unpacking {} failed: {}", chosen.to_string_lossy(), e);
        return Err(SnapError::Extract);
    }
    let moved = dest.join(&chosen_name);
    if moved != chosen { move_file(&chosen, &moved)?; }
    Ok(dest.to_path_buf())
}

fn move_file(from: &Path, to: &Path) -> Result<(), SnapError> {
    if std::fs::rename(from, to).is_ok() { return Ok(()); }
    std::fs::copy(from, to).map_err(|e| SnapError::io(to, e))?;
    std::fs::remove_file(from).map_err(|e| SnapError::io(from, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::cell::RefCell;

    fn build_tgz(path: &Path, files: &[(&str, &str)]) {
        let enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        let mut b = tar::Builder::new(enc);
        for (name, body) in files {
            let mut h = tar::Header::new_gnu();
            h.set_size(body.len() as u64);
            h.set_mode(0o644);
            h.set_cksum();
            b.append_data(&mut h, name, body.as_bytes()).unwrap();
        }
        b.into_inner().unwrap().finish().unwrap();
    }

    struct FakeCipher { plain: PathBuf, calls: RefCell<Vec<(PathBuf, PathBuf)>> }

    impl Decryptor for FakeCipher {
        fn decrypt(&self, input: &Path, output: &Path) -> Result<(), SnapError> {
            self.calls.borrow_mut().push((input.to_path_buf(), output.to_path_buf()));
            std::fs::copy(&self.plain, output).map_err(|e| SnapError::io(output, e))?;
            Ok(())
        }
    }

    struct Refuse;

    impl Decryptor for Refuse {
        fn decrypt(&self, _input: &Path, _output: &Path) -> Result<(), SnapError> { Err(SnapError::WrongPassword) }
    }

    #[test]
    fn plain_snapshot_is_unpacked_and_moved() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let archive = src.path().join("diagnostic_snapshot_x.tgz");
        build_tgz(&archive, &[("var/log/unified_support.log", "hello\n")]);
        assert!(is_tar_container(&archive));
        let dest = out.path().join("snap");
        let root = extract_snapshot(&archive, &dest, &Refuse, &mut std::io::sink()).unwrap();
        assert_eq!(std::fs::read_to_string(root.join("var/log/unified_support.log")).unwrap(), "hello\n");
        assert!(!archive.exists());
        assert!(dest.join("diagnostic_snapshot_x.tgz").is_file());
    }

    #[test]
    fn encrypted_snapshot_goes_through_decryptor() {
        let src = tempfile::tempdir().unwrap();
        let plain = src.path().join("plain.tgz");
        build_tgz(&plain, &[("var/log/unified_syslog.log", "x\n")]);
        let archive = src.path().join("diagnostic_snapshot_y.tgz");
        std::fs::write(&archive, b"Salted__not a tar at all").unwrap();
        assert!(!is_tar_container(&archive));
        let dest = src.path().join("out");
        let cipher = FakeCipher { plain, calls: RefCell::new(vec![]) };
        extract_snapshot(&archive, &dest, &cipher, &mut std::io::sink()).unwrap();
        let calls = cipher.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, dest.join("diagnostic_snapshot_y-processed.tgz"));
        assert!(!archive.exists());
        assert!(dest.join("var/log/unified_syslog.log").is_file());
        assert!(dest.join("diagnostic_snapshot_y-processed.tgz").is_file());
    }

    #[test]
    fn decryption_failure_keeps_original() {
        let src = tempfile::tempdir().unwrap();
        let archive = src.path().join("diagnostic_snapshot_z.tgz");
        std::fs::write(&archive, b"garbage").unwrap();
        let err = extract_snapshot(&archive, &src.path().join("out"), &Refuse, &mut std::io::sink()).unwrap_err();
        assert!(matches!(err, SnapError::WrongPassword));
        assert!(archive.exists());
    }

    #[test]
    fn corrupt_after_decryption_is_extract_error() {
        let src = tempfile::tempdir().unwrap();
        let bogus = src.path().join("bogus");
        std::fs::write(&bogus, b"still garbage").unwrap();
        let archive = src.path().join("diagnostic_snapshot_z.tgz");
        std::fs::write(&archive, b"garbage").unwrap();
        let cipher = FakeCipher { plain: bogus, calls: RefCell::new(vec![]) };
        let err = extract_snapshot(&archive, &src.path().join("out"), &cipher, &mut std::io::sink()).unwrap_err();
        assert!(matches!(err, SnapError::Extract));
    }

    #[test]
    fn extraction_dir_rules() {
        let mut s = Settings::default();
        let archive = Path::new("/data/diagnostic_snapshot_a.tgz");
        assert_eq!(extraction_dir(archive, None, &s), PathBuf::from("/data/diagnostic_snapshot_a"));
        assert_eq!(extraction_dir(archive, Some("/tmp/mon"), &s), PathBuf::from("/tmp/mon"));
        assert_eq!(extraction_dir(Path::new("/data/diagnostic_snapshot_b"), None, &s), PathBuf::from("/data/diagnostic_snapshot_b_extracted"));
        s.extract_to_snapshots_dir = true;
        s.snapshots_dir = "/srv/snaps".to_string();
        assert_eq!(extraction_dir(archive, None, &s), PathBuf::from("/srv/snaps/diagnostic_snapshot_a"));
        assert_eq!(extraction_dir(archive, Some("monday"), &s), PathBuf::from("/srv/snaps/monday"));
    }

    #[cfg(unix)]
    #[test]
    fn cipher_tool_exit_status_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let fail = CipherTool { program: "false".to_string() };
        assert!(matches!(fail.decrypt(&dir.path().join("a"), &dir.path().join("b")), Err(SnapError::WrongPassword)));
        let ok = CipherTool { program: "true".to_string() };
        assert!(ok.decrypt(&dir.path().join("a"), &dir.path().join("b")).is_ok());
        let missing = CipherTool { program: "/nonexistent/cipher-tool".to_string() };
        assert!(matches!(missing.decrypt(&dir.path().join("a"), &dir.path().join("b")), Err(SnapError::Decrypt(_))));
        // sh cannot open a script named "aes-256-cbc" and exits non-zero, but not with 1.
        let other = CipherTool { program: "sh".to_string() };
        match other.decrypt(&dir.path().join("a"), &dir.path().join("b")) {
            Err(SnapError::Decrypt(e)) => assert!(e.to_string().contains("sh exited with status"), "{}", e),
            r => panic!("unexpected {:?}", r),
        }
    }

    #[cfg(unix)]
    #[test]
    fn cipher_tool_killed_by_signal() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("cipher.sh");
        std::fs::write(&script, "#!/bin/sh\nkill -9 $$\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let tool = CipherTool { program: script.to_string_lossy().into_owned() };
        let mut res = tool.decrypt(&dir.path().join("a"), &dir.path().join("b"));
        // Another test thread may still hold the script open for writing across a fork.
        for _ in 0..20 {
            match &res { Err(SnapError::Decrypt(e)) if e.raw_os_error() == Some(26) => {} _ => break }
            std::thread::sleep(std::time::Duration::from_millis(50));
            res = tool.decrypt(&dir.path().join("a"), &dir.path().join("b"));
        }
        assert!(matches!(res, Err(SnapError::CipherSignal(9))), "{:?}", res);
    }
}
