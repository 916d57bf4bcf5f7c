use env_logger::Target;
use std::fs;
use std::io;
use std::path::Path;

/// Initialise `env_logger` at info level (overridable with `RUST_LOG`).
///
/// With `log_file`, records are appended there; if it cannot be opened, they go to stderr.
pub fn init_with(log_file: Option<&Path>) {
    let target = log_file
        .and_then(|path| match open_append(path) {
            Ok(file) => Some(Target::Pipe(Box::new(file))),
            Err(err) => {
                eprintln!("⚠️  Cannot open log file {}: {}", path.display(), err);
                None
            }
        })
        .unwrap_or(Target::Stderr);

    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .target(target)
        .try_init();
}

fn open_append(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn log_file_and_parent_are_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("persist-usb.log");
        open_append(&path).unwrap();
        assert!(path.is_file());
    }
}
