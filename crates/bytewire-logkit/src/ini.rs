//! Minimal INI accessor
//!
//! `[section]` headers, `key = value` pairs, `;` comments, whitespace
//! trimmed everywhere. The file is re-read on every query — the watcher
//! thread in the logger relies on this to make hot reload a pure function
//! of the file contents.

use std::fs;
use std::path::{Path, PathBuf};

pub struct IniReader {
    path: PathBuf,
}

impl IniReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true|1` / `false|0`, case-insensitive. `None` when the key is
    /// missing or holds anything else.
    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        match self.get_string(section, key)?.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }

    pub fn get_usize(&self, section: &str, key: &str) -> Option<usize> {
        self.get_string(section, key)?.parse().ok()
    }

    /// Raw value with comment stripped and whitespace trimmed. `None` when
    /// the file is unreadable, the section is absent, the key is absent, or
    /// the value trims to nothing.
    pub fn get_string(&self, section: &str, key: &str) -> Option<String> {
        let contents = fs::read_to_string(&self.path).ok()?;
        let mut in_section = false;
        for line in contents.lines() {
            let line = strip_comment(line).trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = section_name(line) {
                in_section = name == section;
                continue;
            }
            if !in_section {
                continue;
            }
            if let Some((k, v)) = line.split_once('=') {
                if k.trim() == key {
                    let v = v.trim();
                    return (!v.is_empty()).then(|| v.to_string());
                }
            }
        }
        None
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn section_name(line: &str) -> Option<&str> {
    line.strip_prefix('[')?.strip_suffix(']')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture(contents: &str) -> (tempfile::TempDir, IniReader) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        (dir, IniReader::new(path))
    }

    const SAMPLE: &str = "\
; top comment
[LOG_GLOBAL]
max_file_size_kb = 1024   ; one megabyte
log_directory = ./logs
print_time = TRUE
print_line = 0

[LOG_LEVEL]
debug = false
error = 1
";

    #[test]
    fn test_string_values_trimmed() {
        let (_d, ini) = fixture(SAMPLE);
        assert_eq!(
            ini.get_string("LOG_GLOBAL", "log_directory").as_deref(),
            Some("./logs")
        );
    }

    #[test]
    fn test_inline_comment_stripped() {
        let (_d, ini) = fixture(SAMPLE);
        assert_eq!(ini.get_usize("LOG_GLOBAL", "max_file_size_kb"), Some(1024));
    }

    #[test]
    fn test_bool_spellings() {
        let (_d, ini) = fixture(SAMPLE);
        assert_eq!(ini.get_bool("LOG_GLOBAL", "print_time"), Some(true));
        assert_eq!(ini.get_bool("LOG_GLOBAL", "print_line"), Some(false));
        assert_eq!(ini.get_bool("LOG_LEVEL", "debug"), Some(false));
        assert_eq!(ini.get_bool("LOG_LEVEL", "error"), Some(true));
    }

    #[test]
    fn test_missing_section_key_and_file() {
        let (_d, ini) = fixture(SAMPLE);
        assert_eq!(ini.get_string("NO_SECTION", "x"), None);
        assert_eq!(ini.get_string("LOG_GLOBAL", "nope"), None);
        let gone = IniReader::new("/nonexistent/config.ini");
        assert_eq!(gone.get_string("LOG_GLOBAL", "log_directory"), None);
    }

    #[test]
    fn test_key_not_matched_across_sections() {
        let (_d, ini) = fixture(SAMPLE);
        // `error` lives in LOG_LEVEL, not LOG_GLOBAL.
        assert_eq!(ini.get_bool("LOG_GLOBAL", "error"), None);
    }

    #[test]
    fn test_reread_picks_up_edits() {
        let (dir, ini) = fixture(SAMPLE);
        std::fs::write(
            dir.path().join("config.ini"),
            "[LOG_GLOBAL]\nlog_directory = /var/log/bw\n",
        )
        .unwrap();
        assert_eq!(
            ini.get_string("LOG_GLOBAL", "log_directory").as_deref(),
            Some("/var/log/bw")
        );
    }

    #[test]
    fn test_garbage_value_is_none() {
        let (_d, ini) = fixture("[S]\nn = twelve\nb = maybe\nempty =\n");
        assert_eq!(ini.get_usize("S", "n"), None);
        assert_eq!(ini.get_bool("S", "b"), None);
        assert_eq!(ini.get_string("S", "empty"), None);
    }
}
