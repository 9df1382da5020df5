//! Async rotated-file logger
//!
//! Call sites go through the `log_*!` macros, which consult an `AtomicU8`
//! level mask and expand to nothing observable when the level is off. An
//! enabled line is formatted once, printed to stdout, and — unless it is
//! `Msg`, the console-only level — serialized into a bounded
//! [`RingBuffer`] that a dedicated flush thread drains into date+index
//! rotated files (`<dir>/<YYYY-MM-DD>_<index>.log`).
//!
//! A full ring drops the line rather than stalling the I/O thread; the
//! drop count is reported by [`Logger::shutdown`].
//!
//! Configuration comes from an INI file (`LOG_GLOBAL`, `LOG_ASYNC`,
//! `LOG_LEVEL` sections); a watcher thread polls the file's mtime once a
//! second and applies edits in place. Missing keys keep their defaults;
//! present-but-unparseable keys keep the default and warn on stderr.
//!
//! Lifecycle: [`init`] installs the process-wide instance (create it before
//! the reactor); [`shutdown`] stops both threads and flushes (call it after
//! the worker threads have joined).

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;
use thiserror::Error;

use bytewire_containers::RingBuffer;

use crate::ini::IniReader;

const GLOBAL_SECTION: &str = "LOG_GLOBAL";
const ASYNC_SECTION: &str = "LOG_ASYNC";
const LEVEL_SECTION: &str = "LOG_LEVEL";

const CONFIG_POLL: Duration = Duration::from_secs(1);
const FLUSH_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LogKitError {
    #[error("logger already initialized")]
    AlreadyInitialized,
}

/// Log severities. `Msg` goes to the console only; everything else is also
/// mirrored to the rotated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Level {
    Msg = 0,
    Info = 1,
    Warn = 2,
    Debug = 3,
    Error = 4,
}

impl Level {
    #[inline]
    pub fn bit(self) -> u8 {
        1 << self as u8
    }

    pub fn tag(self) -> &'static str {
        match self {
            Level::Msg => "[MSG]",
            Level::Info => "[INFO]",
            Level::Warn => "[WARN]",
            Level::Debug => "[DEBUG]",
            Level::Error => "[ERROR]",
        }
    }
}

/// Effective configuration, reloaded whole on every change.
#[derive(Debug, Clone)]
struct LogConfig {
    max_file_size: usize,
    print_line: bool,
    print_func: bool,
    print_time: bool,
    log_directory: PathBuf,
    batch_size: usize,
    max_flush_size: usize,
    level_mask: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024,
            print_line: false,
            print_func: false,
            print_time: true,
            log_directory: PathBuf::from("./logs"),
            batch_size: 4 * 1024,
            max_flush_size: 64 * 1024,
            level_mask: Level::Msg.bit()
                | Level::Info.bit()
                | Level::Warn.bit()
                | Level::Error.bit(),
        }
    }
}

impl LogConfig {
    /// Read every known key, keeping the default for absent ones and
    /// warning for unparseable ones. Also returns the configured ring
    /// capacity, which only applies at construction time.
    fn load(ini: &IniReader) -> (Self, usize) {
        let mut cfg = Self::default();

        cfg.max_file_size =
            usize_key(ini, GLOBAL_SECTION, "max_file_size_kb", cfg.max_file_size / 1024) * 1024;
        cfg.print_line = bool_key(ini, GLOBAL_SECTION, "print_line", cfg.print_line);
        cfg.print_func = bool_key(ini, GLOBAL_SECTION, "print_func", cfg.print_func);
        cfg.print_time = bool_key(ini, GLOBAL_SECTION, "print_time", cfg.print_time);
        if let Some(dir) = ini.get_string(GLOBAL_SECTION, "log_directory") {
            cfg.log_directory = PathBuf::from(dir);
        }

        let ring_capacity =
            usize_key(ini, ASYNC_SECTION, "ring_buffer_size_kb", 64) * 1024;
        cfg.batch_size =
            usize_key(ini, ASYNC_SECTION, "batch_size_kb", cfg.batch_size / 1024) * 1024;
        cfg.max_flush_size =
            usize_key(ini, ASYNC_SECTION, "max_flush_size", cfg.max_flush_size);

        let mut mask = 0u8;
        for (key, level) in [
            ("msg", Level::Msg),
            ("info", Level::Info),
            ("warn", Level::Warn),
            ("debug", Level::Debug),
            ("error", Level::Error),
        ] {
            let default = cfg.level_mask & level.bit() != 0;
            if bool_key(ini, LEVEL_SECTION, key, default) {
                mask |= level.bit();
            }
        }
        cfg.level_mask = mask;

        (cfg, ring_capacity)
    }
}

fn usize_key(ini: &IniReader, section: &str, key: &str, default: usize) -> usize {
    match ini.get_string(section, key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            eprintln!("logkit: [{section}] {key} = {raw:?} is not a number, keeping {default}");
            default
        }),
    }
}

fn bool_key(ini: &IniReader, section: &str, key: &str, default: bool) -> bool {
    match ini.get_string(section, key) {
        None => default,
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => {
                eprintln!("logkit: [{section}] {key} = {raw:?} is not a bool, keeping {default}");
                default
            }
        },
    }
}

/// Current output file plus the rotation counters.
struct FileManager {
    file: Option<File>,
    date: String,
    index: usize,
    written: u64,
}

impl FileManager {
    fn new() -> Self {
        Self {
            file: None,
            date: String::new(),
            index: 0,
            written: 0,
        }
    }

    /// Ensure the open file matches today's date and the size cap: a new
    /// date resets the index, an oversized file bumps it.
    fn rotate_if_needed(&mut self, dir: &Path, max_file_size: usize) -> std::io::Result<()> {
        let today = Local::now().format("%Y-%m-%d").to_string();
        if today != self.date {
            self.date = today;
            self.index = 0;
            self.open_current(dir)?;
        } else if self.written > max_file_size as u64 {
            self.index += 1;
            self.open_current(dir)?;
        } else if self.file.is_none() {
            self.open_current(dir)?;
        }
        Ok(())
    }

    fn open_current(&mut self, dir: &Path) -> std::io::Result<()> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}_{}.log", self.date, self.index));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.written = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.file = Some(file);
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(bytes)?;
            self.written += bytes.len() as u64;
        }
        Ok(())
    }

    fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }
}

struct LoggerShared {
    ini: IniReader,
    config: RwLock<LogConfig>,
    level_mask: AtomicU8,
    ring: RingBuffer,
    flush_gate: Mutex<()>,
    flush_wakeup: Condvar,
    running: AtomicBool,
    dropped: AtomicU64,
}

impl LoggerShared {
    fn reload(&self) {
        let (cfg, _ring) = LogConfig::load(&self.ini);
        self.level_mask.store(cfg.level_mask, Ordering::Relaxed);
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = cfg;
    }
}

/// A complete logger instance: formatting front-end, bounded async mirror,
/// flush thread, config watcher thread.
///
/// Most programs use the process-wide instance through [`init`] and the
/// `log_*!` macros; standalone instances exist for tests and embedding.
pub struct Logger {
    shared: Arc<LoggerShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Logger {
    /// Build a logger configured from `config_path` and start its flush and
    /// watcher threads.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        let ini = IniReader::new(config_path);
        let (config, ring_capacity) = LogConfig::load(&ini);

        let shared = Arc::new(LoggerShared {
            ini,
            level_mask: AtomicU8::new(config.level_mask),
            config: RwLock::new(config),
            ring: RingBuffer::new(ring_capacity.max(1024)),
            flush_gate: Mutex::new(()),
            flush_wakeup: Condvar::new(),
            running: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
        });

        let mut threads = Vec::with_capacity(2);
        {
            let shared = Arc::clone(&shared);
            threads.push(
                thread::Builder::new()
                    .name("bytewire-logflush".into())
                    .spawn(move || flush_loop(shared))
                    .expect("failed to spawn log flush thread"),
            );
        }
        {
            let shared = Arc::clone(&shared);
            threads.push(
                thread::Builder::new()
                    .name("bytewire-logconf".into())
                    .spawn(move || watch_loop(shared))
                    .expect("failed to spawn log config thread"),
            );
        }

        Self {
            shared,
            threads: Mutex::new(threads),
        }
    }

    #[inline]
    pub fn enabled(&self, level: Level) -> bool {
        self.shared.level_mask.load(Ordering::Relaxed) & level.bit() != 0
    }

    /// Format and emit one line. Disabled levels return after one atomic
    /// load.
    pub fn log(&self, level: Level, target: &str, line: u32, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        let (print_time, print_func, print_line) = {
            let cfg = self.shared.config.read().unwrap_or_else(|e| e.into_inner());
            (cfg.print_time, cfg.print_func, cfg.print_line)
        };

        let mut out = String::with_capacity(96);
        if print_time {
            out.push_str(&Local::now().format("%Y-%m-%d %H:%M:%S ").to_string());
        }
        out.push_str(level.tag());
        out.push(' ');
        if print_func {
            out.push_str(target);
            out.push(' ');
        }
        if print_line {
            let _ = fmt::Write::write_fmt(&mut out, format_args!("L{line} "));
        }
        let _ = fmt::Write::write_fmt(&mut out, args);
        out.push('\n');

        {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            let _ = handle.write_all(out.as_bytes());
        }

        if level != Level::Msg {
            if self.shared.ring.write(out.as_bytes()).is_ok() {
                self.shared.flush_wakeup.notify_one();
            } else {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Emit frames as comma-joined decimal bytes, one line per frame.
    pub fn log_frames(&self, level: Level, target: &str, line: u32, frames: &[Vec<u8>]) {
        for frame in frames {
            let mut body = String::with_capacity(frame.len() * 4);
            for (i, byte) in frame.iter().enumerate() {
                if i != 0 {
                    body.push(',');
                }
                let _ = fmt::Write::write_fmt(&mut body, format_args!("{byte}"));
            }
            self.log(level, target, line, format_args!("{body}"));
        }
    }

    /// Re-read the config file immediately (the watcher does this on mtime
    /// change).
    pub fn reload(&self) {
        self.shared.reload();
    }

    /// Stop both threads, drain the ring, flush the file. Returns how many
    /// lines were dropped because the ring was full. Idempotent.
    pub fn shutdown(&self) -> u64 {
        self.shared.running.store(false, Ordering::Release);
        self.shared.flush_wakeup.notify_all();
        let handles: Vec<_> = {
            let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
            threads.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn flush_loop(shared: Arc<LoggerShared>) {
    let mut files = FileManager::new();
    let mut unflushed = 0usize;

    loop {
        {
            let gate = shared.flush_gate.lock().unwrap_or_else(|e| e.into_inner());
            let _ = shared
                .flush_wakeup
                .wait_timeout(gate, FLUSH_TICK)
                .unwrap_or_else(|e| e.into_inner());
        }

        loop {
            let (dir, max_file_size, batch_size, max_flush_size) = {
                let cfg = shared.config.read().unwrap_or_else(|e| e.into_inner());
                (
                    cfg.log_directory.clone(),
                    cfg.max_file_size,
                    cfg.batch_size,
                    cfg.max_flush_size,
                )
            };
            let n = shared.ring.len().min(batch_size.max(1));
            if n == 0 {
                break;
            }
            let Ok(batch) = shared.ring.read(n) else { break };
            if let Err(e) = files
                .rotate_if_needed(&dir, max_file_size)
                .and_then(|_| files.write_all(&batch))
            {
                eprintln!("logkit: flush failed: {e}");
                break;
            }
            unflushed += n;
            if unflushed >= max_flush_size {
                files.flush();
                unflushed = 0;
            }
        }

        if !shared.running.load(Ordering::Acquire) && shared.ring.is_empty() {
            break;
        }
    }
    files.flush();
}

fn watch_loop(shared: Arc<LoggerShared>) {
    let mut last_modified = None;
    while shared.running.load(Ordering::Acquire) {
        if let Ok(modified) = fs::metadata(shared.ini.path()).and_then(|m| m.modified()) {
            if last_modified != Some(modified) {
                last_modified = Some(modified);
                shared.reload();
            }
        }
        // Sleep in short slices so shutdown is not held up a full second.
        let mut slept = Duration::ZERO;
        while slept < CONFIG_POLL && shared.running.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(100));
            slept += Duration::from_millis(100);
        }
    }
}

// ── Process-wide instance ─────────────────────────────────────────

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Install the process-wide logger. Create it before the reactor starts;
/// fails if called twice.
pub fn init(config_path: impl Into<PathBuf>) -> Result<(), LogKitError> {
    let logger = Logger::new(config_path);
    LOGGER
        .set(logger)
        .map_err(|_| LogKitError::AlreadyInitialized)
}

/// The installed logger, if [`init`] has run.
pub fn global() -> Option<&'static Logger> {
    LOGGER.get()
}

/// Stop the process-wide logger's threads and flush. Returns the dropped
/// line count; zero when the logger was never installed. Call after all
/// worker threads have joined.
pub fn shutdown() -> u64 {
    LOGGER.get().map(Logger::shutdown).unwrap_or(0)
}

/// Macro support: one relaxed load when installed, `false` otherwise.
#[doc(hidden)]
#[inline]
pub fn _enabled(level: Level) -> bool {
    LOGGER.get().is_some_and(|l| l.enabled(level))
}

#[doc(hidden)]
pub fn _log(level: Level, target: &str, line: u32, args: fmt::Arguments<'_>) {
    if let Some(logger) = LOGGER.get() {
        logger.log(level, target, line, args);
    }
}

#[doc(hidden)]
pub fn _log_frames(level: Level, target: &str, line: u32, frames: &[Vec<u8>]) {
    if let Some(logger) = LOGGER.get() {
        logger.log_frames(level, target, line, frames);
    }
}

#[macro_export]
macro_rules! log_msg {
    ($($arg:tt)*) => {{
        if $crate::logger::_enabled($crate::Level::Msg) {
            $crate::logger::_log($crate::Level::Msg, module_path!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        if $crate::logger::_enabled($crate::Level::Info) {
            $crate::logger::_log($crate::Level::Info, module_path!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        if $crate::logger::_enabled($crate::Level::Warn) {
            $crate::logger::_log($crate::Level::Warn, module_path!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        if $crate::logger::_enabled($crate::Level::Debug) {
            $crate::logger::_log($crate::Level::Debug, module_path!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        if $crate::logger::_enabled($crate::Level::Error) {
            $crate::logger::_log($crate::Level::Error, module_path!(), line!(), format_args!($($arg)*));
        }
    }};
}

/// Dump frames (one log line each, decimal comma-joined bytes) at `Msg`
/// level.
#[macro_export]
macro_rules! log_frames {
    ($frames:expr) => {{
        if $crate::logger::_enabled($crate::Level::Msg) {
            $crate::logger::_log_frames($crate::Level::Msg, module_path!(), line!(), $frames);
        }
    }};
}
