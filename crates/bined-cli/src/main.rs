//! Command-line binary editor demo
//!
//! Opens a file, applies a list of operations in order and optionally saves the
//! result. Logging goes to stderr; dumps and state go to stdout.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p bined-cli -- [options] <file> [operations...]
//! ```
//!
//! # Options
//!
//! - `--mode memory|delta`: file handling mode (default from config, otherwise `memory`)
//! - `--config <file.json>`: load a session configuration
//! - `--read-only`: open without edit rights
//!
//! # Operations
//!
//! - `insert:<pos>:<hex>`: insert bytes
//! - `remove:<pos>:<len>`: remove bytes
//! - `overwrite:<pos>:<hex>`: overwrite bytes
//! - `undo` / `redo`
//! - `dump` or `dump:<pos>:<len>`: print a hex dump
//! - `switch:memory|delta`: switch the file handling mode
//! - `save` / `save-as:<path>`
//! - `info`: print the document and history state
//!
//! Positions and lengths accept decimal or `0x` hexadecimal.

use bined_core::{EditorSession, FileHandlingMode, SegmentsRepository, SessionConfig};
use std::env;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Bytes per hex dump row.
const DUMP_ROW: usize = 16;
/// Default number of bytes printed by a bare `dump`.
const DUMP_LIMIT: u64 = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Insert(u64, Vec<u8>),
    Remove(u64, u64),
    Overwrite(u64, Vec<u8>),
    Undo,
    Redo,
    Dump(Option<(u64, u64)>),
    Switch(FileHandlingMode),
    Save,
    SaveAs(PathBuf),
    Info,
}

#[derive(Debug)]
struct Options {
    file: PathBuf,
    config: Option<PathBuf>,
    mode: Option<FileHandlingMode>,
    read_only: bool,
    operations: Vec<Operation>,
}

#[derive(Debug, PartialEq, Eq)]
struct UsageError(String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for UsageError {}

fn usage_error(message: impl Into<String>) -> UsageError {
    UsageError(message.into())
}

fn parse_number(text: &str) -> Result<u64, UsageError> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| usage_error(format!("invalid number: {text}")))
}

fn parse_hex(text: &str) -> Result<Vec<u8>, UsageError> {
    let digits: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    hex::decode(&digits).map_err(|err| usage_error(format!("invalid hex {text:?}: {err}")))
}

fn parse_mode(text: &str) -> Result<FileHandlingMode, UsageError> {
    match text {
        "memory" => Ok(FileHandlingMode::Memory),
        "delta" => Ok(FileHandlingMode::Delta),
        other => Err(usage_error(format!("unknown mode: {other}"))),
    }
}

fn parse_operation(text: &str) -> Result<Operation, UsageError> {
    let mut parts = text.splitn(3, ':');
    let name = parts.next().unwrap_or_default();
    let first = parts.next();
    let second = parts.next();

    let operation = match (name, first, second) {
        ("insert", Some(pos), Some(hex)) => Operation::Insert(parse_number(pos)?, parse_hex(hex)?),
        ("remove", Some(pos), Some(len)) => {
            Operation::Remove(parse_number(pos)?, parse_number(len)?)
        }
        ("overwrite", Some(pos), Some(hex)) => {
            Operation::Overwrite(parse_number(pos)?, parse_hex(hex)?)
        }
        ("undo", None, None) => Operation::Undo,
        ("redo", None, None) => Operation::Redo,
        ("dump", None, None) => Operation::Dump(None),
        ("dump", Some(pos), Some(len)) => {
            Operation::Dump(Some((parse_number(pos)?, parse_number(len)?)))
        }
        ("switch", Some(mode), None) => Operation::Switch(parse_mode(mode)?),
        ("save", None, None) => Operation::Save,
        ("save-as", Some(path), rest) => {
            // Paths may contain ':'.
            let path = match rest {
                Some(rest) => format!("{path}:{rest}"),
                None => path.to_string(),
            };
            Operation::SaveAs(PathBuf::from(path))
        }
        ("info", None, None) => Operation::Info,
        _ => return Err(usage_error(format!("invalid operation: {text}"))),
    };
    Ok(operation)
}

fn parse_args(args: &[String]) -> Result<Options, UsageError> {
    let mut file = None;
    let mut config = None;
    let mut mode = None;
    let mut read_only = false;
    let mut operations = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--mode" => {
                let value = iter.next().ok_or_else(|| usage_error("--mode needs a value"))?;
                mode = Some(parse_mode(value)?);
            }
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| usage_error("--config needs a value"))?;
                config = Some(PathBuf::from(value));
            }
            "--read-only" => read_only = true,
            _ if file.is_none() => file = Some(PathBuf::from(arg)),
            _ => operations.push(parse_operation(arg)?),
        }
    }

    Ok(Options {
        file: file.ok_or_else(|| usage_error("missing file path"))?,
        config,
        mode,
        read_only,
        operations,
    })
}

fn hex_dump(offset: u64, data: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(DUMP_ROW).enumerate() {
        let address = offset + (row * DUMP_ROW) as u64;
        let columns: Vec<String> = chunk.iter().map(|b| hex::encode([*b])).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        out.push_str(&format!("{address:08x}  {:<48} |{ascii}|\n", columns.join(" ")));
    }
    out
}

fn apply(
    session: &mut EditorSession,
    repository: &mut SegmentsRepository,
    operation: &Operation,
) -> Result<(), Box<dyn Error>> {
    match operation {
        Operation::Insert(position, data) => session.insert(*position, data)?,
        Operation::Remove(position, length) => session.remove(*position, *length)?,
        Operation::Overwrite(position, data) => session.overwrite(*position, data)?,
        Operation::Undo => session.perform_undo()?,
        Operation::Redo => session.perform_redo()?,
        Operation::Dump(range) => {
            let (position, length) = range.unwrap_or((0, session.len().min(DUMP_LIMIT)));
            let data = session.get(position, length)?;
            print!("{}", hex_dump(position, &data));
        }
        Operation::Switch(mode) => session.switch_file_handling_mode(repository, *mode)?,
        Operation::Save => session.save_file(repository)?,
        Operation::SaveAs(path) => session.save_file_as(path)?,
        Operation::Info => {
            let document = session.get_document_state();
            let history = session.get_undo_redo_state();
            println!(
                "size={} modified={} mode={:?} editation={:?} segments={} memory={}",
                document.size,
                document.is_modified,
                document.file_handling_mode,
                document.editation_mode,
                document.segment_count,
                document.memory_usage,
            );
            println!(
                "commands={} position={} sync_point={:?} captured={}",
                history.undo_depth + history.redo_depth,
                history.command_position,
                history.sync_point,
                history.captured_bytes,
            );
        }
    }
    Ok(())
}

fn run(options: Options) -> Result<(), Box<dyn Error>> {
    let mut config = match &options.config {
        Some(path) => SessionConfig::from_path(path)?,
        None => SessionConfig::default(),
    };
    if let Some(mode) = options.mode {
        config.file_handling_mode = mode;
    }

    let mut repository = SegmentsRepository::from_config(&config);
    let mut session = EditorSession::new(config);
    session.open_document(&mut repository, &options.file, !options.read_only)?;

    let mut result = Ok(());
    for operation in &options.operations {
        if let Err(err) = apply(&mut session, &mut repository, operation) {
            result = Err(err);
            break;
        }
    }

    if session.is_modified() {
        info!("exiting with unsaved changes");
    }
    session.close_data(&mut repository);
    result
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("bined-cli");
    let options = match parse_args(args.get(1..).unwrap_or_default()) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{err}");
            eprintln!(
                "usage: {program} [--mode memory|delta] [--config <file.json>] [--read-only] \
                 <file> [operations...]"
            );
            eprintln!("\nexample:");
            eprintln!("  {program} --mode delta image.bin overwrite:0x10:deadbeef save");
            process::exit(2);
        }
    };

    if let Err(err) = run(options) {
        error!("{err}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_numbers_and_hex() {
        assert_eq!(parse_number("42").unwrap(), 42);
        assert_eq!(parse_number("0x10").unwrap(), 16);
        assert!(parse_number("x").is_err());
        assert_eq!(parse_hex("de ad be ef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(parse_hex("DEAD\tbeef\n").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(parse_hex("").unwrap(), Vec::<u8>::new());
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
        let err = parse_hex("0g").unwrap_err();
        assert!(err.0.contains("invalid hex"));
    }

    #[test]
    fn test_parse_operations() {
        assert_eq!(
            parse_operation("insert:0:4142").unwrap(),
            Operation::Insert(0, b"AB".to_vec())
        );
        assert_eq!(parse_operation("remove:0x4:2").unwrap(), Operation::Remove(4, 2));
        assert_eq!(parse_operation("dump").unwrap(), Operation::Dump(None));
        assert_eq!(
            parse_operation("switch:delta").unwrap(),
            Operation::Switch(FileHandlingMode::Delta)
        );
        assert_eq!(
            parse_operation("save-as:C:/tmp/out.bin").unwrap(),
            Operation::SaveAs(PathBuf::from("C:/tmp/out.bin"))
        );
        assert!(parse_operation("undo:1").is_err());
        assert!(parse_operation("frobnicate").is_err());
    }

    #[test]
    fn test_parse_args() {
        let options = parse_args(&args(&[
            "--mode",
            "delta",
            "--read-only",
            "file.bin",
            "dump:0:16",
            "info",
        ]))
        .unwrap();
        assert_eq!(options.file, PathBuf::from("file.bin"));
        assert_eq!(options.mode, Some(FileHandlingMode::Delta));
        assert!(options.read_only);
        assert_eq!(options.operations.len(), 2);

        assert!(parse_args(&args(&["--mode"])).is_err());
        assert!(parse_args(&args(&[])).is_err());
    }

    #[test]
    fn test_hex_dump() {
        let dump = hex_dump(0x20, b"Hello\x00world!");
        assert!(dump.starts_with("00000020  48 65 6c 6c 6f 00"));
        assert!(dump.trim_end().ends_with("|Hello.world!|"));
    }
}
