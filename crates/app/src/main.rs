//! Command-line front end: apply byte edits to a file in place and dump it.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "app", about = "Edit large files in place", version)]
struct Cli {
    /// File to edit
    path: std::path::PathBuf,

    /// insert:OFF:HEX, remove:START:END or replace:START:END:HEX; applied in order
    #[arg(long = "edit", value_parser = parse_edit)]
    edits: Vec<Edit>,

    /// Hex dump OFF:LEN of the edited document
    #[arg(long, value_parser = parse_dump)]
    dump: Option<Dump>,

    /// Apply the edits in memory only
    #[arg(long)]
    dry_run: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Edit {
    Insert {
        offset: u64,
        data: Vec<u8>,
    },
    Remove {
        range: std::ops::Range<u64>,
    },
    Replace {
        range: std::ops::Range<u64>,
        data: Vec<u8>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Dump {
    offset: u64,
    len: u64,
}

const DUMP_WIDTH: usize = 16;

fn main() -> std::process::ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "editor_core=info,editor_state=info,app=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match run(&cli, &mut std::io::stdout().lock()) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(path = ?cli.path, %err, "edit failed");
            eprintln!("error: {err}");

            std::process::ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, out: &mut impl std::io::Write) -> Result<(), Box<dyn std::error::Error>> {
    let config = editor_core::config::PieceConfig::from_env()?;
    let mut document = editor_state::document::Document::open_with(&cli.path, config)?;

    for edit in &cli.edits {
        tracing::debug!(?edit, "applying edit");

        match edit {
            Edit::Insert { offset, data } => document.insert(*offset, data)?,
            Edit::Remove { range } => document.remove(range.clone())?,
            Edit::Replace { range, data } => document.replace(range.clone(), data)?,
        }
    }

    if let Some(dump) = cli.dump {
        write_dump(document.file()?, dump, out)?;
    }

    if cli.dry_run {
        tracing::info!(edits = cli.edits.len(), "dry run, nothing written");

        return Ok(());
    }

    if document.file()?.has_changes() {
        document.save()?;
    }

    Ok(())
}

/*

===================
===== PARSING =====
===================

*/

fn parse_edit(raw: &str) -> Result<Edit, String> {
    let usage =
        || format!("expected insert:OFF:HEX, remove:START:END or replace:START:END:HEX, got '{raw}'");
    let (kind, rest) = raw.split_once(':').ok_or_else(usage)?;
    let fields: Vec<&str> = rest.split(':').collect();

    match (kind, fields.as_slice()) {
        ("insert", [offset, hex]) => Ok(Edit::Insert {
            offset: parse_offset(offset)?,
            data: parse_hex(hex)?,
        }),
        ("remove", [start, end]) => Ok(Edit::Remove {
            range: parse_range(start, end)?,
        }),
        ("replace", [start, end, hex]) => Ok(Edit::Replace {
            range: parse_range(start, end)?,
            data: parse_hex(hex)?,
        }),
        _ => Err(usage()),
    }
}

fn parse_dump(raw: &str) -> Result<Dump, String> {
    let (offset, len) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected OFF:LEN, got '{raw}'"))?;

    Ok(Dump {
        offset: parse_offset(offset)?,
        len: parse_offset(len)?,
    })
}

/// Decimal, or hexadecimal with a `0x` prefix.
fn parse_offset(raw: &str) -> Result<u64, String> {
    let parsed = match raw.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse::<u64>(),
    };

    parsed.map_err(|err| format!("invalid offset '{raw}': {err}"))
}

fn parse_range(start: &str, end: &str) -> Result<std::ops::Range<u64>, String> {
    let (start, end) = (parse_offset(start)?, parse_offset(end)?);

    if start > end {
        return Err(format!("range start {start} is after its end {end}"));
    }

    Ok(start..end)
}

fn parse_hex(raw: &str) -> Result<Vec<u8>, String> {
    if raw.len() % 2 != 0 {
        return Err(format!("hex data '{raw}' has an odd number of digits"));
    }

    (0..raw.len())
        .step_by(2)
        .map(|i| {
            raw.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid hex data '{raw}'"))
        })
        .collect()
}

/*

================
===== DUMP =====
================

*/

fn write_dump<B: io::backing::Backing>(
    file: &editor_core::piece_table::file::PieceFile<B>,
    dump: Dump,
    out: &mut impl std::io::Write,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut line = Vec::with_capacity(DUMP_WIDTH);
    let mut line_offset = dump.offset;

    for byte in file.bytes(dump.offset).take(usize::try_from(dump.len)?) {
        line.push(byte?);

        if line.len() == DUMP_WIDTH {
            writeln!(out, "{}", format_line(line_offset, &line))?;
            line_offset += DUMP_WIDTH as u64;
            line.clear();
        }
    }

    if !line.is_empty() {
        writeln!(out, "{}", format_line(line_offset, &line))?;
    }

    Ok(())
}

/// `OFFSET  HEX BYTES  |ASCII|`, padded so the ASCII column lines up.
fn format_line(offset: u64, bytes: &[u8]) -> String {
    let hex: String = bytes.iter().map(|byte| format!("{byte:02x} ")).collect();
    let ascii: String = bytes
        .iter()
        .map(|&byte| {
            if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            }
        })
        .collect();

    format!("{offset:08x}  {hex:<width$} |{ascii}|", width = DUMP_WIDTH * 3)
}
