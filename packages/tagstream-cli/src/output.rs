use crate::exit_codes;
use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;
use tagstream::Channel;

/// Serialize a command result and write it to `output_path` or stdout.
/// Returns the exit code of the command.
pub fn emit<T: Serialize>(value: &T, compact: bool, output_path: Option<&str>) -> i32 {
    match to_json(value, compact).and_then(|json| write_output(&json, output_path)) {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_codes::EXECUTION_ERROR
        }
    }
}

fn to_json<T: Serialize>(value: &T, compact: bool) -> Result<String, String> {
    let json = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    json.map_err(|e| format!("JSON serialization failed: {}", e))
}

fn write_output(json: &str, output_path: Option<&str>) -> Result<(), String> {
    match output_path {
        Some(path) => std::fs::write(Path::new(path), json)
            .map_err(|e| format!("Failed to write output file '{}': {}", path, e)),
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(json.as_bytes())
                .and_then(|_| handle.write_all(b"\n"))
                .map_err(|e| format!("Failed to write to stdout: {}", e))
        }
    }
}

/// Human readable channel listing, one channel per line
pub fn channel_table(model: &str, serial: &str, channels: &[Channel]) -> String {
    let mut table = format!("{} ({})\n\n", model, serial);
    for &channel in channels {
        let edge = if channel > 0 { "rising" } else { "falling" };
        let _ = writeln!(table, "  {:>4}  {}", channel, edge);
    }
    table
}
