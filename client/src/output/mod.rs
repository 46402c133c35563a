//! Console rendering for client results

use protocol::packets::FileEntry;
use std::fmt::Write;

/// One line per file: name, then its CRC-32 in hex
pub fn format_listing(entries: &[FileEntry]) -> String {
    if entries.is_empty() {
        return "No files stored\n".to_string();
    }

    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0).max(4);
    let mut out = String::new();
    let _ = writeln!(out, "{:<width$}  CRC-32", "Name");
    for entry in entries {
        let _ = writeln!(out, "{:<width$}  {:08x}", entry.name, entry.checksum);
    }
    let _ = writeln!(out, "{} file(s)", entries.len());
    out
}
