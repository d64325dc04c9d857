//! Command handler modules for mtb-cli.
//!
//! Shared utilities used by multiple command paths live here.

pub mod client;

use anyhow::{Context, Result};
use std::fs;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Payload from an inline argument or a file (recommended on Windows, where
/// quoting caret lines and JSON in the shell is painful). Defaults to empty.
pub fn load_payload(payload: Option<String>, payload_file: Option<String>) -> Result<String> {
    if let Some(p) = payload_file {
        let bytes = fs::read(&p).with_context(|| format!("read payload-file failed: {}", p))?;
        let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
        let raw = String::from_utf8(bytes.to_vec()).context("payload-file must be UTF-8 text")?;
        return Ok(raw.trim_end_matches(['\r', '\n']).to_string());
    }
    Ok(payload.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_file_strips_bom_and_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.txt");
        fs::write(&path, b"\xEF\xBB\xBFORDER^BUY^EURUSD^\r\n").unwrap();
        let got = load_payload(None, Some(path.to_string_lossy().to_string())).unwrap();
        assert_eq!(got, "ORDER^BUY^EURUSD^");
    }

    #[test]
    fn inline_payload_is_verbatim() {
        assert_eq!(load_payload(Some(" x ".into()), None).unwrap(), " x ");
        assert_eq!(load_payload(None, None).unwrap(), "");
    }
}
