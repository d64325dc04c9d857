//! Caret-delimited terminal messages: `CODE^SUB^param1^param2^`.
//!
//! Trailing empty fields are padding and are dropped on parse. An empty field
//! between two non-empty ones means a stray delimiter and is rejected.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalMessage {
    /// Function code, e.g. `F020`.
    pub code: String,
    pub sub_command: String,
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Fewer than the `CODE^SUB^` fields.
    TooShort { fields: usize },
    /// The code field is blank.
    EmptyCode,
    /// An empty field in the middle of the parameter list.
    HiddenDelimiter { index: usize },
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::TooShort { fields } => write!(
                f,
                "invalid terminal message: expected at least 3 '^'-separated fields, got {fields}"
            ),
            MessageError::EmptyCode => write!(f, "invalid terminal message: empty code"),
            MessageError::HiddenDelimiter { index } => write!(
                f,
                "invalid terminal message: hidden '^' delimiter at parameter {index}"
            ),
        }
    }
}

impl std::error::Error for MessageError {}

impl TerminalMessage {
    pub fn new(code: impl Into<String>, sub_command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            code: code.into(),
            sub_command: sub_command.into(),
            params,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, MessageError> {
        let raw = raw.trim_end_matches(['\r', '\n', '\0']);
        let parts: Vec<&str> = raw.split('^').collect();
        if parts.len() < 3 {
            return Err(MessageError::TooShort {
                fields: parts.len(),
            });
        }

        let code = parts[0].trim();
        if code.is_empty() {
            return Err(MessageError::EmptyCode);
        }

        let mut data = &parts[2..];
        while let Some((last, rest)) = data.split_last() {
            if !last.is_empty() {
                break;
            }
            data = rest;
        }

        if let Some(index) = data.iter().position(|p| p.is_empty()) {
            return Err(MessageError::HiddenDelimiter { index });
        }

        Ok(Self {
            code: code.to_string(),
            sub_command: parts[1].to_string(),
            params: data.iter().map(|p| p.to_string()).collect(),
        })
    }
}

impl fmt::Display for TerminalMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}^{}^", self.code, self.sub_command)?;
        for p in &self.params {
            write!(f, "{p}^")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_drops_trailing_padding() {
        let m = TerminalMessage::parse("F123^Y^param1^param2^param3^^").unwrap();
        assert_eq!(m.code, "F123");
        assert_eq!(m.sub_command, "Y");
        assert_eq!(m.params, vec!["param1", "param2", "param3"]);
    }

    #[test]
    fn parse_accepts_message_without_params() {
        let m = TerminalMessage::parse("F000^1^").unwrap();
        assert_eq!(m.code, "F000");
        assert!(m.params.is_empty());
    }

    #[test]
    fn parse_rejects_hidden_delimiter() {
        let err = TerminalMessage::parse("F020^2^EURUSD^^1.1^").unwrap_err();
        assert_eq!(err, MessageError::HiddenDelimiter { index: 1 });
    }

    #[test]
    fn parse_rejects_short_and_blank_code() {
        assert_eq!(
            TerminalMessage::parse("F000").unwrap_err(),
            MessageError::TooShort { fields: 1 }
        );
        assert_eq!(
            TerminalMessage::parse("^1^x").unwrap_err(),
            MessageError::EmptyCode
        );
    }

    #[test]
    fn display_terminates_every_field() {
        let m = TerminalMessage::new("F020", "2", vec!["EURUSD".to_string()]);
        assert_eq!(m.to_string(), "F020^2^EURUSD^");
        assert_eq!(TerminalMessage::parse(&m.to_string()).unwrap(), m);
    }
}
