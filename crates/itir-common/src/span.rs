use std::fmt;

use serde::{Deserialize, Serialize};

/// A source location attached to an IR node by the front-end.
///
/// Positions are 1-based line/column pairs into the user's kernel source.
/// The IR never reads the source itself; locations only travel with nodes
/// so that type errors can point back at the offending user code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub filename: String,
    pub line: u32,
    pub column: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u32>,
}

impl SourceLocation {
    /// Create a point location.
    pub fn new(filename: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            filename: filename.into(),
            line,
            column,
            end_line: None,
            end_column: None,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.filename, self.line, self.column)?;
        if let (Some(line), Some(col)) = (self.end_line, self.end_column) {
            write!(f, "-{}:{}", line, col)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_point_location() {
        let loc = SourceLocation::new("lap.py", 12, 5);
        assert_eq!(loc.to_string(), "lap.py:12:5");
    }

    #[test]
    fn display_range_location() {
        let loc = SourceLocation {
            end_line: Some(13),
            end_column: Some(1),
            ..SourceLocation::new("lap.py", 12, 5)
        };
        assert_eq!(loc.to_string(), "lap.py:12:5-13:1");
    }
}
