//! Source listings: a window of lines around a center line, with one marker column.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use crate::errors::{DebuggerError, Result};
use crate::symbols::SourceLocation;

/// How many lines are shown before and after the center line
pub const CONTEXT_LINES: usize = 3;

/// What the marker column shows for a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// The debuggee is stopped here
    Cursor,
    Breakpoint,
    None,
}

impl Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = match self {
            Marker::Cursor => '>',
            Marker::Breakpoint => '*',
            Marker::None => ' ',
        };
        write!(f, "{c}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLine {
    /// 1-based
    pub number: usize,
    pub marker: Marker,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub file: PathBuf,
    pub lines: Vec<ListingLine>,
}

impl Listing {
    /// Builds the window around `center` from the contents of `file`
    ///
    /// The cursor marker wins over the breakpoint marker when both apply to a line.
    pub fn build(
        source: &str,
        file: &Path,
        center: usize,
        cursor: Option<&SourceLocation>,
        breakpoints: &[usize],
    ) -> Self {
        let first = center.saturating_sub(CONTEXT_LINES).max(1);
        let last = center.saturating_add(CONTEXT_LINES);
        let cursor_line = cursor.filter(|c| c.file == file).map(|c| c.line);

        let lines = source
            .lines()
            .enumerate()
            .map(|(idx, text)| (idx + 1, text))
            .skip(first - 1)
            .take_while(|(number, _)| *number <= last)
            .map(|(number, text)| ListingLine {
                number,
                marker: if cursor_line == Some(number) {
                    Marker::Cursor
                } else if breakpoints.contains(&number) {
                    Marker::Breakpoint
                } else {
                    Marker::None
                },
                text: text.to_string(),
            })
            .collect();

        Self {
            file: file.to_owned(),
            lines,
        }
    }

    /// Like [`Listing::build`], reading `file` from disk
    pub fn read(
        file: &Path,
        center: usize,
        cursor: Option<&SourceLocation>,
        breakpoints: &[usize],
    ) -> Result<Self> {
        let source = std::fs::read_to_string(file)
            .map_err(|e| DebuggerError::SourceUnavailable(file.to_owned(), e))?;
        Ok(Self::build(&source, file, center, cursor, breakpoints))
    }
}

impl Display for Listing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        for line in &self.lines {
            writeln!(f, "{} {} {}", line.marker, line.number, line.text)?;
        }
        Ok(())
    }
}
