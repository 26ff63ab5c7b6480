//! Source positions and diagnostic rendering.
//!
//! Every token, AST node and opcode carries a [`Pos`]. When an error is
//! raised, a [`SourceInfo`] snapshots the offending line (plus the lines
//! around it) so the driver can print a caret diagnostic without keeping
//! the whole source alive:
//!
//! ```text
//! ERROR(SyntaxError): unexpected token ")".
//!   at : gcd.cb:3
//!   2 | func gcd(a, b) {
//!   3 |     if (b == 0)) return a;
//!     |                ^
//!   4 |     return gcd(b, a % b);
//! ```

use std::fmt;

/// A 1-based (line, column) position in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    /// Placeholder for positions that are not known (line 0 never exists).
    pub const UNSET: Pos = Pos { line: 0, col: 0 };

    pub fn is_set(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Snapshot of the source context around an error position.
///
/// Captured eagerly when the error is constructed; the line before and
/// after the offending one are kept for context.
#[derive(Debug, Clone, Default)]
pub struct SourceInfo {
    /// Logical path of the source file.
    pub file: String,
    pub pos: Pos,
    /// Width of the offending token in columns (for the caret underline).
    pub width: u32,
    pub line_before: String,
    pub line_at: String,
    pub line_after: String,
}

impl SourceInfo {
    /// Build a source snapshot for `pos` out of the full source text.
    pub fn new(file: &str, source: &str, pos: Pos, width: u32) -> Self {
        let mut info = SourceInfo {
            file: file.to_string(),
            pos,
            width: width.max(1),
            ..Default::default()
        };
        if pos.is_set() {
            let line = pos.line as usize;
            for (i, text) in source.lines().enumerate() {
                let n = i + 1;
                if n + 1 < line {
                    continue;
                }
                if n + 1 == line {
                    info.line_before = text.to_string();
                } else if n == line {
                    info.line_at = text.to_string();
                } else if n == line + 1 {
                    info.line_after = text.to_string();
                    break;
                }
            }
        }
        info
    }

    /// The caret line pointing at the error column.
    ///
    /// Tabs in the source line are preserved so the caret stays aligned in
    /// terminals that render them.
    pub fn caret_line(&self) -> String {
        let mut out = String::new();
        let col = self.pos.col.max(1) as usize;
        for (i, ch) in self.line_at.chars().enumerate() {
            if i + 1 >= col {
                break;
            }
            out.push(if ch == '\t' { '\t' } else { ' ' });
        }
        for _ in 0..self.width.max(1) {
            out.push('^');
        }
        out
    }
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  at : {}:{}", self.file, self.pos.line)?;
        let line = self.pos.line;
        if line > 1 {
            writeln!(f, "{:3} | {}", line - 1, self.line_before)?;
        }
        writeln!(f, "{:3} | {}", line, self.line_at)?;
        writeln!(f, "    | {}", self.caret_line())?;
        if !self.line_after.is_empty() {
            writeln!(f, "{:3} | {}", line + 1, self.line_after)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn source_info_captures_surrounding_lines() {
        let src = "var a = 1;\nvar b = x;\nvar c = 3;\n";
        let info = SourceInfo::new("test.cb", src, Pos::new(2, 9), 1);
        assert_eq!(info.line_before, "var a = 1;");
        assert_eq!(info.line_at, "var b = x;");
        assert_eq!(info.line_after, "var c = 3;");
    }

    #[test]
    fn caret_points_at_column() {
        let src = "var b = x;\n";
        let info = SourceInfo::new("test.cb", src, Pos::new(1, 9), 1);
        assert_eq!(info.caret_line(), "        ^");
    }

    #[test]
    fn caret_width_spans_token() {
        let src = "foobar + 1\n";
        let info = SourceInfo::new("t.cb", src, Pos::new(1, 1), 6);
        assert_eq!(info.caret_line(), "^^^^^^");
    }
}
