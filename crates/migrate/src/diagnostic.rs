//! Positioned diagnostics for failed scripts
//!
//! Turns an engine error carrying a character position into a message that
//! names the line and column and quotes the surrounding script.

use crate::backends::EngineError;

/// Renders engine errors against the script that produced them
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticRenderer {
    context_lines: usize,
}

impl DiagnosticRenderer {
    pub fn new(context_lines: usize) -> Self {
        Self { context_lines }
    }

    pub fn context_lines(&self) -> usize {
        self.context_lines
    }

    /// `<severity> <code>: <message> in line <L>, column <C>:\n\n<excerpt>`,
    /// or just the headline when no usable position is available
    pub fn render(&self, script: &str, error: &EngineError) -> String {
        let location = error
            .position
            .and_then(|position| position.checked_sub(1))
            .and_then(|offset| line_column_from_offset(script, offset));

        match location {
            Some((line, column)) => {
                let excerpt = lines_before_and_after(script, line, self.context_lines, self.context_lines, true);
                format!(
                    "{} in line {}, column {}:\n\n{}",
                    error.headline(),
                    line,
                    column,
                    excerpt
                )
            }
            None => error.headline(),
        }
    }
}

impl Default for DiagnosticRenderer {
    fn default() -> Self {
        Self::new(5)
    }
}

/// 1-based (line, column) of the character at `offset`
///
/// `offset` may equal the character count, which addresses the end of input.
/// When the content ends with a newline, the end of input is reported just past
/// the last line's final character rather than on an empty line after it.
pub fn line_column_from_offset(content: &str, offset: usize) -> Option<(usize, usize)> {
    let mut line = 1;
    let mut column = 1;
    let mut seen = 0;
    let mut previous_line_end = None;

    for c in content.chars() {
        if seen == offset {
            return Some((line, column));
        }
        if c == '\n' {
            previous_line_end = Some(column);
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
        seen += 1;
    }

    if seen != offset {
        return None;
    }

    match previous_line_end {
        Some(end) if content.ends_with('\n') => Some((line - 1, end)),
        _ => Some((line, column)),
    }
}

/// Lines `line - before ..= line + after` (1-based, clamped to the content)
///
/// With `line_numbers`, each line gets a right-aligned number and the target
/// line is marked with `>`.
pub fn lines_before_and_after(
    content: &str,
    line: usize,
    before: usize,
    after: usize,
    line_numbers: bool,
) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() || line == 0 {
        return String::new();
    }

    let first = line.saturating_sub(before).max(1);
    let last = line.saturating_add(after).min(lines.len());
    if first > last {
        return String::new();
    }

    let width = last.to_string().len();

    (first..=last)
        .map(|number| {
            let text = lines[number - 1];
            if line_numbers {
                let marker = if number == line { '>' } else { ' ' };
                format!("{} {:>width$}: {}", marker, number, text, width = width)
            } else {
                text.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
