//! Pretty printing utilities.
//!
//! Traced IR is rendered through the `pretty` crate's documents; the lowered
//! loop nest is written line by line with [`CodeFormatter`].

use pretty::RcDoc;
use std::fmt;

/// Default line width for pretty printing.
pub const DEFAULT_WIDTH: usize = 80;

/// Indentation of nested blocks in documents.
const INDENT: isize = 2;

/// A pretty-printable value.
pub trait PrettyPrint {
    /// Convert to a pretty document.
    fn to_doc(&self) -> RcDoc<'static>;

    /// Pretty print to a string with the given width.
    fn pretty_print(&self, width: usize) -> String {
        let mut output = String::new();
        self.to_doc()
            .render_fmt(width, &mut output)
            .expect("rendering into a String cannot fail");
        output
    }

    /// Pretty print with default width.
    fn pretty(&self) -> String {
        self.pretty_print(DEFAULT_WIDTH)
    }
}

/// Lines of `body`, each on its own line, one level deeper.
pub fn indented(body: Vec<RcDoc<'static>>) -> RcDoc<'static> {
    if body.is_empty() {
        return RcDoc::nil();
    }
    RcDoc::hardline()
        .append(RcDoc::intersperse(body, RcDoc::hardline()))
        .nest(INDENT)
}

/// `header {` body `}`
pub fn braced(header: String, body: Vec<RcDoc<'static>>) -> RcDoc<'static> {
    if body.is_empty() {
        return RcDoc::text(format!("{} {{}}", header));
    }
    RcDoc::text(header)
        .append(RcDoc::text(" {"))
        .append(indented(body))
        .append(RcDoc::hardline())
        .append(RcDoc::text("}"))
}

/// A simple line-oriented code formatter.
#[derive(Debug)]
pub struct CodeFormatter {
    output: String,
    indent_level: usize,
    indent_str: String,
    at_line_start: bool,
}

impl CodeFormatter {
    /// Create a new formatter with the given indent string.
    pub fn new(indent_str: &str) -> Self {
        Self {
            output: String::new(),
            indent_level: 0,
            indent_str: indent_str.to_string(),
            at_line_start: true,
        }
    }

    /// Create a formatter with default settings (2 spaces).
    pub fn default_indent() -> Self {
        Self::new("  ")
    }

    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    pub fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    /// Write text, indenting at the start of every line.
    pub fn write(&mut self, s: &str) {
        for c in s.chars() {
            if c == '\n' {
                self.output.push('\n');
                self.at_line_start = true;
            } else {
                if self.at_line_start {
                    for _ in 0..self.indent_level {
                        self.output.push_str(&self.indent_str);
                    }
                    self.at_line_start = false;
                }
                self.output.push(c);
            }
        }
    }

    pub fn writeln(&mut self, s: &str) {
        self.write(s);
        self.write("\n");
    }

    /// Write `header {`, the body one level deeper, then `}` followed by `suffix`.
    pub fn block<F: FnOnce(&mut Self)>(&mut self, header: &str, suffix: &str, f: F) {
        self.write(header);
        self.writeln(" {");
        self.indent();
        f(self);
        self.dedent();
        self.write("}");
        self.writeln(suffix);
    }

    pub fn finish(self) -> String {
        self.output
    }
}

impl fmt::Write for CodeFormatter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s);
        Ok(())
    }
}

/// Format a list with separators.
pub fn format_list<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}
