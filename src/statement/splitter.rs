//! Splits a script into statements.
//!
//! A statement ends at a `;` immediately followed by `\n` or `\r\n`, or at a
//! trailing `;` at end of input. Blank statements are skipped and each
//! statement is trimmed. Input is read line by line, so a large script is
//! never held in memory at once.

use std::io::{self, BufRead};

/// Lazily split `reader` into statement texts.
pub fn split_script<R: BufRead>(reader: R) -> Statements<R> {
    Statements {
        reader,
        pending: String::new(),
        done: false,
    }
}

/// Iterator over the statements of a script
pub struct Statements<R> {
    reader: R,
    pending: String,
    done: bool,
}

impl<R: BufRead> Statements<R> {
    fn take_pending(&mut self) -> Option<String> {
        let statement = std::mem::take(&mut self.pending);
        let statement = statement.trim();
        let statement = statement.strip_suffix(';').unwrap_or(statement).trim();
        (!statement.is_empty()).then(|| statement.to_string())
    }
}

impl<R: BufRead> Iterator for Statements<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        while !self.done {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    self.done = true;
                    return self.take_pending().map(Ok);
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }

            let Some(content) = line.strip_suffix('\n') else {
                // Final line without a newline; end of input follows
                self.pending.push_str(&line);
                continue;
            };
            let content = content.strip_suffix('\r').unwrap_or(content);
            match content.strip_suffix(';') {
                Some(body) => {
                    self.pending.push_str(body);
                    if let Some(statement) = self.take_pending() {
                        return Some(Ok(statement));
                    }
                }
                None => self.pending.push_str(&line),
            }
        }
        None
    }
}
