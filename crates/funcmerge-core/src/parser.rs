//! Parser for function transaction files
//!
//! A transaction file is line oriented. Column 1 holds a record code,
//! column 2 a delimiter and the payload starts at column 3:
//!
//! ```text
//! c a comment
//! t functions
//! a fd1 = length * 60 /
//!   ul2
//! d fd9
//! ```
//!
//! Only `a` records (and their continuation lines) contribute to the result.
//! Delete and modify records are recognised but their effect is not applied.

use crate::error::{Error, FormatErrorKind, Result};
use crate::table::{normalize_expression, FunctionTable};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Payload of a `t` record that opens a functions block
const FUNCTIONS_BLOCK: &str = "functions";

/// Columns before the payload: the record code and its delimiter
const PREFIX_LEN: usize = 2;

/// A record code in column 1 of a transaction line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordCode {
    Comment,
    Transaction,
    Add,
    Continuation,
    Delete,
    Modify,
}

impl RecordCode {
    /// Map a line code to a record code
    pub fn from_char(code: char) -> Option<Self> {
        match code {
            'c' => Some(RecordCode::Comment),
            't' => Some(RecordCode::Transaction),
            'a' => Some(RecordCode::Add),
            ' ' => Some(RecordCode::Continuation),
            'd' => Some(RecordCode::Delete),
            'm' => Some(RecordCode::Modify),
            _ => None,
        }
    }
}

/// Parse a transaction file into a function table
pub fn parse_transaction_file<P: AsRef<Path>>(path: P) -> Result<FunctionTable> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_transaction_reader(BufReader::new(file), path)
}

/// Parse transaction records from a string (useful for testing)
pub fn parse_transaction_str(content: &str, source_name: &str) -> Result<FunctionTable> {
    parse_transaction_reader(content.as_bytes(), Path::new(source_name))
}

/// Parse transaction records from any buffered reader
///
/// `source` is only used to label errors.
pub fn parse_transaction_reader<R: BufRead>(reader: R, source: &Path) -> Result<FunctionTable> {
    let mut parser = TransactionParser::new(source.to_path_buf());

    for (line_idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| Error::FileRead {
            path: source.to_path_buf(),
            source: e,
        })?;
        parser.feed(line_idx + 1, &line)?;
    }

    let functions = parser.finish();
    tracing::debug!(
        source = %source.display(),
        count = functions.len(),
        "parsed transaction file"
    );
    Ok(functions)
}

/// State carried between lines of one transaction file
struct TransactionParser {
    source: PathBuf,
    functions: FunctionTable,
    in_functions_block: bool,
    current: Option<OpenFunction>,
}

/// The function whose expression continuation lines extend
struct OpenFunction {
    id: String,
    buffer: String,
}

impl TransactionParser {
    fn new(source: PathBuf) -> Self {
        Self {
            source,
            functions: FunctionTable::new(),
            in_functions_block: false,
            current: None,
        }
    }

    fn feed(&mut self, line_no: usize, line: &str) -> Result<()> {
        let line = line.trim_end();
        let Some(code) = line.chars().next() else {
            return Ok(());
        };
        let payload = payload(line);

        let record = RecordCode::from_char(code).ok_or_else(|| {
            self.error(line_no, FormatErrorKind::UnknownRecordCode { code })
        })?;

        match record {
            RecordCode::Comment => {}
            RecordCode::Transaction => {
                if !payload.starts_with(FUNCTIONS_BLOCK) {
                    return Err(self.error(
                        line_no,
                        FormatErrorKind::WrongRecordType {
                            found: payload.to_string(),
                        },
                    ));
                }
                self.in_functions_block = true;
            }
            RecordCode::Add => {
                if !self.in_functions_block {
                    return Err(self.error(line_no, FormatErrorKind::RecordOrder { code }));
                }
                let (id, fragment) = payload
                    .split_once('=')
                    .ok_or_else(|| self.error(line_no, FormatErrorKind::MissingSeparator))?;
                let id = id.trim();
                if id.is_empty() {
                    return Err(self.error(line_no, FormatErrorKind::EmptyFunctionId));
                }

                let buffer = normalize_expression(fragment);
                tracing::debug!(line = line_no, id, "add record");
                self.functions.insert(id, &buffer);
                self.current = Some(OpenFunction {
                    id: id.to_string(),
                    buffer,
                });
            }
            RecordCode::Continuation => {
                if !self.in_functions_block {
                    return Err(self.error(line_no, FormatErrorKind::RecordOrder { code }));
                }
                if let Some(open) = self.current.as_mut() {
                    open.buffer.push_str(&normalize_expression(payload));
                    self.functions.insert(open.id.clone(), &open.buffer);
                }
            }
            RecordCode::Delete | RecordCode::Modify => {
                tracing::debug!(line = line_no, record = ?record, "ignoring record");
                self.current = None;
            }
        }

        Ok(())
    }

    fn finish(self) -> FunctionTable {
        self.functions
    }

    fn error(&self, line: usize, kind: FormatErrorKind) -> Error {
        Error::format(self.source.clone(), line, kind)
    }
}

/// Text from column 3 onwards, or empty for lines shorter than the prefix
fn payload(line: &str) -> &str {
    line.char_indices()
        .nth(PREFIX_LEN)
        .map(|(idx, _)| &line[idx..])
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn format_kind(result: Result<FunctionTable>) -> (usize, FormatErrorKind) {
        match result {
            Err(Error::Format { line, kind, .. }) => (line, kind),
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_add_records() {
        let input = "c exported functions\nt functions\na fd1 = length * 60 / ul2\na fd2=ul3 + 1\n";
        let table = parse_transaction_str(input, "test.411").unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.expression("fd1"), Some("length*60/ul2"));
        assert_eq!(table.expression("fd2"), Some("ul3+1"));
    }

    #[test]
    fn test_continuation_lines_append() {
        let input = "t functions\na 1 = 2 +\n  3\n";
        let table = parse_transaction_str(input, "test.411").unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.expression("1"), Some("2+3"));
    }

    #[test]
    fn test_multiple_continuations_in_order() {
        let input = "t functions\na fd5 = (1 +\n  0.15 * (volau\n  / ul2) ^ 4)\n";
        let table = parse_transaction_str(input, "test.411").unwrap();

        assert_eq!(table.expression("fd5"), Some("(1+0.15*(volau/ul2)^4)"));
    }

    #[test]
    fn test_delete_and_modify_close_context() {
        let input = "t functions\na fd1 = x\nd fd1\n  + y\na fd2 = z\nm fd2\n  + w\n";
        let table = parse_transaction_str(input, "test.411").unwrap();

        assert_eq!(table.expression("fd1"), Some("x"));
        assert_eq!(table.expression("fd2"), Some("z"));
    }

    #[test]
    fn test_continuation_without_context_is_noop() {
        let input = "t functions\n  stray\na fd1 = x\n";
        let table = parse_transaction_str(input, "test.411").unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.expression("fd1"), Some("x"));
    }

    #[test]
    fn test_last_add_wins() {
        let input = "t functions\na fd1 = old\n  + tail\na fd1 = new\n  + more\n";
        let table = parse_transaction_str(input, "test.411").unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.expression("fd1"), Some("new+more"));
    }

    #[test]
    fn test_no_add_records_yields_empty_table() {
        let table = parse_transaction_str("c nothing here\nt functions\n", "test.411").unwrap();
        assert!(table.is_empty());

        let table = parse_transaction_str("", "test.411").unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_blank_and_short_lines() {
        let input = "t functions\n\na fd1 = x\n \n\r\n   \na\t\n";
        let result = parse_transaction_str(input, "test.411");
        // A bare "a" line has no '=' in its (empty) payload.
        let (line, kind) = format_kind(result);
        assert_eq!(line, 7);
        assert_eq!(kind, FormatErrorKind::MissingSeparator);

        let table = parse_transaction_str("t functions\na fd1 = x\n \n\n", "test.411").unwrap();
        assert_eq!(table.expression("fd1"), Some("x"));
    }

    #[test]
    fn test_windows_line_endings() {
        let input = "t functions\r\na fd1 = 2 +\r\n  3\r\n";
        let table = parse_transaction_str(input, "test.411").unwrap();

        assert_eq!(table.expression("fd1"), Some("2+3"));
    }

    #[test]
    fn test_wrong_transaction_type() {
        let result = parse_transaction_str("t nodes\na fd1 = x\n", "test.411");
        let (line, kind) = format_kind(result);

        assert_eq!(line, 1);
        assert_eq!(
            kind,
            FormatErrorKind::WrongRecordType {
                found: "nodes".to_string()
            }
        );
    }

    #[test]
    fn test_functions_prefix_is_accepted() {
        let table = parse_transaction_str("t functions init\na fd1 = x\n", "test.411").unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_add_before_transaction_record() {
        let (line, kind) = format_kind(parse_transaction_str("c hi\na fd1 = x\n", "test.411"));
        assert_eq!(line, 2);
        assert_eq!(kind, FormatErrorKind::RecordOrder { code: 'a' });
    }

    #[test]
    fn test_continuation_before_transaction_record() {
        let (line, kind) = format_kind(parse_transaction_str("  x + y\n", "test.411"));
        assert_eq!(line, 1);
        assert_eq!(kind, FormatErrorKind::RecordOrder { code: ' ' });
    }

    #[test]
    fn test_unknown_record_code_aborts() {
        let input = "t functions\na fd1 = x\nz bogus\na fd2 = y\n";
        let (line, kind) = format_kind(parse_transaction_str(input, "test.411"));

        assert_eq!(line, 3);
        assert_eq!(kind, FormatErrorKind::UnknownRecordCode { code: 'z' });
    }

    #[test]
    fn test_empty_function_id() {
        let (_, kind) = format_kind(parse_transaction_str("t functions\na  = x\n", "test.411"));
        assert_eq!(kind, FormatErrorKind::EmptyFunctionId);
    }

    #[test]
    fn test_expression_may_contain_equals() {
        let table = parse_transaction_str("t functions\na fd1 = (x = 1)\n", "test.411").unwrap();
        assert_eq!(table.expression("fd1"), Some("(x=1)"));
    }

    #[test]
    fn test_payload_guard() {
        assert_eq!(payload(""), "");
        assert_eq!(payload("a"), "");
        assert_eq!(payload("a "), "");
        assert_eq!(payload("a x"), "x");
    }

    #[test]
    fn test_parse_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "t functions\na ft1 = 0\n").unwrap();

        let table = parse_transaction_file(file.path()).unwrap();
        assert_eq!(table.expression("ft1"), Some("0"));
    }

    #[test]
    fn test_parse_missing_file() {
        let result = parse_transaction_file("/nonexistent/functions.411");
        assert!(matches!(result, Err(Error::FileRead { .. })));
    }
}
