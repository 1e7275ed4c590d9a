//! Export functions back to the transaction file format

use crate::error::Result;
use crate::table::Function;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Longest expression fragment written on a single line
const MAX_FRAGMENT_LEN: usize = 60;

/// Write functions as a transaction file
pub fn write_transaction_file<'a, P, I>(path: P, functions: I) -> Result<()>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = &'a Function>,
{
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    write_transaction(&mut writer, functions)?;
    writer.flush()?;
    Ok(())
}

/// Render functions as transaction file text
pub fn to_transaction_string<'a, I>(functions: I) -> String
where
    I: IntoIterator<Item = &'a Function>,
{
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_transaction(&mut out, functions);
    String::from_utf8_lossy(&out).into_owned()
}

fn write_transaction<'a, W, I>(writer: &mut W, functions: I) -> std::io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a Function>,
{
    writeln!(writer, "c funcmerge export")?;
    writeln!(writer, "t functions")?;

    for function in functions {
        let mut fragments = split_expression(&function.expression).into_iter();
        let first = fragments.next().unwrap_or_default();
        writeln!(writer, "a {} = {}", function.id, first)?;
        for fragment in fragments {
            writeln!(writer, "  {}", fragment)?;
        }
    }

    Ok(())
}

/// Split an expression into line-sized fragments on char boundaries
fn split_expression(expression: &str) -> Vec<&str> {
    let mut fragments = Vec::new();
    let mut rest = expression;

    while rest.chars().count() > MAX_FRAGMENT_LEN {
        let split_at = rest
            .char_indices()
            .nth(MAX_FRAGMENT_LEN)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let (head, tail) = rest.split_at(split_at);
        fragments.push(head);
        rest = tail;
    }

    fragments.push(rest);
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_transaction_file, parse_transaction_str};
    use crate::table::FunctionTable;

    #[test]
    fn test_short_expressions_on_one_line() {
        let functions = vec![Function::new("fd1", "length*60/ul2"), Function::new("ft1", "0")];
        let text = to_transaction_string(&functions);

        assert_eq!(
            text,
            "c funcmerge export\nt functions\na fd1 = length*60/ul2\na ft1 = 0\n"
        );
    }

    #[test]
    fn test_long_expressions_wrap() {
        let long = "x+".repeat(70) + "1";
        let functions = vec![Function::new("fd1", long.clone())];
        let text = to_transaction_string(&functions);

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[3].starts_with("  "));

        let table = parse_transaction_str(&text, "export.411").unwrap();
        assert_eq!(table.expression("fd1"), Some(long.as_str()));
    }

    #[test]
    fn test_split_expression() {
        assert_eq!(split_expression(""), vec![""]);
        let exact = "a".repeat(MAX_FRAGMENT_LEN);
        assert_eq!(split_expression(&exact).len(), 1);
        let over = "a".repeat(MAX_FRAGMENT_LEN + 1);
        assert_eq!(split_expression(&over), vec![exact.as_str(), "a"]);
    }

    #[test]
    fn test_written_file_parses_back() {
        let table: FunctionTable = [("fd1", "length * 60 / ul2"), ("fd2", "ul3 + 1")]
            .into_iter()
            .collect();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("functions.411");

        write_transaction_file(&path, table.iter()).unwrap();

        assert_eq!(parse_transaction_file(&path).unwrap(), table);
    }
}
