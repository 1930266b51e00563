use std::fs;
use std::io::{self, Read};
use std::path::Path;

/// Split raw batch input into items: one per line, trimmed, blanks dropped
pub fn extract_items(raw: &str) -> Vec<String> {
    raw.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Read batch input from a file, or from stdin when no path is given
pub fn read_input(path: Option<&Path>) -> io::Result<String> {
    match path {
        Some(path) => {
            log::debug!("Reading items from {:?}", path);
            fs::read_to_string(path)
        }
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_extract_items() {
        let items = extract_items("  a@b.com \r\n\n\t\nnot-an-email\n x@y.org");
        assert_eq!(items, vec!["a@b.com", "not-an-email", "x@y.org"]);
    }

    #[test]
    fn test_extract_blank_input() {
        assert!(extract_items("").is_empty());
        assert!(extract_items("\n  \n\t").is_empty());
    }

    #[test]
    fn test_duplicates_kept() {
        assert_eq!(extract_items("a\na\n"), vec!["a", "a"]);
    }

    #[test]
    fn test_read_input_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "a@b.com").unwrap();
        writeln!(file, "c@d.net").unwrap();

        let raw = read_input(Some(file.path())).unwrap();
        assert_eq!(extract_items(&raw), vec!["a@b.com", "c@d.net"]);
    }

    #[test]
    fn test_read_input_missing_file() {
        assert!(read_input(Some(Path::new("/nonexistent/items.txt"))).is_err());
    }
}
