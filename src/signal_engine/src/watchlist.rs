//! Watchlist files: one symbol per line, `#` starts a comment.

use std::io::ErrorKind;
use std::path::Path;

use anyhow::Context;
use indexmap::IndexSet;
use tracing::warn;

/// Upper-cased symbols in file order, without blanks, comments or duplicates.
pub fn parse_watchlist(text: &str) -> Vec<String> {
    let symbols: IndexSet<String> = text
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
        .collect();
    symbols.into_iter().collect()
}

/// Reads a watchlist file. A missing file is an empty watchlist.
pub fn load_watchlist(path: impl AsRef<Path>) -> anyhow::Result<Vec<String>> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(parse_watchlist(&text)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "watchlist file not found, using an empty list");
            Ok(Vec::new())
        }
        Err(e) => Err(e).with_context(|| format!("read watchlist file {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn comments_blanks_and_case() {
        let text = "# tech\naapl\n\n  msft  # software\nAAPL\nbtc/usd\n";
        assert_eq!(parse_watchlist(text), vec!["AAPL", "MSFT", "BTC/USD"]);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(load_watchlist(dir.path().join("nope.txt")).unwrap().is_empty());
    }

    #[test]
    fn reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "spy\nqqq").unwrap();
        assert_eq!(load_watchlist(file.path()).unwrap(), vec!["SPY", "QQQ"]);
    }
}
