use std::collections::HashSet;
use std::path::Path;

use crate::error::{AppError, Result};

/// Ids listed in a text file: one per line, blank lines and `#` comments ignored.
pub fn parse_id_list(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(|line| line.split_once('#').map_or(line, |(head, _)| head).trim())
        .filter(|line| !line.is_empty())
}

/// Command line ids followed by file ids, first occurrence wins.
pub fn collect_ids(args: &[String], file: Option<&Path>) -> Result<Vec<String>> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path).map_err(|source| AppError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?,
        None => String::new(),
    };

    let mut seen = HashSet::new();
    let ids: Vec<String> = args
        .iter()
        .map(|id| id.trim())
        .chain(parse_id_list(&text))
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect();

    if ids.is_empty() {
        return Err(AppError::InvalidInput(
            "no title ids given; pass them as arguments or with --ids-file".to_string(),
        ));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_list() {
        let text = "# queue for tonight\n101\n\n  102  # re-run\n#103\n104\r\n";
        assert_eq!(
            parse_id_list(text).collect::<Vec<_>>(),
            vec!["101", "102", "104"]
        );
    }

    #[test]
    fn test_collect_ids_merges_and_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ids.txt");
        std::fs::write(&file, "102\n103\n101\n").unwrap();

        let ids = collect_ids(&["101".to_string(), "102".to_string()], Some(&file)).unwrap();
        assert_eq!(ids, vec!["101", "102", "103"]);
    }

    #[test]
    fn test_collect_ids_requires_something() {
        assert!(matches!(
            collect_ids(&[], None),
            Err(AppError::InvalidInput(_))
        ));
    }
}
