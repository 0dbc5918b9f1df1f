use std::str::FromStr;

use suppaftp::list::File;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Dir,
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub entry_type: EntryType,
    pub size: Option<u64>,
}

/// Parses one line of a `LIST` response, Unix or MS-DOS style.
///
/// Returns `None` for summary lines (`total 12`) and anything that does not
/// look like an entry.
pub fn parse_list_line(line: &str) -> Option<Entry> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }
    let file = File::from_str(line).ok()?;
    let entry_type = if file.is_directory() {
        EntryType::Dir
    } else if file.is_symlink() {
        EntryType::Link
    } else {
        EntryType::File
    };
    Some(Entry {
        name: file.name().to_string(),
        entry_type,
        size: (entry_type == EntryType::File).then(|| file.size() as u64),
    })
}
