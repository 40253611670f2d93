//! Decoders for the two text shapes the device interpreter prints:
//! the directory table produced by `ls` and the tuple printed by `uos.stat`.
//!
//! Both decoders are total: malformed input yields nothing rather than an
//! error, so a single odd line never aborts a directory walk.

/// Number of header lines preceding the entries of a listing table.
pub const LISTING_HEADER_LINES: usize = 3;

/// Type tag marking a subdirectory in a listing row.
pub const DIR_TAG: &str = "<dir>";

/// Index of `st_mtime` in the stat tuple.
pub const STAT_MTIME_INDEX: usize = 8;

/// `S_IFDIR` bit of `st_mode` on MicroPython ports.
pub const S_IFDIR: i64 = 0x4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
}

/// One row of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl ListingEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// Decode a listing table.
///
/// Row layout: column 0 is padding, columns 1..6 hold the type tag and
/// the name runs from column 7 to the end of the line. `..` and blank
/// names are dropped.
pub fn parse_listing(text: &str) -> Vec<ListingEntry> {
    let mut entries = Vec::new();
    for line in text.lines().skip(LISTING_HEADER_LINES) {
        let chars: Vec<char> = line.chars().collect();
        if chars.len() <= 7 {
            continue;
        }
        let tag: String = chars[1..6].iter().collect();
        let name: String = chars[7..].iter().collect();
        // Names may start or end with spaces; only the line ending goes
        let name = name.trim_end_matches(['\r', '\n']);
        if name.trim().is_empty() || name == ".." {
            continue;
        }
        let kind = if tag == DIR_TAG {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        entries.push(ListingEntry {
            name: name.to_string(),
            kind,
        });
    }
    entries
}

/// Render entries in the same table format `parse_listing` reads.
pub fn format_listing(cwd: &str, entries: &[ListingEntry]) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(&format!("Remote files in '{}':\n", cwd));
    out.push('\n');
    if cwd != "/" {
        out.push_str(&format!(" {} ..\n", DIR_TAG));
    }
    for e in entries {
        match e.kind {
            EntryKind::Dir => out.push_str(&format!(" {} {}\n", DIR_TAG, e.name)),
            EntryKind::File => out.push_str(&format!("       {}\n", e.name)),
        }
    }
    out.push('\n');
    out
}

/// Typed view of a `uos.stat` result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatRecord {
    fields: Vec<i64>,
}

impl StatRecord {
    pub fn mode(&self) -> i64 {
        self.fields[0]
    }

    pub fn size(&self) -> i64 {
        self.fields[6]
    }

    /// Modification time in device-epoch seconds
    pub fn mtime(&self) -> i64 {
        self.fields[STAT_MTIME_INDEX]
    }

    pub fn is_dir(&self) -> bool {
        is_dir_mode(self.mode())
    }

    pub fn fields(&self) -> &[i64] {
        &self.fields
    }
}

pub fn is_dir_mode(mode: i64) -> bool {
    mode & S_IFDIR != 0
}

/// Decode the last non-empty line of `text` as an integer tuple.
///
/// Grammar: `(` INT (`,` INT)* `,`? `)`, where INT is `-`? DIGIT+ and
/// whitespace may surround any token. Square brackets are accepted in
/// place of parentheses. Anything else, or fewer than nine fields, is
/// `None`.
pub fn parse_stat(text: &str) -> Option<StatRecord> {
    let line = text.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
    let fields = parse_int_tuple(line)?;
    if fields.len() <= STAT_MTIME_INDEX {
        return None;
    }
    Some(StatRecord { fields })
}

fn parse_int_tuple(line: &str) -> Option<Vec<i64>> {
    let inner = line
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .or_else(|| line.strip_prefix('[').and_then(|s| s.strip_suffix(']')))?;

    let inner = inner.trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }
    // A single trailing comma is legal; an empty field anywhere else is not.
    let inner = inner.strip_suffix(',').unwrap_or(inner);

    let mut values = Vec::new();
    for token in inner.split(',') {
        values.push(parse_int(token.trim())?);
    }
    Some(values)
}

fn parse_int(token: &str) -> Option<i64> {
    let digits = token.strip_prefix('-').unwrap_or(token);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}
