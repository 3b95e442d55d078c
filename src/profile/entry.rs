/// Mount entries: one line of a mount profile
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Option marking an entry whose target is a regular file
pub const KIND_FILE_OPTION: &str = "x-nsupdate.kind=file";
/// Option marking an entry that is recreated as a symlink instead of mounted
pub const KIND_SYMLINK_OPTION: &str = "x-nsupdate.kind=symlink";
/// Prefix of the option carrying a recreated symlink's target
pub const SYMLINK_TARGET_PREFIX: &str = "x-nsupdate.symlink=";

/// What kind of object an entry places at its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
}

/// One declared or observed mount: source, target directory, type and options.
///
/// Equality is semantic: the order of options does not matter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountEntry {
    pub name: String,
    pub dir: String,
    pub fs_type: String,
    pub options: Vec<String>,
}

impl MountEntry {
    pub fn new<S: AsRef<str>>(name: &str, dir: &str, fs_type: &str, options: &[S]) -> Self {
        Self {
            name: name.to_string(),
            dir: dir.to_string(),
            fs_type: fs_type.to_string(),
            options: options.iter().map(|o| o.as_ref().to_string()).collect(),
        }
    }

    pub fn kind(&self) -> EntryKind {
        // The last kind marker wins, matching how later options override earlier ones.
        self.options
            .iter()
            .rev()
            .find_map(|option| match option.as_str() {
                KIND_FILE_OPTION => Some(EntryKind::File),
                KIND_SYMLINK_OPTION => Some(EntryKind::Symlink),
                _ => None,
            })
            .unwrap_or(EntryKind::Directory)
    }

    /// Target of a recreated symlink, if the entry records one.
    pub fn symlink_target(&self) -> Option<&str> {
        self.options
            .iter()
            .rev()
            .find_map(|option| option.strip_prefix(SYMLINK_TARGET_PREFIX))
    }

    fn option_set(&self) -> BTreeSet<&str> {
        self.options.iter().map(String::as_str).collect()
    }

    /// Parse one fstab-style line: `name dir type options [freq [passno]]`.
    pub fn parse_line(line: &str) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields.len() > 6 {
            return Err(format!(
                "expected between 4 and 6 fields, found {}",
                fields.len()
            ));
        }
        for field in &fields[4..] {
            field
                .parse::<i32>()
                .map_err(|_| format!("cannot parse number {:?}", field))?;
        }

        Ok(Self {
            name: unescape(fields[0])?,
            dir: unescape(fields[1])?,
            fs_type: unescape(fields[2])?,
            // Commas inside an option are escaped, so split before unescaping.
            options: fields[3]
                .split(',')
                .filter(|o| !o.is_empty())
                .map(unescape)
                .collect::<std::result::Result<_, _>>()?,
        })
    }
}

impl PartialEq for MountEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.dir == other.dir
            && self.fs_type == other.fs_type
            && self.option_set() == other.option_set()
    }
}

impl Eq for MountEntry {}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.is_empty() {
        placeholder
    } else {
        value
    }
}

impl fmt::Display for MountEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let options = self
            .options
            .iter()
            .map(|option| escape_option(option))
            .collect::<Vec<_>>()
            .join(",");
        write!(
            f,
            "{} {} {} {} 0 0",
            escape(or_placeholder(&self.name, "none")),
            escape(or_placeholder(&self.dir, "none")),
            escape(or_placeholder(&self.fs_type, "none")),
            or_placeholder(&options, "defaults"),
        )
    }
}

/// Escape whitespace and backslashes the way fstab(5) expects.
pub fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            ' ' => out.push_str("\\040"),
            '\t' => out.push_str("\\011"),
            '\n' => out.push_str("\\012"),
            '\\' => out.push_str("\\134"),
            other => out.push(other),
        }
    }
    out
}

/// [`escape`] plus the option separator, for one element of the options field.
fn escape_option(option: &str) -> String {
    escape(option).replace(',', "\\054")
}

/// Reverse of [`escape`]: decode `\NNN` octal sequences.
pub fn unescape(field: &str) -> std::result::Result<String, String> {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let code = bytes
                .get(i + 1..i + 4)
                .and_then(|digits| std::str::from_utf8(digits).ok())
                .and_then(|digits| u8::from_str_radix(digits, 8).ok())
                .ok_or_else(|| format!("invalid escape sequence in {:?}", field))?;
            out.push(code);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).map_err(|_| format!("escaped field {:?} is not UTF-8", field))
}
