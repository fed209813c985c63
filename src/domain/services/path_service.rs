use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::common::errors::{RepositoryError, Result};

/// Characters that may never appear in an entry name
const ILLEGAL_CHARACTERS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Device names Windows refuses as file names, with or without an extension
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Location of an entry: repository name followed by the folder chain
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    repository: String,
    segments: Vec<String>,
}

impl Location {
    /// Location of the repository root
    pub fn root<S: Into<String>>(repository: S) -> Self {
        Self {
            repository: repository.into(),
            segments: Vec::new(),
        }
    }

    /// Parses `//<repository>/<a>/<b>`
    pub fn parse(location: &str) -> Option<Self> {
        let rest = location.strip_prefix("//")?;
        let mut parts = rest.split('/').filter(|s| !s.is_empty());
        let repository = parts.next()?.to_string();
        let segments = parts.map(|s| s.to_string()).collect();
        Some(Self {
            repository,
            segments,
        })
    }

    /// Appends a segment
    pub fn join(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self {
            repository: self.repository.clone(),
            segments,
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, `None` for the root
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            None
        } else {
            Some(Self {
                repository: self.repository.clone(),
                segments: self.segments[..self.segments.len() - 1].to_vec(),
            })
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "//{}", self.repository)?;
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

/// Validates an entry name against the filesystem-safety rules
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(RepositoryError::illegal_name(name, "must not be blank"));
    }
    if let Some(c) = name.chars().find(|c| ILLEGAL_CHARACTERS.contains(c) || c.is_control()) {
        return Err(RepositoryError::illegal_name(
            name,
            &format!("contains illegal character {:?}", c),
        ));
    }
    if name.starts_with('.') {
        return Err(RepositoryError::illegal_name(name, "must not start with '.'"));
    }
    if name.ends_with('.') || name.ends_with(' ') {
        return Err(RepositoryError::illegal_name(name, "must not end with '.' or a space"));
    }
    let stem = name.split('.').next().unwrap_or(name).trim_end();
    if RESERVED_NAMES.iter().any(|reserved| reserved.eq_ignore_ascii_case(stem)) {
        return Err(RepositoryError::illegal_name(name, "is a reserved device name"));
    }
    Ok(())
}

/// Sibling names collide when they are equal ignoring case
pub fn names_collide(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Splits `<name><suffix>` at the last `.`; the suffix keeps its dot
pub fn split_suffix(file_name: &str) -> Option<(&str, &str)> {
    let dot = file_name.rfind('.')?;
    if dot == 0 {
        return None;
    }
    Some((&file_name[..dot], &file_name[dot..]))
}

/// Hidden files never become entries
pub fn is_hidden(file_name: &str) -> bool {
    file_name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::errors::ErrorKind;

    #[test]
    fn test_location_round_trips_through_display() {
        let location = Location::root("Local Repository").join("Data").join("Set1");
        assert_eq!(location.to_string(), "//Local Repository/Data/Set1");
        assert_eq!(Location::parse("//Local Repository/Data/Set1"), Some(location.clone()));
        assert_eq!(location.name(), Some("Set1"));
        assert_eq!(location.parent().unwrap().to_string(), "//Local Repository/Data");
        assert!(Location::parse("Local/Data").is_none());
    }

    #[test]
    fn test_validate_name_rejects_illegal_names() {
        for bad in ["", "   ", "a/b", "a\\b", "what?", "x:y", ".hidden", "trailing.", "trailing ", "CON", "com1.txt", "tab\there"] {
            let err = validate_name(bad).unwrap_err();
            assert_eq!(err.kind, ErrorKind::IllegalName, "{:?} should be illegal", bad);
        }
    }

    #[test]
    fn test_validate_name_accepts_ordinary_names() {
        for good in ["Data", "Set 1", "my.data", "Connections", "console", "ÜberSet"] {
            assert!(validate_name(good).is_ok(), "{:?} should be legal", good);
        }
    }

    #[test]
    fn test_split_suffix_uses_last_dot() {
        assert_eq!(split_suffix("Set1.ioo"), Some(("Set1", ".ioo")));
        assert_eq!(split_suffix("my.data.rmp"), Some(("my.data", ".rmp")));
        assert_eq!(split_suffix("noext"), None);
        assert_eq!(split_suffix(".hidden"), None);
    }

    #[test]
    fn test_names_collide_ignores_case() {
        assert!(names_collide("Data", "DATA"));
        assert!(!names_collide("Data", "Data2"));
    }
}
