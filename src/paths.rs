//! Facilities for working with paths within definitions or enforced values.
use std::{fmt, fmt::Write};

/// A key within an object or an index within an array.
/// A sequence of chunks represents a valid path within a definition.
///
/// The primary purpose of this enum is to avoid converting indexes to strings
/// while a walk is in progress.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PathChunk {
    /// Property name within an object.
    Property(Box<str>),
    /// Index within an array.
    Index(usize),
}

impl fmt::Display for PathChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathChunk::Property(property) => f.write_str(property),
            PathChunk::Index(idx) => f.write_str(itoa::Buffer::new().format(*idx)),
        }
    }
}

impl serde::Serialize for PathChunk {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<String> for PathChunk {
    #[inline]
    fn from(value: String) -> Self {
        PathChunk::Property(value.into_boxed_str())
    }
}

impl From<&str> for PathChunk {
    #[inline]
    fn from(value: &str) -> Self {
        PathChunk::Property(value.into())
    }
}

impl From<usize> for PathChunk {
    #[inline]
    fn from(value: usize) -> Self {
        PathChunk::Index(value)
    }
}

/// Render a chunk sequence as a `/`-joined pointer, e.g.
/// `/paths/users/get/responses/200/schema`.
pub(crate) fn write_pointer(f: &mut impl Write, chunks: &[PathChunk]) -> fmt::Result {
    for chunk in chunks {
        f.write_char('/')?;
        write!(f, "{}", chunk)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{write_pointer, PathChunk};

    #[test]
    fn pointer_rendering() {
        let chunks = vec![
            PathChunk::from("paths"),
            PathChunk::from("users"),
            PathChunk::from(2usize),
        ];
        let mut out = String::new();
        write_pointer(&mut out, &chunks).unwrap();
        assert_eq!(out, "/paths/users/2");
    }

    #[test]
    fn empty_pointer_is_empty() {
        let mut out = String::new();
        write_pointer(&mut out, &[]).unwrap();
        assert_eq!(out, "");
    }
}
