//! Document and collection paths.
//!
//! Paths alternate collection and document segments:
//! `surveys` is a collection, `surveys/abc` a document,
//! `surveys/abc/votes` a sub-collection.

use std::fmt;

use clubdesk_common::{StoreError, StoreErrorCode, StoreOperation};

/// Path of a single document (even number of segments).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath(String);

/// Path of a collection (odd number of segments).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

fn validate_segments(raw: &str, expect_even: bool, op: StoreOperation) -> Result<(), StoreError> {
    let segments: Vec<&str> = raw.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::new(
            op,
            StoreErrorCode::InvalidArgument,
            format!("Path contains an empty segment: {raw:?}"),
        ));
    }
    if (segments.len() % 2 == 0) != expect_even {
        let kind = if expect_even { "document" } else { "collection" };
        return Err(StoreError::new(
            op,
            StoreErrorCode::InvalidArgument,
            format!("Not a {kind} path: {raw:?}"),
        ));
    }
    Ok(())
}

impl DocumentPath {
    /// Document `id` in the root collection `collection`.
    pub fn new(collection: impl AsRef<str>, id: impl AsRef<str>) -> Self {
        Self(format!("{}/{}", collection.as_ref(), id.as_ref()))
    }

    /// Parse and validate a slash-separated document path.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        validate_segments(raw, true, StoreOperation::Read)?;
        Ok(Self(raw.to_string()))
    }

    /// Check the segment structure before the store acts on it.
    pub fn validate(&self, op: StoreOperation) -> Result<(), StoreError> {
        validate_segments(&self.0, true, op)
    }

    /// The document ID (last segment).
    #[must_use]
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// The collection containing this document.
    #[must_use]
    pub fn parent(&self) -> CollectionPath {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => CollectionPath(parent.to_string()),
            None => CollectionPath(String::new()),
        }
    }

    /// A sub-collection nested under this document.
    #[must_use]
    pub fn collection(&self, name: impl AsRef<str>) -> CollectionPath {
        CollectionPath(format!("{}/{}", self.0, name.as_ref()))
    }

    /// Raw path string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl CollectionPath {
    /// A root collection.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().to_string())
    }

    /// Parse and validate a slash-separated collection path.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        validate_segments(raw, false, StoreOperation::Read)?;
        Ok(Self(raw.to_string()))
    }

    /// Check the segment structure before the store acts on it.
    pub fn validate(&self, op: StoreOperation) -> Result<(), StoreError> {
        validate_segments(&self.0, false, op)
    }

    /// Document `id` inside this collection.
    #[must_use]
    pub fn doc(&self, id: impl AsRef<str>) -> DocumentPath {
        DocumentPath(format!("{}/{}", self.0, id.as_ref()))
    }

    /// Whether `path` is a direct child of this collection.
    #[must_use]
    pub fn contains(&self, path: &DocumentPath) -> bool {
        path.parent() == *self
    }

    /// Raw path string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_paths() {
        let survey = DocumentPath::new("surveys", "s1");
        let votes = survey.collection("votes");
        let vote = votes.doc("u1");

        assert_eq!(vote.as_str(), "surveys/s1/votes/u1");
        assert_eq!(vote.id(), "u1");
        assert_eq!(vote.parent(), votes);
        assert!(votes.contains(&vote));
        assert!(!CollectionPath::new("surveys").contains(&vote));
    }

    #[test]
    fn test_parse_rejects_wrong_parity() {
        assert!(DocumentPath::parse("surveys/s1").is_ok());
        assert!(DocumentPath::parse("surveys").is_err());
        assert!(CollectionPath::parse("surveys/s1/votes").is_ok());
        assert!(CollectionPath::parse("surveys/s1").is_err());
    }

    #[test]
    fn test_empty_segment_rejected() {
        let err = DocumentPath::new("surveys", "").validate(StoreOperation::Write).unwrap_err();
        assert_eq!(err.code, StoreErrorCode::InvalidArgument);
        assert_eq!(err.operation, StoreOperation::Write);
    }
}
