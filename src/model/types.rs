//! Core identifier and identity types for palimpsest.
//!
//! Foundation types used throughout the engine: content paths, branch names,
//! version/branch/merge-request/session identifiers, content hashes, and the
//! authenticated [`Principal`] supplied by the identity provider.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// ContentHash
// ---------------------------------------------------------------------------

/// A validated 64-character lowercase hex SHA-256 digest of version content.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash `content` (its UTF-8 bytes) with SHA-256.
    #[must_use]
    pub fn of(content: &str) -> Self {
        let digest = Sha256::digest(content.as_bytes());
        let mut hex = String::with_capacity(64);
        for b in digest.iter() {
            use std::fmt::Write as _;
            let _ = write!(hex, "{b:02x}");
        }
        Self(hex)
    }

    /// Parse a hash from its hex form.
    ///
    /// # Errors
    /// Returns an error if the string is not exactly 64 lowercase hex characters.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the inner hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first 12 hex characters, for display.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        if s.len() != 64 {
            return Err(ValidationError {
                kind: ErrorKind::ContentHash,
                value: s.to_owned(),
                reason: format!("expected 64 hex characters, got {}", s.len()),
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(ValidationError {
                kind: ErrorKind::ContentHash,
                value: s.to_owned(),
                reason: "must contain only lowercase hex characters (0-9, a-f)".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

// ---------------------------------------------------------------------------
// ContentPath
// ---------------------------------------------------------------------------

/// A validated logical document identifier (a slug such as `docs/intro`).
///
/// Paths are 1–256 characters of `[a-z0-9._/-]`, must not start or end with
/// `/`, and must not contain empty or `..` segments.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentPath(String);

impl ContentPath {
    /// The maximum length of a content path.
    pub const MAX_LEN: usize = 256;

    /// Create a new `ContentPath`, validating format.
    ///
    /// # Errors
    /// Returns an error if the path is empty, too long, or malformed.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the path as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        let fail = |reason: String| ValidationError {
            kind: ErrorKind::ContentPath,
            value: s.to_owned(),
            reason,
        };
        if s.is_empty() {
            return Err(fail("content path must not be empty".to_owned()));
        }
        if s.len() > Self::MAX_LEN {
            return Err(fail(format!(
                "content path must be at most {} characters, got {}",
                Self::MAX_LEN,
                s.len()
            )));
        }
        if !s.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.' | '/')
        }) {
            return Err(fail(
                "content path must contain only a-z, 0-9, '-', '_', '.' and '/'".to_owned(),
            ));
        }
        if s.split('/').any(|seg| seg.is_empty() || seg == "..") {
            return Err(fail(
                "content path must not have empty or '..' segments".to_owned(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ContentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentPath {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContentPath {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<ContentPath> for String {
    fn from(path: ContentPath) -> Self {
        path.0
    }
}

// ---------------------------------------------------------------------------
// BranchName
// ---------------------------------------------------------------------------

/// A validated branch name.
///
/// Branch names must be lowercase alphanumeric with hyphens, 1–64 characters.
/// Examples: `main`, `feature-intro`, `fix-typo-2`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// The maximum length of a branch name.
    pub const MAX_LEN: usize = 64;

    /// Create a new `BranchName` from a string, validating format.
    ///
    /// # Errors
    /// Returns an error if the name is empty, too long, or contains invalid characters.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// The conventional default branch, `main`.
    #[must_use]
    pub fn main() -> Self {
        Self("main".to_owned())
    }

    /// Return the branch name as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        let fail = |reason: String| ValidationError {
            kind: ErrorKind::BranchName,
            value: s.to_owned(),
            reason,
        };
        if s.is_empty() {
            return Err(fail("branch name must not be empty".to_owned()));
        }
        if s.len() > Self::MAX_LEN {
            return Err(fail(format!(
                "branch name must be at most {} characters, got {}",
                Self::MAX_LEN,
                s.len()
            )));
        }
        if s.starts_with('-') || s.ends_with('-') {
            return Err(fail(
                "branch name must not start or end with a hyphen".to_owned(),
            ));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(fail("branch name must contain only lowercase letters (a-z), digits (0-9), and hyphens (-)".to_owned()));
        }
        if s.contains("--") {
            return Err(fail(
                "branch name must not contain consecutive hyphens".to_owned(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BranchName {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BranchName {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

// ---------------------------------------------------------------------------
// VersionId
// ---------------------------------------------------------------------------

/// Opaque identifier of a [`crate::model::version::Version`] within one
/// content path. Assigned monotonically by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(u64);

impl VersionId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Return the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('v').unwrap_or(s);
        digits.parse::<u64>().map(Self).map_err(|e| ValidationError {
            kind: ErrorKind::VersionId,
            value: s.to_owned(),
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Random hex identifiers
// ---------------------------------------------------------------------------

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random identifier (16 lowercase hex characters).
            #[must_use]
            pub fn random() -> Self {
                Self(format!("{:016x}", rand::random::<u64>()))
            }

            /// Parse an identifier from its hex form.
            ///
            /// # Errors
            /// Returns an error if the string is not 16 lowercase hex characters.
            pub fn new(s: &str) -> Result<Self, ValidationError> {
                validate_hex16(s, $kind)?;
                Ok(Self(s.to_owned()))
            }

            /// Return the hex string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                validate_hex16(&s, $kind)?;
                Ok(Self(s))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

fn validate_hex16(s: &str, kind: ErrorKind) -> Result<(), ValidationError> {
    if s.len() != 16
        || !s
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    {
        return Err(ValidationError {
            kind,
            value: s.to_owned(),
            reason: "expected 16 lowercase hex characters".to_owned(),
        });
    }
    Ok(())
}

hex_id!(
    /// Identifier of a [`crate::model::branch::Branch`].
    BranchId,
    ErrorKind::BranchId
);

hex_id!(
    /// Identifier of a [`crate::model::branch::MergeRequest`].
    MergeRequestId,
    ErrorKind::MergeRequestId
);

hex_id!(
    /// Identifier of an in-memory collaborative session.
    SessionId,
    ErrorKind::SessionId
);

// ---------------------------------------------------------------------------
// Principal
// ---------------------------------------------------------------------------

/// The role an authenticated principal holds for attribution and gating.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May read and follow sessions, never author content.
    Viewer,
    /// May author content.
    #[default]
    Editor,
    /// May author content and approve reviews.
    Reviewer,
    /// Unrestricted.
    Admin,
}

impl Role {
    /// Returns `true` if this role may create versions or apply edits.
    #[must_use]
    pub const fn can_edit(self) -> bool {
        !matches!(self, Self::Viewer)
    }

    /// Returns `true` if this role may approve versions and merge requests.
    #[must_use]
    pub const fn can_review(self) -> bool {
        matches!(self, Self::Reviewer | Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Viewer => write!(f, "viewer"),
            Self::Editor => write!(f, "editor"),
            Self::Reviewer => write!(f, "reviewer"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(Self::Viewer),
            "editor" => Ok(Self::Editor),
            "reviewer" => Ok(Self::Reviewer),
            "admin" => Ok(Self::Admin),
            other => Err(ValidationError {
                kind: ErrorKind::Role,
                value: other.to_owned(),
                reason: "expected one of viewer, editor, reviewer, admin".to_owned(),
            }),
        }
    }
}

/// An authenticated identity, as supplied by the identity provider.
///
/// The engine never authenticates; it only records who did what.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// Stable user id.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Role used for gating edits and reviews.
    pub role: Role,
}

impl Principal {
    /// Create a new principal.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.display_name, self.id)
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// The kind of value that failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A [`ContentHash`] validation error.
    ContentHash,
    /// A [`ContentPath`] validation error.
    ContentPath,
    /// A [`BranchName`] validation error.
    BranchName,
    /// A [`VersionId`] validation error.
    VersionId,
    /// A [`BranchId`] validation error.
    BranchId,
    /// A [`MergeRequestId`] validation error.
    MergeRequestId,
    /// A [`SessionId`] validation error.
    SessionId,
    /// A [`Role`] validation error.
    Role,
    /// A [`crate::model::section::SectionId`] validation error.
    SectionId,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentHash => write!(f, "ContentHash"),
            Self::ContentPath => write!(f, "ContentPath"),
            Self::BranchName => write!(f, "BranchName"),
            Self::VersionId => write!(f, "VersionId"),
            Self::BranchId => write!(f, "BranchId"),
            Self::MergeRequestId => write!(f, "MergeRequestId"),
            Self::SessionId => write!(f, "SessionId"),
            Self::Role => write!(f, "Role"),
            Self::SectionId => write!(f, "SectionId"),
        }
    }
}

/// A validation error for palimpsest identifier types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// What kind of value was being validated.
    pub kind: ErrorKind,
    /// The invalid value.
    pub value: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}: {}", self.kind, self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    // -- ContentHash --

    #[test]
    fn content_hash_is_sha256_hex() {
        let h = ContentHash::of("");
        assert_eq!(
            h.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(h.short(), "e3b0c44298fc");
    }

    #[test]
    fn content_hash_rejects_uppercase() {
        assert!(ContentHash::new(&"A".repeat(64)).is_err());
        assert!(ContentHash::new(&"a".repeat(63)).is_err());
    }

    #[test]
    fn content_hash_serde_roundtrip() {
        let h = ContentHash::of("hello");
        let json = serde_json::to_string(&h).unwrap();
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    // -- ContentPath --

    #[test]
    fn content_path_valid() {
        for p in ["intro", "docs/intro", "a.b_c-d/e", "2024/posts/hello-world.md"] {
            assert!(ContentPath::new(p).is_ok(), "{p} should be valid");
        }
    }

    #[test]
    fn content_path_rejects_bad_segments() {
        for p in ["", "/intro", "intro/", "a//b", "a/../b", "Intro", "a b"] {
            assert!(ContentPath::new(p).is_err(), "{p:?} should be invalid");
        }
    }

    #[test]
    fn content_path_rejects_too_long() {
        assert!(ContentPath::new(&"a".repeat(257)).is_err());
        assert!(ContentPath::new(&"a".repeat(256)).is_ok());
    }

    #[test]
    fn content_path_serde_rejects_invalid() {
        let err = serde_json::from_str::<ContentPath>("\"a//b\"");
        assert!(err.is_err());
    }

    // -- BranchName --

    #[test]
    fn branch_name_valid() {
        for n in ["main", "feature-intro", "fix-2"] {
            assert!(BranchName::new(n).is_ok());
        }
    }

    #[test]
    fn branch_name_invalid() {
        for n in ["", "-a", "a-", "a--b", "Main", "a_b", &"a".repeat(65)] {
            assert!(BranchName::new(n).is_err(), "{n:?} should be invalid");
        }
    }

    #[test]
    fn branch_name_error_message_mentions_reason() {
        let err = BranchName::new("a--b").unwrap_err();
        assert_eq!(err.kind, ErrorKind::BranchName);
        assert!(err.to_string().contains("consecutive hyphens"));
    }

    // -- ids --

    #[test]
    fn version_id_parse_and_display() {
        let id: VersionId = "v12".parse().unwrap();
        assert_eq!(id, VersionId::new(12));
        assert_eq!(id.to_string(), "v12");
        assert_eq!("7".parse::<VersionId>().unwrap(), VersionId::new(7));
        assert!("vx".parse::<VersionId>().is_err());
    }

    #[test]
    fn random_ids_are_hex16() {
        let b = BranchId::random();
        assert_eq!(b.as_str().len(), 16);
        assert!(BranchId::new(b.as_str()).is_ok());
        assert!(SessionId::new("xyz").is_err());
        assert!(MergeRequestId::new(&"F".repeat(16)).is_err());
    }

    // -- Role / Principal --

    #[test]
    fn role_capabilities() {
        assert!(!Role::Viewer.can_edit());
        assert!(Role::Editor.can_edit());
        assert!(!Role::Editor.can_review());
        assert!(Role::Reviewer.can_review());
        assert!(Role::Admin.can_review());
    }

    #[test]
    fn role_parse_roundtrip() {
        for r in [Role::Viewer, Role::Editor, Role::Reviewer, Role::Admin] {
            assert_eq!(r.to_string().parse::<Role>().unwrap(), r);
        }
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn principal_display() {
        let p = Principal::new("u1", "Ada", Role::Editor);
        assert_eq!(p.to_string(), "Ada <u1>");
    }
}
