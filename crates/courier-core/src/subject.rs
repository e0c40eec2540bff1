use thiserror::Error;

/// Errors that can occur building subjects.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Schema name would produce an invalid subject token.
    #[error("subject name must not be empty or contain '.', '*' or '>'")]
    InvalidName,

    /// A prefix or suffix would produce an invalid subject token.
    #[error("subject affix must not contain '*' or '>'")]
    InvalidAffix,
}

/// The four CRUD groups addressed by the protocol.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CrudKind {
    /// Count documents.
    Count,
    /// Create documents.
    Create,
    /// Find documents.
    Find,
    /// Update documents.
    Update,
}

impl CrudKind {
    /// Every group, in canonical order.
    pub const ALL: [Self; 4] = [Self::Count, Self::Create, Self::Find, Self::Update];

    /// Canonical name of the group.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Create => "create",
            Self::Find => "find",
            Self::Update => "update",
        }
    }
}

impl std::fmt::Display for CrudKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered pair of wire subjects for one CRUD group.
///
/// The base subject carries request/reply traffic; both are subscribed by
/// stores and by provider event registrations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubjectPair {
    /// Concrete subject, `{prefix}.{name}[.{suffix}]`.
    pub base: String,

    /// Greedy wildcard variant, `{base}.>`.
    pub wildcard: String,
}

impl SubjectPair {
    fn new(base: String) -> Self {
        let wildcard = format!("{base}.>");
        Self { base, wildcard }
    }
}

/// Per-group subject prefixes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Prefixes {
    /// Prefix for the count group.
    pub count: String,
    /// Prefix for the create group.
    pub create: String,
    /// Prefix for the find group.
    pub find: String,
    /// Prefix for the update group.
    pub update: String,
}

impl Default for Prefixes {
    fn default() -> Self {
        Self {
            count: "count".to_owned(),
            create: "create".to_owned(),
            find: "find".to_owned(),
            update: "update".to_owned(),
        }
    }
}

/// Options refining the derived subjects.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SubjectOptions {
    /// Per-group prefixes.
    pub prefixes: Prefixes,

    /// Optional trailing segment appended to every base subject.
    pub suffix: String,
}

/// The full subject tuple derived from a schema name.
///
/// Shared by providers and stores so both ends agree on wire subjects by
/// construction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubjectSet {
    /// Subjects for the count group.
    pub count: SubjectPair,
    /// Subjects for the create group.
    pub create: SubjectPair,
    /// Subjects for the find group.
    pub find: SubjectPair,
    /// Subjects for the update group.
    pub update: SubjectPair,
}

impl SubjectSet {
    /// Derives the subject tuple for `name`.
    ///
    /// The name segment is lowercased. A non-empty suffix is appended with
    /// a `.` separator.
    ///
    /// # Errors
    /// Returns an error if the name is empty or contains `.`, `*` or `>`,
    /// or if an affix contains a wildcard token.
    pub fn build(name: &str, options: &SubjectOptions) -> Result<Self, Error> {
        if name.is_empty() || name.contains('.') || name.contains('*') || name.contains('>') {
            return Err(Error::InvalidName);
        }

        let affixes = [
            &options.prefixes.count,
            &options.prefixes.create,
            &options.prefixes.find,
            &options.prefixes.update,
            &options.suffix,
        ];
        if affixes.iter().any(|a| a.contains('*') || a.contains('>')) {
            return Err(Error::InvalidAffix);
        }

        let name = name.to_lowercase();
        let base = |prefix: &str| {
            if options.suffix.is_empty() {
                format!("{prefix}.{name}")
            } else {
                format!("{prefix}.{name}.{}", options.suffix)
            }
        };

        Ok(Self {
            count: SubjectPair::new(base(&options.prefixes.count)),
            create: SubjectPair::new(base(&options.prefixes.create)),
            find: SubjectPair::new(base(&options.prefixes.find)),
            update: SubjectPair::new(base(&options.prefixes.update)),
        })
    }

    /// Subjects for the given group.
    #[must_use]
    pub const fn pair(&self, kind: CrudKind) -> &SubjectPair {
        match kind {
            CrudKind::Count => &self.count,
            CrudKind::Create => &self.create,
            CrudKind::Find => &self.find,
            CrudKind::Update => &self.update,
        }
    }
}
