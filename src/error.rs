use std::path::PathBuf;

/// Stable error-kind tags for `GitOps` construction and guard failures.
///
/// Kept as a separate enum (rather than folding straight into `Error`) so
/// callers can match on "which of the nine checks failed" without parsing
/// display strings — the construction order in `git::ops::GitOps::new` is
/// exactly the order these variants are declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitGuardKind {
    EmptyPath,
    RelativePath,
    PathNotFound,
    NotDirectory,
    NonCanonicalPath,
    NotGitRepo,
    PathMismatch,
    RepoRootNotAllowed,
    OutsideWorktreeBase,
    UnexpectedBranch,
    UnexpectedRemote,
    ProtectedBranch,
    DestructiveNotAllowed,
    ConcurrentWrite,
}

impl GitGuardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyPath => "EmptyPath",
            Self::RelativePath => "RelativePath",
            Self::PathNotFound => "PathNotFound",
            Self::NotDirectory => "NotDirectory",
            Self::NonCanonicalPath => "NonCanonicalPath",
            Self::NotGitRepo => "NotGitRepo",
            Self::PathMismatch => "PathMismatch",
            Self::RepoRootNotAllowed => "RepoRootNotAllowed",
            Self::OutsideWorktreeBase => "OutsideWorktreeBase",
            Self::UnexpectedBranch => "UnexpectedBranch",
            Self::UnexpectedRemote => "UnexpectedRemote",
            Self::ProtectedBranch => "ProtectedBranch",
            Self::DestructiveNotAllowed => "DestructiveNotAllowed",
            Self::ConcurrentWrite => "ConcurrentWrite",
        }
    }
}

impl std::fmt::Display for GitGuardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("git guard [{kind}]: {message}")]
    GitGuard {
        kind: GitGuardKind,
        message: String,
    },

    #[error("git operation failed: {0}")]
    Git(String),

    #[error("state machine: invalid transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("state machine: precondition violated, expected {expected}, found {found}")]
    WrongPrecondition { expected: String, found: String },

    #[error("prd validation error on field `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("review schema error on field `{field}`: {message}")]
    Schema { field: String, message: String },

    #[error("malformed review output: {0}")]
    MalformedReview(String),

    #[error("worktree error: {0}")]
    Worktree(String),

    #[error("merge error: {0}")]
    Merge(String),

    #[error("oracle error: {0}")]
    Oracle(String),

    #[error("{stage} escalated: {message}")]
    Escalated { stage: String, message: String },

    #[error("forge error: {0}")]
    Forge(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable kind tag for events/audit entries. Mirrors the thiserror variant
    /// name without exposing the display message, so consumers can switch on
    /// it without string-matching.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Error::GitGuard { kind, .. } => kind.as_str(),
            Error::Git(_) => "Git",
            Error::InvalidTransition { .. } => "InvalidTransition",
            Error::WrongPrecondition { .. } => "WrongPrecondition",
            Error::Validation { .. } => "ValidationError",
            Error::Schema { .. } => "SchemaError",
            Error::MalformedReview(_) => "MalformedReview",
            Error::Worktree(_) => "Worktree",
            Error::Merge(_) => "Merge",
            Error::Oracle(_) => "Oracle",
            Error::Escalated { .. } => "Escalated",
            Error::Forge(_) => "Forge",
            Error::Process(_) => "Process",
            Error::ConfigNotFound(_) => "ConfigNotFound",
            Error::ConfigValidation(_) => "ConfigValidation",
            Error::ConfigParse(_) => "ConfigParse",
            Error::Cancelled => "Cancelled",
            Error::Io(_) => "Io",
            Error::Json(_) => "Json",
            Error::Yaml(_) => "Yaml",
        }
    }
}
