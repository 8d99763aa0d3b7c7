use serde::{Deserialize, Serialize};

/// What to do when a single entry fails to initialize during enumeration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum EntryFailurePolicy {
    /// Fail the whole index build.
    #[default]
    Abort,
    /// Skip failing entries and log them.
    ///
    /// With an empty `allow` list every failing entry is skipped; otherwise
    /// only entries whose name contains one of the substrings are, and the
    /// rest still abort.
    Skip {
        #[serde(default)]
        allow: Vec<String>,
    },
}

impl EntryFailurePolicy {
    pub fn skip_all() -> Self {
        Self::Skip { allow: Vec::new() }
    }

    pub fn skip_matching<I, S>(allow: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Skip {
            allow: allow.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether an entry that failed with `name` (if it had a readable one)
    /// may be skipped.
    pub fn allows_skip(&self, name: Option<&str>) -> bool {
        match self {
            Self::Abort => false,
            Self::Skip { allow } if allow.is_empty() => true,
            Self::Skip { allow } => {
                name.is_some_and(|name| allow.iter().any(|pattern| name.contains(pattern)))
            }
        }
    }
}

/// Options for building an [`ArchiveIndex`](crate::ArchiveIndex).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexOptions {
    pub entry_failure: EntryFailurePolicy,
}

impl IndexOptions {
    pub fn entry_failure(mut self, policy: EntryFailurePolicy) -> Self {
        self.entry_failure = policy;
        self
    }
}
