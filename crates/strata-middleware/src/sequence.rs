//! Resolved, ordered middleware sequences.

use std::fmt;
use std::sync::Arc;

use crate::middleware::Middleware;

/// One unit in a resolved sequence, with the parameters it was declared with.
#[derive(Clone)]
pub struct SequenceEntry {
    id: String,
    unit: Arc<dyn Middleware>,
    params: Vec<String>,
}

impl SequenceEntry {
    /// Creates an entry for a unit registered under `id`.
    pub fn new(id: impl Into<String>, unit: Arc<dyn Middleware>, params: Vec<String>) -> Self {
        Self {
            id: id.into(),
            unit,
            params,
        }
    }

    /// The registered unit identity.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The unit.
    #[must_use]
    pub fn unit(&self) -> &Arc<dyn Middleware> {
        &self.unit
    }

    /// Bound parameters.
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// `id` or `id:p1,p2`.
    #[must_use]
    pub fn label(&self) -> String {
        if self.params.is_empty() {
            self.id.clone()
        } else {
            format!("{}:{}", self.id, self.params.join(","))
        }
    }
}

impl fmt::Debug for SequenceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceEntry")
            .field("id", &self.id)
            .field("unit", &self.unit.name())
            .field("params", &self.params)
            .finish()
    }
}

/// Entries compare by identity and parameters; the unit instance is ignored.
impl PartialEq for SequenceEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.params == other.params
    }
}

impl Eq for SequenceEntry {}

/// The flattened, ordered list of units for one route.
///
/// Cheap to clone and shareable across tasks.
#[derive(Clone, PartialEq, Eq)]
pub struct Sequence {
    inner: Arc<SequenceInner>,
}

#[derive(PartialEq, Eq)]
struct SequenceInner {
    name: String,
    entries: Vec<SequenceEntry>,
}

impl Sequence {
    /// Creates a sequence directly from entries, bypassing resolution.
    pub fn new(name: impl Into<String>, entries: Vec<SequenceEntry>) -> Self {
        Self {
            inner: Arc::new(SequenceInner {
                name: name.into(),
                entries,
            }),
        }
    }

    /// The route name this sequence was built for (used as a metrics label).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The entries, in execution order.
    #[must_use]
    pub fn entries(&self) -> &[SequenceEntry] {
        &self.inner.entries
    }

    /// Number of units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Returns `true` if the sequence has no units.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Unit identities in order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.inner.entries.iter().map(SequenceEntry::id).collect()
    }

    /// `id` / `id:params` labels in order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.inner.entries.iter().map(SequenceEntry::label).collect()
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("name", &self.inner.name)
            .field("units", &self.labels())
            .finish()
    }
}
