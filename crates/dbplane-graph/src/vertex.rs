//! Change vertices

use std::fmt;

use dbplane_common::ManagedObject;

/// What the executor does with a vertex
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Create the object
    Create,
    /// Replace the object's spec and metadata
    Update,
    /// Strip the finalizer and delete the object
    Delete,
    /// Replace only the object's status
    Status,
    /// Nothing; the vertex only anchors ordering
    Noop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "Create"),
            Self::Update => write!(f, "Update"),
            Self::Delete => write!(f, "Delete"),
            Self::Status => write!(f, "Status"),
            Self::Noop => write!(f, "Noop"),
        }
    }
}

/// One staged change
///
/// `original` holds the snapshot the change was computed from. `Update` and
/// `Status` vertices always carry it.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectVertex {
    /// Desired object
    pub object: ManagedObject,
    /// Object as read from the store
    pub original: Option<ManagedObject>,
    /// What to do
    pub action: Action,
}

impl ObjectVertex {
    /// Vertex without an original snapshot
    pub fn new(object: ManagedObject, action: Action) -> Self {
        Self {
            object,
            original: None,
            action,
        }
    }

    /// Vertex carrying the snapshot it was derived from
    pub fn with_original(object: ManagedObject, original: ManagedObject, action: Action) -> Self {
        Self {
            object,
            original: Some(original),
            action,
        }
    }
}

impl fmt::Display for ObjectVertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.object.key())
    }
}
