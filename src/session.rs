//! Account scoping — every store call carries an explicit [`Scope`].

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The account whose data a store call reads or writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub user_id: String,
}

impl Scope {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.user_id)
    }
}

/// The signed-in state of a consumer. Signed-out sessions may not touch any store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    scope: Option<Scope>,
}

impl Session {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            scope: Some(Scope::new(user_id)),
        }
    }

    pub fn signed_out() -> Self {
        Self { scope: None }
    }

    pub fn from_user(user_id: Option<String>) -> Self {
        Self {
            scope: user_id.map(Scope::new),
        }
    }

    /// The active scope, or [`Error::Unauthenticated`].
    pub fn require(&self) -> Result<&Scope, Error> {
        self.scope.as_ref().ok_or(Error::Unauthenticated)
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }
}
