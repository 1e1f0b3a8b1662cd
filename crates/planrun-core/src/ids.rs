//! Plan keys and branded identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of an active plan: one session per `(plan_id, branch)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanKey {
    /// Plan identifier.
    pub plan_id: String,
    /// Branch within the plan.
    pub branch: String,
}

impl PlanKey {
    /// Build a key from a plan id and branch name.
    pub fn new(plan_id: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            branch: branch.into(),
        }
    }
}

impl fmt::Display for PlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.plan_id, self.branch)
    }
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh time-ordered identifier.
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7().to_string())
            }

            /// Borrow the raw string form.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id!(
    /// Identifier of one subscriber attached to a session.
    SubscriptionId
);

branded_id!(
    /// Identifier of one streamed model reply.
    ReplyId
);
