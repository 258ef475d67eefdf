use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// What a storage operation found and did.
///
/// Operations never report "already there" or "already gone" as failures.
/// The caller decides what each outcome means for the operation it asked
/// for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Outcome {
    /// The operation changed the system.
    Done,

    /// The requested state was already in place; nothing was changed.
    AlreadySatisfied,

    /// The resource the operation targets, or one it needs, does not exist.
    NotFound,
}

impl Outcome {
    pub fn is_done(self) -> bool {
        self == Outcome::Done
    }
}
