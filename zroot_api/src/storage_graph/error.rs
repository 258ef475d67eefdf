use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PlanError {
    #[error("Resource '{0}' is declared more than once")]
    DuplicateResource(String),

    #[error(
        "Partitions '{first}' and '{second}' both claim number {ordinal} on disk '{disk}'"
    )]
    DuplicatePartitionNumber {
        disk: String,
        ordinal: u32,
        first: String,
        second: String,
    },

    #[error("Resource '{resource}' references {kind} '{target}', which is not declared")]
    MissingReference {
        resource: String,
        kind: String,
        target: String,
    },

    #[error("Dependency cycle among resources: {}", .0.join(", "))]
    Cycle(Vec<String>),
}
