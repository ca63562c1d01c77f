use serde::{Deserialize, Serialize};

/// A user as exposed to clients. The password column is never selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
}
