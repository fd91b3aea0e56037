use crate::domain::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Control-plane account. The hash is bcrypt; it is re-verified on every
/// switch into live execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}
