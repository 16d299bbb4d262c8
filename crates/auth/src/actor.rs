use serde::{Deserialize, Serialize};

use cardflow_core::UserId;

use crate::Role;

/// A fully resolved caller for authorization decisions.
///
/// Construction is decoupled from storage and transport: the API/worker layer
/// derives this from whatever credential mechanism is in use and passes it to
/// every engine operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }
}
