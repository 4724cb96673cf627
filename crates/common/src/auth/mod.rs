//! Acting user identity
//!
//! Every orchestration call runs on behalf of a user; the identity is
//! stamped on failure ledger entries and carried by article tasks.

use crate::config::ActorConfig;
use serde::{Deserialize, Serialize};

/// User on whose behalf a batch runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: i64,
    pub username: String,
}

impl Actor {
    pub fn new(user_id: i64, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}

impl From<&ActorConfig> for Actor {
    fn from(config: &ActorConfig) -> Self {
        Self::new(config.user_id, config.username.clone())
    }
}

impl Default for Actor {
    fn default() -> Self {
        Self::from(&ActorConfig::default())
    }
}
