use async_trait::async_trait;

use super::Webhook;
use crate::cert;

/// Adapts a webhook to the manager's validator contract: the sidecar is
/// asked to check the proposed configuration before every commit.
pub struct Validator {
    hook: Webhook,
}

impl Validator {
    pub fn new(hook: Webhook) -> Self {
        Self { hook }
    }
}

#[async_trait]
impl cert::Validator for Validator {
    async fn validate(&self) -> Result<(), cert::BoxError> {
        self.hook.trigger().await.map_err(Into::into)
    }
}
