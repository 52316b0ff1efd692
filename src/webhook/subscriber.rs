use log::error;

use super::Webhook;
use crate::cert;

/// Adapts a webhook to the manager's subscriber contract: the sidecar is
/// asked to reload after each committed batch. The trigger runs on its own
/// task so the manager never waits on it; failures are logged only.
pub struct Subscriber {
    hook: Webhook,
}

impl Subscriber {
    pub fn new(hook: Webhook) -> Self {
        Self { hook }
    }
}

impl cert::Subscriber for Subscriber {
    fn changed(&self) {
        let hook = self.hook.clone();
        tokio::spawn(async move {
            if let Err(e) = hook.trigger().await {
                error!("reload webhook failed: {e}");
            }
        });
    }
}
