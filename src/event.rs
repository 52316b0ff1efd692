//! Human-visible events recorded against the ingress that owns a cert pair.

use k8s_openapi::api::networking::v1 as networking;
use kube::Resource as _;
use kube::runtime::events;
use kube::runtime::reflector::{ObjectRef, Store};
use log::debug;

const REASON_CERT_PAIR_WRITTEN: &str = "CertPairWritten";
const REASON_CERT_PAIR_DELETED: &str = "CertPairDeleted";
const REASON_TLS_SECRET_INVALID: &str = "TLSSecretInvalid";

/// Records cert pair lifecycle events.
pub trait Recorder: Send + Sync {
    /// Records the writing of a certificate pair.
    fn new_write(&self, namespace: &str, ingress_name: &str, secret_name: &str);

    /// Records the deletion of a certificate pair.
    fn new_delete(&self, namespace: &str, ingress_name: &str, secret_name: &str);

    /// Records an invalid TLS secret.
    fn new_invalid_secret(&self, namespace: &str, ingress_name: &str, secret_name: &str);
}

/// A recorder that does nothing.
pub struct NopRecorder;

impl Recorder for NopRecorder {
    fn new_write(&self, _namespace: &str, _ingress_name: &str, _secret_name: &str) {}
    fn new_delete(&self, _namespace: &str, _ingress_name: &str, _secret_name: &str) {}
    fn new_invalid_secret(&self, _namespace: &str, _ingress_name: &str, _secret_name: &str) {}
}

/// Records events to the Kubernetes control plane, attached to the owning
/// ingress. Publishing happens on a spawned task so callers never wait on
/// the API server.
pub struct KubernetesRecorder {
    events: events::Recorder,
    ingresses: Store<networking::Ingress>,
}

impl KubernetesRecorder {
    pub fn new(events: events::Recorder, ingresses: Store<networking::Ingress>) -> Self {
        Self { events, ingresses }
    }

    fn publish(&self, namespace: &str, ingress_name: &str, ev: events::Event) {
        // An ingress missing from the cache has probably just been deleted;
        // there is nothing left to attach the event to.
        let Some(ingress) = self.ingresses.get(&ObjectRef::new(ingress_name).within(namespace))
        else {
            return;
        };
        let reference = ingress.object_ref(&());
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = events.publish(&ev, &reference).await {
                debug!("cannot publish event: {e}");
            }
        });
    }
}

impl Recorder for KubernetesRecorder {
    fn new_write(&self, namespace: &str, ingress_name: &str, secret_name: &str) {
        self.publish(
            namespace,
            ingress_name,
            events::Event {
                type_: events::EventType::Normal,
                reason: REASON_CERT_PAIR_WRITTEN.to_string(),
                note: Some(format!("Loaded TLS certificate from secret {secret_name}")),
                action: "Write".to_string(),
                secondary: None,
            },
        );
    }

    fn new_delete(&self, namespace: &str, ingress_name: &str, secret_name: &str) {
        self.publish(
            namespace,
            ingress_name,
            events::Event {
                type_: events::EventType::Normal,
                reason: REASON_CERT_PAIR_DELETED.to_string(),
                note: Some(format!("Unloaded TLS certificate from secret {secret_name}")),
                action: "Delete".to_string(),
                secondary: None,
            },
        );
    }

    fn new_invalid_secret(&self, namespace: &str, ingress_name: &str, secret_name: &str) {
        self.publish(
            namespace,
            ingress_name,
            events::Event {
                type_: events::EventType::Warning,
                reason: REASON_TLS_SECRET_INVALID.to_string(),
                note: Some(format!(
                    "Could not load TLS certificate from invalid secret {secret_name}"
                )),
                action: "Validate".to_string(),
                secondary: None,
            },
        );
    }
}
