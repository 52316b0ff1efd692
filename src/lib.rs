use k8s_openapi::api::{core::v1 as core, networking::v1 as networking};
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as meta;
use std::collections::BTreeMap as Map;

pub mod cert;
pub mod event;
pub mod metrics;
pub mod queue;
pub mod webhook;

/// Secret data key holding the certificate bytes.
pub const TLS_CERT_KEY: &str = "tls.crt";
/// Secret data key holding the private key bytes.
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}
impl TryFrom<&meta::ObjectMeta> for ObjectKey {
    type Error = &'static str;
    fn try_from(metadata: &meta::ObjectMeta) -> Result<Self, Self::Error> {
        Ok(Self {
            namespace: metadata.namespace.clone().ok_or("no namespace")?,
            name: metadata.name.clone().ok_or("no name")?,
        })
    }
}
impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The slice of an ingress resource this system consumes: its TLS secret
/// references, its virtual-host rules and its annotations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ingress {
    pub namespace: String,
    pub name: String,
    pub tls_refs: Vec<String>,
    pub rules: Vec<IngressRule>,
    pub annotations: Map<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressRule {
    pub host: String,
}

impl TryFrom<&networking::Ingress> for Ingress {
    type Error = &'static str;

    fn try_from(ing: &networking::Ingress) -> Result<Self, Self::Error> {
        let key = ObjectKey::try_from(&ing.metadata)?;
        let spec = ing.spec.as_ref();

        let tls_refs = (spec.and_then(|s| s.tls.as_ref()).into_iter().flatten())
            .filter_map(|tls| tls.secret_name.clone())
            .collect();

        // rules without a host cannot appear in the forced-HTTPS list
        let rules = (spec.and_then(|s| s.rules.as_ref()).into_iter().flatten())
            .filter_map(|rule| rule.host.clone())
            .map(|host| IngressRule { host })
            .collect();

        Ok(Self {
            namespace: key.namespace,
            name: key.name,
            tls_refs,
            rules,
            annotations: ing.metadata.annotations.clone().unwrap_or_default(),
        })
    }
}

/// The slice of a secret resource this system consumes. The data bytes are
/// opaque; only the `tls.crt` and `tls.key` entries are ever read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Secret {
    pub namespace: String,
    pub name: String,
    pub data: Map<String, Vec<u8>>,
}

impl TryFrom<&core::Secret> for Secret {
    type Error = &'static str;

    fn try_from(sec: &core::Secret) -> Result<Self, Self::Error> {
        let key = ObjectKey::try_from(&sec.metadata)?;
        let data = (sec.data.iter().flatten())
            .map(|(k, v)| (k.clone(), v.0.clone()))
            .collect();
        Ok(Self {
            namespace: key.namespace,
            name: key.name,
            data,
        })
    }
}

/// A watched resource, one variant per kind the manager handles.
#[derive(Clone, Debug)]
pub enum Resource {
    Ingress(Ingress),
    Secret(Secret),
}

/// A watch notification as enqueued by the event serializer.
#[derive(Clone, Debug)]
pub enum Event {
    Add(Resource),
    Update(Resource, Resource),
    Delete(Resource),
}

/// Read-only synchronous secret lookup, backed by the watch cache in
/// production and by a plain map in tests.
pub trait SecretStore: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Option<Secret>;
}
