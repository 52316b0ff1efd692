//! The certificate manager: consumes ingress and secret events and keeps a
//! proxy-owned directory of cert-pair files in sync with the cluster.

use async_trait::async_trait;
use log::{debug, error, info};
use std::collections::{BTreeMap as Map, BTreeSet};
use std::io::{self, Write as _};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{
    Event, Ingress, ObjectKey, Resource, Secret, SecretStore, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY,
    event, metrics,
};


/// Labels used by metrics and logs.
pub const LABEL_NAMESPACE: &str = "namespace";
pub const LABEL_INGRESS_NAME: &str = "ingress_name";
pub const LABEL_SECRET_NAME: &str = "secret_name";
pub const LABEL_CONTEXT: &str = "context";

/// Error contexts used as metric labels.
pub const CONTEXT_UPSERT_INGRESS: &str = "upsert_ingress";
pub const CONTEXT_UPSERT_SECRET: &str = "upsert_secret";
pub const CONTEXT_DELETE_INGRESS: &str = "delete_ingress";
pub const CONTEXT_DELETE_SECRET: &str = "delete_secret";

/// Ingresses carrying this annotation with the value "false" have their hosts
/// denied plain-HTTP traffic. Matches the GCE ingress annotation that
/// accomplishes the same thing.
pub const ANNOTATION_ALLOW_HTTP: &str = "kubernetes.io/ingress.allow-http";

const CERT_PAIR_SUFFIX: &str = ".pem";
const CERT_PAIR_SEPARATOR: char = '-';
const CERT_PAIR_MODE: u32 = 0o600;

// Temp names must never parse as a cert pair, so a concurrent directory
// listing cannot mistake an uncommitted file for a live one.
const TEMP_PREFIX: &str = ".tmp-";
const FORCE_HTTPS_TEMP_PREFIX: &str = ".force-https-hosts-";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("writing this cert pair would produce an invalid configuration")]
    Invalid(#[source] BoxError),
    #[error("cannot create temp file in {}", dir.display())]
    TempFile {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot fsync {}", path.display())]
    Sync {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot chmod {}", path.display())]
    Chmod {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot move temp file to {}", path.display())]
    Rename {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot list cert pairs in {}", dir.display())]
    List {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// True when the error is a validator rejection rather than an
    /// operational failure. Callers treat the two very differently: a
    /// rejection is user misconfiguration, not something to retry or alert on.
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

/// Decides whether the current state of the output directory, including any
/// not-yet-committed temp file, is acceptable to the downstream proxy.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self) -> Result<(), BoxError>;
}

/// A validator that accepts everything. The default.
pub struct OptimisticValidator;

#[async_trait]
impl Validator for OptimisticValidator {
    async fn validate(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Notified after every event that changed the managed files. Implementations
/// must not block the caller.
pub trait Subscriber: Send + Sync {
    fn changed(&self);
}

/// The counters a manager maintains. Defaults to no-ops so the manager never
/// branches on metrics presence.
pub struct Metrics {
    pub writes: Box<dyn metrics::CounterVec>,
    pub deletes: Box<dyn metrics::CounterVec>,
    pub errors: Box<dyn metrics::CounterVec>,
    pub invalids: Box<dyn metrics::CounterVec>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            writes: Box::new(metrics::NopCounterVec),
            deletes: Box::new(metrics::NopCounterVec),
            errors: Box::new(metrics::NopCounterVec),
            invalids: Box::new(metrics::NopCounterVec),
        }
    }
}

/// Identity of one managed file: `<namespace>-<ingress>-<secret>.pem`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct CertPair {
    pub namespace: String,
    pub ingress_name: String,
    pub secret_name: String,
}

impl CertPair {
    /// Parses a directory entry name. Names that do not match the
    /// namespace-ingress-secret.pem pattern yield `None`; note this means
    /// components containing `-` do not round-trip, and such files are
    /// skipped during listing.
    pub(crate) fn from_filename(filename: &str) -> Option<Self> {
        let stem = filename.strip_suffix(CERT_PAIR_SUFFIX)?;
        let mut parts = stem.split(CERT_PAIR_SEPARATOR);
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(ingress_name), Some(secret_name), None) => Some(Self {
                namespace: namespace.to_string(),
                ingress_name: ingress_name.to_string(),
                secret_name: secret_name.to_string(),
            }),
            _ => None,
        }
    }

    pub(crate) fn filename(&self) -> String {
        format!(
            "{}-{}-{}{CERT_PAIR_SUFFIX}",
            self.namespace, self.ingress_name, self.secret_name
        )
    }
}

/// The allow-http annotation is permissive: any value other than "false"
/// (case-insensitive, whitespace-trimmed) counts as true, including unset.
fn allow_http(value: Option<&String>) -> bool {
    value.is_none_or(|v| v.trim().to_lowercase() != "false")
}

fn collect_hosts(ing: &Ingress) -> Vec<String> {
    (ing.rules.iter())
        .filter(|r| !r.host.is_empty())
        .map(|r| r.host.clone())
        .collect()
}

fn payload(cert: &[u8], key: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(cert.len() + 1 + key.len());
    bytes.extend_from_slice(cert);
    bytes.push(b'\n');
    bytes.extend_from_slice(key);
    bytes
}

fn fnv1a32(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[derive(Debug)]
struct ForceHttpsEntry {
    hosts: Vec<String>,
    force_https: bool,
}

impl ForceHttpsEntry {
    /// The hosts this entry contributes to the rendered file: none unless
    /// the ingress is forced to HTTPS.
    fn contributed_hosts(&self) -> &[String] {
        if self.force_https { &self.hosts } else { &[] }
    }
}

#[derive(Default)]
struct ForceHttpsTable(Map<ObjectKey, ForceHttpsEntry>);

impl ForceHttpsTable {
    /// Records the forced-HTTPS state for an ingress, returning whether its
    /// contribution to the hosts file changed. An entry that contributes no
    /// hosts (absent, not forced, or forced without hosts) compares equal to
    /// any other such entry.
    fn mark(&mut self, key: ObjectKey, force_https: bool, hosts: Vec<String>) -> bool {
        let entry = ForceHttpsEntry { hosts, force_https };
        let changed = self.0.get(&key).map_or(&[][..], ForceHttpsEntry::contributed_hosts)
            != entry.contributed_hosts();
        self.0.insert(key, entry);
        changed
    }

    fn remove(&mut self, key: &ObjectKey) -> Option<ForceHttpsEntry> {
        self.0.remove(key)
    }

    /// Line-feed-joined hosts of every forced-HTTPS ingress.
    fn bytes(&self) -> Vec<u8> {
        let hosts: Vec<&str> = (self.0.values())
            .flat_map(|e| e.contributed_hosts().iter().map(String::as_str))
            .collect();
        hosts.join("\n").into_bytes()
    }
}

/// Which ingresses reference a given secret, keyed by (namespace, secret).
/// Answers "which cert pairs may need rewriting when this secret changes?".
#[derive(Default)]
struct SecretRefs(Map<ObjectKey, BTreeSet<String>>);

impl SecretRefs {
    fn add(&mut self, namespace: &str, ingress_name: &str, secret_name: &str) {
        let key = ObjectKey {
            namespace: namespace.to_string(),
            name: secret_name.to_string(),
        };
        self.0.entry(key).or_default().insert(ingress_name.to_string());
    }

    fn remove(&mut self, namespace: &str, ingress_name: &str, secret_name: &str) {
        let key = ObjectKey {
            namespace: namespace.to_string(),
            name: secret_name.to_string(),
        };
        if let Some(ingresses) = self.0.get_mut(&key) {
            ingresses.remove(ingress_name);
        }
    }

    fn get(&self, namespace: &str, secret_name: &str) -> BTreeSet<String> {
        let key = ObjectKey {
            namespace: namespace.to_string(),
            name: secret_name.to_string(),
        };
        self.0.get(&key).cloned().unwrap_or_default()
    }
}

/// Builds a [`Manager`]. Defaults: optimistic validator, no subscribers, nop
/// recorder, nop metrics, no forced-HTTPS hosts file.
pub struct Builder {
    tls_dir: PathBuf,
    force_https_hosts_file: Option<PathBuf>,
    secret_store: Arc<dyn SecretStore>,
    validator: Arc<dyn Validator>,
    subscribers: Vec<Arc<dyn Subscriber>>,
    recorder: Arc<dyn event::Recorder>,
    metric: Metrics,
}

impl Builder {
    /// The validator probed before every file swap.
    pub fn validator(mut self, v: Arc<dyn Validator>) -> Self {
        self.validator = v;
        self
    }

    /// Registers a subscriber notified after every changed batch.
    pub fn subscriber(mut self, s: Arc<dyn Subscriber>) -> Self {
        self.subscribers.push(s);
        self
    }

    pub fn recorder(mut self, r: Arc<dyn event::Recorder>) -> Self {
        self.recorder = r;
        self
    }

    pub fn metrics(mut self, m: Metrics) -> Self {
        self.metric = m;
        self
    }

    /// File in which the forced-HTTPS host list is maintained. When unset,
    /// forced-HTTPS maintenance is skipped.
    pub fn force_https_hosts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.force_https_hosts_file = Some(path.into());
        self
    }

    pub fn build(self) -> Manager {
        Manager {
            tls_dir: self.tls_dir,
            force_https_hosts_file: self.force_https_hosts_file,
            secret_store: self.secret_store,
            validator: self.validator,
            subscribers: self.subscribers,
            recorder: self.recorder,
            metric: self.metric,
            secret_refs: SecretRefs::default(),
            force_https: ForceHttpsTable::default(),
        }
    }
}

/// Persists ingress TLS cert pairs to a directory owned by this process.
///
/// The manager is driven by a single consumer; all state mutation is
/// serialized by the event queue in front of it.
pub struct Manager {
    tls_dir: PathBuf,
    force_https_hosts_file: Option<PathBuf>,
    secret_store: Arc<dyn SecretStore>,
    validator: Arc<dyn Validator>,
    subscribers: Vec<Arc<dyn Subscriber>>,
    recorder: Arc<dyn event::Recorder>,
    metric: Metrics,
    secret_refs: SecretRefs,
    force_https: ForceHttpsTable,
}

impl Manager {
    pub fn builder(tls_dir: impl Into<PathBuf>, secret_store: Arc<dyn SecretStore>) -> Builder {
        Builder {
            tls_dir: tls_dir.into(),
            force_https_hosts_file: None,
            secret_store,
            validator: Arc::new(OptimisticValidator),
            subscribers: Vec::new(),
            recorder: Arc::new(event::NopRecorder),
            metric: Metrics::default(),
        }
    }

    /// Applies one serialized event.
    pub async fn handle(&mut self, event: Event) {
        match event {
            Event::Add(obj) => self.on_add(obj).await,
            Event::Update(old, new) => self.on_update(old, new).await,
            Event::Delete(obj) => self.on_delete(obj).await,
        }
    }

    /// Handles a new ingress or secret resource.
    pub async fn on_add(&mut self, obj: Resource) {
        let changed = match obj {
            Resource::Ingress(ing) => self.upsert_ingress(&ing).await,
            Resource::Secret(sec) => self.upsert_secret(&sec).await,
        };
        if changed {
            self.notify_subscribers();
        }
    }

    /// Handles an updated resource. Only the new value matters.
    pub async fn on_update(&mut self, _old: Resource, new: Resource) {
        self.on_add(new).await
    }

    /// Handles a deleted ingress or secret resource.
    pub async fn on_delete(&mut self, obj: Resource) {
        let changed = match obj {
            Resource::Ingress(ing) => self.delete_ingress(&ing),
            Resource::Secret(sec) => self.delete_secret(&sec),
        };
        if changed {
            self.notify_subscribers();
        }
    }

    async fn upsert_ingress(&mut self, ing: &Ingress) -> bool {
        debug!("processing ingress upsert for {}/{}", ing.namespace, ing.name);

        let mut changed = false;

        let allow_http = allow_http(ing.annotations.get(ANNOTATION_ALLOW_HTTP));
        let key = ObjectKey {
            namespace: ing.namespace.clone(),
            name: ing.name.clone(),
        };
        if self.force_https.mark(key, !allow_http, collect_hosts(ing)) {
            changed = true;
            debug!(
                "{}/{}: allowed http endpoints changed (allow_http={allow_http})",
                ing.namespace, ing.name
            );
            if let Err(e) = self.write_force_https_hosts() {
                error!("failed to write updated force https host list: {e}");
                self.count_error(CONTEXT_UPSERT_INGRESS);
            }
        }

        let existing = match self.existing(&ing.namespace, &ing.name) {
            Ok(pairs) => pairs,
            Err(e) => {
                error!("cannot list existing cert pairs, stale cert pairs will not be reaped: {e}");
                self.count_error(CONTEXT_UPSERT_INGRESS);
                BTreeSet::new()
            }
        };

        let mut keep = BTreeSet::new();
        for secret_name in &ing.tls_refs {
            self.secret_refs.add(&ing.namespace, &ing.name, secret_name);

            let Some(secret) = self.secret_store.get(&ing.namespace, secret_name) else {
                // User misconfiguration (an ingress referencing a TLS secret
                // that does not yet exist), not an operational error.
                info!("cannot get TLS secret {}/{secret_name}", ing.namespace);
                self.record_invalid(&ing.namespace, &ing.name, secret_name);
                continue;
            };
            debug!("found secret {}/{}", secret.namespace, secret.name);

            let Some(cert) = secret.data.get(TLS_CERT_KEY) else {
                info!("secret {}/{} has no {TLS_CERT_KEY}", secret.namespace, secret.name);
                self.record_invalid(&ing.namespace, &ing.name, &secret.name);
                continue;
            };
            let Some(tls_key) = secret.data.get(TLS_PRIVATE_KEY_KEY) else {
                info!(
                    "secret {}/{} has no {TLS_PRIVATE_KEY_KEY}",
                    secret.namespace, secret.name
                );
                self.record_invalid(&ing.namespace, &ing.name, &secret.name);
                continue;
            };

            let cp = CertPair {
                namespace: ing.namespace.clone(),
                ingress_name: ing.name.clone(),
                secret_name: secret.name.clone(),
            };
            let data = payload(cert, tls_key);
            if existing.contains(&cp) && !self.differs(&cp, &data) {
                debug!("cert pair {} unchanged", cp.filename());
                keep.insert(cp);
                continue;
            }

            match self.write(&cp, &data).await {
                Ok(()) => {
                    debug!("wrote cert pair {}", cp.filename());
                    self.count_write(&cp);
                    self.recorder.new_write(&cp.namespace, &cp.ingress_name, &cp.secret_name);
                    keep.insert(cp);
                    changed = true;
                }
                Err(e) if e.is_invalid() => {
                    info!("invalid cert pair {}: {e}", cp.filename());
                    self.record_invalid(&ing.namespace, &ing.name, &secret.name);
                }
                Err(e) => {
                    error!("cannot write cert pair {}: {e}", cp.filename());
                    self.count_error(CONTEXT_UPSERT_INGRESS);
                }
            }
        }

        for cp in &existing {
            if keep.contains(cp) {
                continue;
            }
            debug!("deleting stale cert pair {}", cp.filename());
            let path = self.tls_dir.join(cp.filename());
            if let Err(e) = std::fs::remove_file(&path) {
                error!("cannot remove stale cert pair {}: {e}", path.display());
                self.count_error(CONTEXT_UPSERT_INGRESS);
                continue;
            }
            self.secret_refs.remove(&ing.namespace, &ing.name, &cp.secret_name);
            self.count_delete(cp);
            self.recorder.new_delete(&cp.namespace, &cp.ingress_name, &cp.secret_name);
            changed = true;
        }

        changed
    }

    async fn upsert_secret(&mut self, sec: &Secret) -> bool {
        debug!("processing secret upsert for {}/{}", sec.namespace, sec.name);

        let mut changed = false;
        for ingress_name in self.secret_refs.get(&sec.namespace, &sec.name) {
            let Some(cert) = sec.data.get(TLS_CERT_KEY) else {
                info!("secret {}/{} has no {TLS_CERT_KEY}", sec.namespace, sec.name);
                self.record_invalid(&sec.namespace, &ingress_name, &sec.name);
                continue;
            };
            let Some(tls_key) = sec.data.get(TLS_PRIVATE_KEY_KEY) else {
                info!("secret {}/{} has no {TLS_PRIVATE_KEY_KEY}", sec.namespace, sec.name);
                self.record_invalid(&sec.namespace, &ingress_name, &sec.name);
                continue;
            };

            let cp = CertPair {
                namespace: sec.namespace.clone(),
                ingress_name: ingress_name.clone(),
                secret_name: sec.name.clone(),
            };
            let data = payload(cert, tls_key);
            if !self.differs(&cp, &data) {
                debug!("cert pair {} unchanged", cp.filename());
                continue;
            }

            match self.write(&cp, &data).await {
                Ok(()) => {
                    debug!("wrote cert pair {}", cp.filename());
                    self.count_write(&cp);
                    self.recorder.new_write(&cp.namespace, &cp.ingress_name, &cp.secret_name);
                    changed = true;
                }
                Err(e) if e.is_invalid() => {
                    info!("invalid cert pair {}: {e}", cp.filename());
                    self.record_invalid(&sec.namespace, &ingress_name, &sec.name);
                }
                Err(e) => {
                    error!("cannot write cert pair {}: {e}", cp.filename());
                    self.count_error(CONTEXT_UPSERT_SECRET);
                }
            }
        }

        changed
    }

    fn delete_ingress(&mut self, ing: &Ingress) -> bool {
        debug!("processing ingress delete for {}/{}", ing.namespace, ing.name);

        let mut changed = false;

        let key = ObjectKey {
            namespace: ing.namespace.clone(),
            name: ing.name.clone(),
        };
        if let Some(prev) = self.force_https.remove(&key) {
            // Only an entry that actually contributed hosts changes the file.
            if !prev.contributed_hosts().is_empty() {
                changed = true;
                if let Err(e) = self.write_force_https_hosts() {
                    error!("failed to write updated force https host list: {e}");
                    self.count_error(CONTEXT_DELETE_INGRESS);
                }
            }
        }

        let existing = match self.existing(&ing.namespace, &ing.name) {
            Ok(pairs) => pairs,
            Err(e) => {
                error!("cannot list existing cert pairs, stale cert pairs will not be reaped: {e}");
                BTreeSet::new()
            }
        };

        for cp in &existing {
            let path = self.tls_dir.join(cp.filename());
            if let Err(e) = std::fs::remove_file(&path) {
                error!("cannot remove stale cert pair {}: {e}", path.display());
                self.count_error(CONTEXT_DELETE_INGRESS);
                continue;
            }
            debug!("deleted cert pair {}", cp.filename());
            self.secret_refs.remove(&ing.namespace, &ing.name, &cp.secret_name);
            self.count_delete(cp);
            // No recorder event: the ingress is gone, there is nothing left
            // to attach one to.
            changed = true;
        }

        changed
    }

    fn delete_secret(&mut self, sec: &Secret) -> bool {
        debug!("processing secret delete for {}/{}", sec.namespace, sec.name);

        let mut changed = false;
        for ingress_name in self.secret_refs.get(&sec.namespace, &sec.name) {
            let cp = CertPair {
                namespace: sec.namespace.clone(),
                ingress_name: ingress_name.clone(),
                secret_name: sec.name.clone(),
            };
            let path = self.tls_dir.join(cp.filename());
            if let Err(e) = std::fs::remove_file(&path) {
                error!("cannot remove stale cert pair {}: {e}", path.display());
                self.count_error(CONTEXT_DELETE_SECRET);
                continue;
            }
            debug!("deleted cert pair {}", cp.filename());
            // The ref table entry stays; the next upsert or delete of the
            // ingress reconciles it.
            self.count_delete(&cp);
            self.recorder.new_delete(&cp.namespace, &cp.ingress_name, &cp.secret_name);
            changed = true;
        }

        changed
    }

    /// Lists the cert pairs on disk belonging to one ingress. Files that do
    /// not match the naming scheme are skipped and never touched.
    fn existing(&self, namespace: &str, ingress_name: &str) -> Result<BTreeSet<CertPair>, Error> {
        let entries = std::fs::read_dir(&self.tls_dir).map_err(|source| Error::List {
            dir: self.tls_dir.clone(),
            source,
        })?;

        let mut pairs = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|source| Error::List {
                dir: self.tls_dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(cp) = CertPair::from_filename(name) else {
                debug!("unexpected file in {}: {name}", self.tls_dir.display());
                continue;
            };
            if cp.namespace != namespace || cp.ingress_name != ingress_name {
                continue;
            }
            pairs.insert(cp);
        }
        Ok(pairs)
    }

    /// Whether the proposed payload differs from the bytes on disk. An
    /// unreadable file always differs.
    fn differs(&self, cp: &CertPair, proposed: &[u8]) -> bool {
        match std::fs::read(self.tls_dir.join(cp.filename())) {
            Ok(current) => fnv1a32(&current) != fnv1a32(proposed),
            Err(_) => true,
        }
    }

    /// Writes a cert pair atomically: temp file in the target directory,
    /// fsync, chmod 0600, validator probe, then rename as the commit point.
    /// The temp file is removed on every failure path.
    async fn write(&self, cp: &CertPair, data: &[u8]) -> Result<(), Error> {
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.tls_dir)
            .map_err(|source| Error::TempFile {
                dir: self.tls_dir.clone(),
                source,
            })?;

        tmp.write_all(data).map_err(|source| Error::Write {
            path: tmp.path().to_path_buf(),
            source,
        })?;
        tmp.as_file().sync_all().map_err(|source| Error::Sync {
            path: tmp.path().to_path_buf(),
            source,
        })?;
        let mode = std::fs::Permissions::from_mode(CERT_PAIR_MODE);
        tmp.as_file().set_permissions(mode).map_err(|source| Error::Chmod {
            path: tmp.path().to_path_buf(),
            source,
        })?;

        // The validator sees the temp file as it would any other file in the
        // directory; a rejection aborts before the rename below.
        self.validator.validate().await.map_err(Error::Invalid)?;

        let path = self.tls_dir.join(cp.filename());
        tmp.persist(&path).map_err(|e| Error::Rename {
            path: path.clone(),
            source: e.error,
        })?;
        Ok(())
    }

    /// Rewrites the forced-HTTPS hosts file from the table, atomically. A
    /// no-op when no file was configured. The validator is not consulted.
    fn write_force_https_hosts(&self) -> Result<(), Error> {
        let Some(path) = &self.force_https_hosts_file else {
            debug!("no force https hosts file specified, skipping");
            return Ok(());
        };

        let dir = path.parent().unwrap_or(Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(FORCE_HTTPS_TEMP_PREFIX)
            .tempfile_in(dir)
            .map_err(|source| Error::TempFile {
                dir: dir.to_path_buf(),
                source,
            })?;

        tmp.write_all(&self.force_https.bytes())
            .map_err(|source| Error::Write {
                path: tmp.path().to_path_buf(),
                source,
            })?;
        tmp.as_file().sync_all().map_err(|source| Error::Sync {
            path: tmp.path().to_path_buf(),
            source,
        })?;

        tmp.persist(path).map_err(|e| Error::Rename {
            path: path.to_path_buf(),
            source: e.error,
        })?;
        Ok(())
    }

    fn notify_subscribers(&self) {
        for s in &self.subscribers {
            s.changed();
        }
    }

    fn record_invalid(&self, namespace: &str, ingress_name: &str, secret_name: &str) {
        self.recorder.new_invalid_secret(namespace, ingress_name, secret_name);
        self.metric
            .invalids
            .with(&pair_labels(namespace, ingress_name, secret_name))
            .inc();
    }

    fn count_write(&self, cp: &CertPair) {
        self.metric
            .writes
            .with(&pair_labels(&cp.namespace, &cp.ingress_name, &cp.secret_name))
            .inc();
    }

    fn count_delete(&self, cp: &CertPair) {
        self.metric
            .deletes
            .with(&pair_labels(&cp.namespace, &cp.ingress_name, &cp.secret_name))
            .inc();
    }

    fn count_error(&self, context: &'static str) {
        self.metric
            .errors
            .with(&metrics::Labels::from([(LABEL_CONTEXT, context)]))
            .inc();
    }
}

fn pair_labels<'a>(
    namespace: &'a str,
    ingress_name: &'a str,
    secret_name: &'a str,
) -> metrics::Labels<'a> {
    metrics::Labels::from([
        (LABEL_NAMESPACE, namespace),
        (LABEL_INGRESS_NAME, ingress_name),
        (LABEL_SECRET_NAME, secret_name),
    ])
}
