use clap::Parser;
use eyre::{Result, WrapErr};
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::{core::v1 as core, networking::v1 as networking};
use kube::{
    Client,
    api::Api,
    runtime::{
        events::{Recorder as EventsRecorder, Reporter},
        reflector,
        reflector::{ObjectRef, Store},
        watcher,
    },
};
use log::{debug, error, info, trace};
use std::{net::SocketAddr, path::PathBuf, pin::Pin, sync::Arc, time::Duration};
use tokio::sync::watch;

use kcertsync::cert::Validator as _;
use kcertsync::*;

const PROMETHEUS_NAMESPACE: &str = "kcertsync";

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Kubernetes namespace to watch. All namespaces are watched if not set.
    #[arg(short = 'n', long)]
    namespace: Option<String>,

    /// Directory in which TLS cert pairs are managed.
    #[arg(long, default_value = "/tls")]
    tls_dir: PathBuf,

    /// File in which the forced HTTPS host list is managed.
    #[arg(long)]
    force_https_hosts_file: Option<PathBuf>,

    /// Webhook URL used to validate the proxy configuration.
    #[arg(long, default_value = "http://localhost:15000/validate")]
    validate_url: String,

    /// Webhook URL used to reload the proxy configuration.
    #[arg(long, default_value = "http://localhost:15000/reload")]
    reload_url: String,

    /// Address at which to expose /metrics and /healthz.
    #[arg(long, default_value = "[::]:10002")]
    listen: SocketAddr,

    /// Size of the event buffer between the watch layer and the manager.
    #[arg(long, default_value_t = queue::DEFAULT_BUFFER)]
    event_buffer: usize,

    /// Run with debug logging.
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("RUST_LOG", default_filter))
        .format_timestamp_millis()
        .init();

    if let Some(ns) = &cli.namespace {
        info!("starting for namespace {ns}");
    } else {
        info!("starting for all namespaces");
    };

    let metric = register_metrics().wrap_err("cannot register metrics")?;

    let client: Client = kube::Config::infer().await?.try_into()?;

    let (secret_reader, secret_writer) = reflector::store::<core::Secret>();
    let (ingress_reader, ingress_writer) = reflector::store::<networking::Ingress>();

    let wcfg = watcher::Config::default();
    let sec_wcfg = wcfg.clone().fields("type=kubernetes.io/tls");
    let (ing_api, sec_api) = match &cli.namespace {
        None => (
            Api::<networking::Ingress>::all(client.clone()),
            Api::<core::Secret>::all(client.clone()),
        ),
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
        ),
    };

    let validator = Arc::new(webhook::validator::Validator::new(webhook::Webhook::new(
        &cli.validate_url,
    )));
    let reload = Arc::new(webhook::subscriber::Subscriber::new(webhook::Webhook::new(
        &cli.reload_url,
    )));

    // The sidecar refuses to start when a configured hosts file is missing,
    // so a reachable file is a precondition here as well. Create it before
    // both containers start (an init container works well).
    if let Some(path) = &cli.force_https_hosts_file {
        std::fs::metadata(path)
            .wrap_err_with(|| format!("cannot open force-https-hosts file {}", path.display()))?;
    }

    // The sidecar may not be listening yet right after pod start; writes
    // rejected now would only be retried when the watches resync. Hold the
    // event loop until it accepts the current configuration.
    while let Err(e) = validator.validate().await {
        info!("waiting for the proxy to accept the current configuration: {e}");
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let reporter = Reporter {
        controller: PROMETHEUS_NAMESPACE.into(),
        instance: std::env::var("HOSTNAME").ok(),
    };
    let recorder = event::KubernetesRecorder::new(
        EventsRecorder::new(client.clone(), reporter),
        ingress_reader,
    );

    let mut builder = cert::Manager::builder(&cli.tls_dir, Arc::new(KubeSecretStore(secret_reader)))
        .validator(validator)
        .subscriber(reload)
        .recorder(Arc::new(recorder))
        .metrics(metric);
    if let Some(path) = &cli.force_https_hosts_file {
        builder = builder.force_https_hosts_file(path);
    }
    let manager = builder.build();

    let (events, runner) = queue::new(manager, cli.event_buffer);

    let source = KubeSource {
        ing: reflector(ingress_writer, watcher(ing_api, wcfg)).boxed(),
        secrets: reflector(secret_writer, watcher(sec_api, sec_wcfg)).boxed(),
        events,
    };

    let (_stop_tx, stop_rx) = watch::channel(false);

    let mut join = tokio::task::JoinSet::new();

    join.spawn(async move {
        if let Err(e) = source.run().await {
            panic!("k8s watch failed: {e}");
        }
    });
    join.spawn(runner.run(stop_rx));

    info!("serving /metrics and /healthz on {}", cli.listen);
    join.spawn(admin_server(cli.listen));

    if let Err(e) = join.join_next().await.unwrap() {
        error!("a process failed: {e}");
    } else {
        error!("a process stopped with no error");
    }
    std::process::exit(1);
}

fn register_metrics() -> Result<cert::Metrics> {
    use prometheus::{CounterVec, Opts};

    let pair_labels = [
        cert::LABEL_NAMESPACE,
        cert::LABEL_INGRESS_NAME,
        cert::LABEL_SECRET_NAME,
    ];
    let writes = CounterVec::new(
        Opts::new("certpair_writes_total", "Total certificate pairs written to disk.")
            .namespace(PROMETHEUS_NAMESPACE),
        &pair_labels,
    )?;
    let deletes = CounterVec::new(
        Opts::new("certpair_deletes_total", "Total certificate pairs deleted from disk.")
            .namespace(PROMETHEUS_NAMESPACE),
        &pair_labels,
    )?;
    let invalids = CounterVec::new(
        Opts::new(
            "invalids_total",
            "Total invalid secrets encountered while managing certificate pairs.",
        )
        .namespace(PROMETHEUS_NAMESPACE),
        &pair_labels,
    )?;
    let errors = CounterVec::new(
        Opts::new(
            "errors_total",
            "Total errors encountered while managing certificate pairs.",
        )
        .namespace(PROMETHEUS_NAMESPACE),
        &[cert::LABEL_CONTEXT],
    )?;

    let registry = prometheus::default_registry();
    registry.register(Box::new(writes.clone()))?;
    registry.register(Box::new(deletes.clone()))?;
    registry.register(Box::new(invalids.clone()))?;
    registry.register(Box::new(errors.clone()))?;

    Ok(cert::Metrics {
        writes: Box::new(metrics::PrometheusCounterVec(writes)),
        deletes: Box::new(metrics::PrometheusCounterVec(deletes)),
        errors: Box::new(metrics::PrometheusCounterVec(errors)),
        invalids: Box::new(metrics::PrometheusCounterVec(invalids)),
    })
}

async fn admin_server(bind: SocketAddr) {
    use warp::Filter;
    use warp::reply::Reply;

    let metrics = warp::path("metrics").map(|| {
        let encoder = prometheus::TextEncoder::new();
        match encoder.encode_to_string(&prometheus::gather()) {
            Ok(body) => {
                warp::reply::with_header(body, "Content-Type", prometheus::TEXT_FORMAT)
                    .into_response()
            }
            Err(e) => {
                error!("cannot encode metrics: {e}");
                warp::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    });
    let healthz = warp::path("healthz").map(warp::reply);

    warp::serve(warp::get().and(metrics.or(healthz)))
        .try_bind(bind)
        .await;
}

/// The watch cache, exposed to the manager as plain secret lookups.
struct KubeSecretStore(Store<core::Secret>);

impl SecretStore for KubeSecretStore {
    fn get(&self, namespace: &str, name: &str) -> Option<Secret> {
        let secret = self.0.get(&ObjectRef::new(name).within(namespace))?;
        Secret::try_from(secret.as_ref()).ok()
    }
}

type WatchStream<T> =
    Pin<Box<dyn futures::Stream<Item = watcher::Result<watcher::Event<T>>> + Send>>;

/// Forwards ingress and secret watch events into the serialized queue,
/// keeping the reflector stores warm along the way.
struct KubeSource {
    ing: WatchStream<networking::Ingress>,
    secrets: WatchStream<core::Secret>,
    events: queue::Queue,
}

impl KubeSource {
    async fn run(mut self) -> Result<()> {
        loop {
            tokio::select!(
                e = self.ing.try_next() => {
                    let e = e?.unwrap();
                    trace!("got ingress event: {e:?}");
                    Self::forward_ingress(&self.events, e).await;
                },
                e = self.secrets.try_next() => {
                    let e = e?.unwrap();
                    trace!("got secret event: {e:?}");
                    Self::forward_secret(&self.events, e).await;
                },
            );
        }
    }

    async fn forward_ingress(events: &queue::Queue, event: watcher::Event<networking::Ingress>) {
        use watcher::Event::*;
        match event {
            Init | InitDone => {}
            InitApply(obj) | Apply(obj) => match Ingress::try_from(&obj) {
                Ok(ing) => events.on_add(Resource::Ingress(ing)).await,
                Err(e) => debug!("ignoring ingress event: {e}"),
            },
            Delete(obj) => match Ingress::try_from(&obj) {
                Ok(ing) => events.on_delete(Resource::Ingress(ing)).await,
                Err(e) => debug!("ignoring ingress event: {e}"),
            },
        }
    }

    async fn forward_secret(events: &queue::Queue, event: watcher::Event<core::Secret>) {
        use watcher::Event::*;
        match event {
            Init | InitDone => {}
            InitApply(obj) | Apply(obj) => match Secret::try_from(&obj) {
                Ok(sec) => events.on_add(Resource::Secret(sec)).await,
                Err(e) => debug!("ignoring secret event: {e}"),
            },
            Delete(obj) => match Secret::try_from(&obj) {
                Ok(sec) => events.on_delete(Resource::Secret(sec)).await,
                Err(e) => debug!("ignoring secret event: {e}"),
            },
        }
    }
}
