//! db-provisioner - ConfigMap-driven database provisioning

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use db_provisioner::api::{self, AppState, OidcIntrospector};
use db_provisioner::artifact::{FileArtifactSink, DEFAULT_ARTIFACT_PATH};
use db_provisioner::clock::TokioClock;
use db_provisioner::cluster::{create_client, ClusterClient, KubeClusterClient};
use db_provisioner::config::{
    AdminConfig, IntrospectionConfig, ProvisionerConfig, TemplateLocation, TEMPLATE_KEY,
    TEMPLATE_NAME, TEMPLATE_NAMESPACE, TRIGGER_ANNOTATION,
};
use db_provisioner::controller::{LoopExit, Reconciler};
use db_provisioner::retry::{RetryConfig, DEFAULT_MAX_ATTEMPTS};
use db_provisioner::telemetry::{init_telemetry, LogFormat};
use db_provisioner::template::{
    RenderContext, DEFAULT_CLUSTER_NAME, DEFAULT_NAMESPACE, DEFAULT_SERVICE_ACCOUNT,
};

/// db-provisioner - provisions database workloads from annotated ConfigMaps
#[derive(Parser, Debug)]
#[command(name = "db-provisioner", version, about, long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,

    /// Path to a kubeconfig file (in-cluster config or ~/.kube/config when unset)
    #[arg(long, env = "KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the reconciler (default mode)
    ///
    /// Watches ConfigMaps in all namespaces, provisions resources for
    /// annotated ones and tears them down when the ConfigMap is deleted.
    Controller(ControllerArgs),

    /// Serve the administrative HTTP API
    Serve(ServeArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Annotation that marks a ConfigMap for provisioning
    #[arg(long, env = "TRIGGER_ANNOTATION", default_value = TRIGGER_ANNOTATION)]
    annotation: String,

    /// Namespace of the template ConfigMap
    #[arg(long, env = "TEMPLATE_NAMESPACE", default_value = TEMPLATE_NAMESPACE)]
    template_namespace: String,

    /// Name of the template ConfigMap
    #[arg(long, env = "TEMPLATE_NAME", default_value = TEMPLATE_NAME)]
    template_name: String,

    /// Data key holding the template text
    #[arg(long, env = "TEMPLATE_KEY", default_value = TEMPLATE_KEY)]
    template_key: String,

    /// CLUSTERNAME template value
    #[arg(long, env = "CLUSTER_NAME", default_value = DEFAULT_CLUSTER_NAME)]
    cluster_name: String,

    /// NAMESPACE template value
    #[arg(long, env = "TARGET_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    target_namespace: String,

    /// SANAME template value
    #[arg(long, env = "SERVICE_ACCOUNT_NAME", default_value = DEFAULT_SERVICE_ACCOUNT)]
    service_account_name: String,

    /// Where the rendered manifest is written for debugging
    #[arg(long, env = "ARTIFACT_PATH", default_value = DEFAULT_ARTIFACT_PATH)]
    artifact_path: PathBuf,

    /// Seconds between drain-wait polls
    #[arg(long, default_value = "2")]
    drain_poll_interval_secs: u64,

    /// Stop waiting for pods after this many polls (waits indefinitely when unset)
    #[arg(long, env = "DRAIN_MAX_POLLS")]
    drain_max_polls: Option<u32>,

    /// Attempts per teardown delete
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    delete_attempts: u32,

    /// Milliseconds to wait between teardown delete attempts
    #[arg(long, env = "DELETE_RETRY_DELAY_MS", default_value = "0")]
    delete_retry_delay_ms: u64,

    /// Seconds to wait before re-opening a closed watch
    #[arg(long, default_value = "1")]
    restart_delay_secs: u64,
}

impl ControllerArgs {
    fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig {
            annotation_key: self.annotation.clone(),
            template: TemplateLocation {
                namespace: self.template_namespace.clone(),
                name: self.template_name.clone(),
                key: self.template_key.clone(),
            },
            render: RenderContext::new(
                &self.cluster_name,
                &self.target_namespace,
                &self.service_account_name,
            ),
            drain_poll_interval: Duration::from_secs(self.drain_poll_interval_secs),
            drain_max_polls: self.drain_max_polls,
            delete_retry: RetryConfig::with_max_attempts(self.delete_attempts)
                .with_delay(Duration::from_millis(self.delete_retry_delay_ms)),
        }
    }
}

/// Serve mode arguments
#[derive(Parser, Debug)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "ADMIN_ADDR", default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    /// Base URL of the OpenID Connect provider
    #[arg(long, env = "OIDC_BASE_URL")]
    oidc_base_url: String,

    /// Realm the client is registered in
    #[arg(long, env = "OIDC_REALM")]
    oidc_realm: String,

    /// OAuth2 client id used for token introspection
    #[arg(long, env = "OIDC_CLIENT_ID")]
    oidc_client_id: String,

    /// OAuth2 client secret used for token introspection
    #[arg(long, env = "OIDC_CLIENT_SECRET", hide_env_values = true)]
    oidc_client_secret: String,

    /// Introspection request timeout in seconds
    #[arg(long, default_value = "10")]
    oidc_timeout_secs: u64,
}

impl ServeArgs {
    fn admin_config(&self) -> AdminConfig {
        AdminConfig {
            addr: self.addr,
            introspection: IntrospectionConfig {
                base_url: self.oidc_base_url.clone(),
                realm: self.oidc_realm.clone(),
                client_id: self.oidc_client_id.clone(),
                client_secret: self.oidc_client_secret.clone(),
                timeout: Duration::from_secs(self.oidc_timeout_secs),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(cli.log_format)?;

    let stop = CancellationToken::new();
    let signal_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down");
        }
        signal_stop.cancel();
    });

    let client = create_client(cli.kubeconfig.as_deref()).await?;
    let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(client));

    match cli.command {
        Some(Commands::Serve(args)) => run_serve(args, cluster, stop).await,
        Some(Commands::Controller(args)) => run_controller(args, cluster, stop).await,
        None => run_controller(ControllerArgs::parse_from(["controller"]), cluster, stop).await,
    }
}

/// Run the reconciler, re-opening the watch whenever the stream closes
///
/// The API server ends every watch after its timeout, so closures are routine;
/// each new watch resumes after the last resource version seen.
async fn run_controller(
    args: ControllerArgs,
    cluster: Arc<dyn ClusterClient>,
    stop: CancellationToken,
) -> anyhow::Result<()> {
    let artifacts = Arc::new(FileArtifactSink::new(&args.artifact_path));
    let reconciler = Reconciler::new(
        cluster,
        artifacts,
        Arc::new(TokioClock),
        args.provisioner_config(),
    );

    tracing::info!(
        annotation = %reconciler.config().annotation_key,
        template = %reconciler.config().template,
        artifact = %args.artifact_path.display(),
        "Starting controller"
    );

    let restart_delay = Duration::from_secs(args.restart_delay_secs);
    let mut resume_from: Option<String> = None;
    loop {
        match reconciler.run(stop.clone(), resume_from.as_deref()).await? {
            LoopExit::Stopped => break,
            LoopExit::StreamClosed { resume_from: next } => {
                tracing::info!(
                    delay = ?restart_delay,
                    resource_version = ?next,
                    "Watch closed, restarting"
                );
                resume_from = next;
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(restart_delay) => {}
                }
            }
        }
    }

    tracing::info!("Controller stopped");
    Ok(())
}

/// Run the admin API until Ctrl-C
async fn run_serve(
    args: ServeArgs,
    cluster: Arc<dyn ClusterClient>,
    stop: CancellationToken,
) -> anyhow::Result<()> {
    let config = args.admin_config();
    let introspector = OidcIntrospector::new(config.introspection.clone())?;
    let state = AppState {
        cluster,
        auth: Arc::new(introspector),
    };

    api::serve(&config, state, stop).await?;
    Ok(())
}
