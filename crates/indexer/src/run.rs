//! The job frame: shared startup, resource wiring, deadline handling
//! and exit codes.

use {
    crate::arguments::Shared,
    anyhow::{Context, Result},
    chain::{Chain, ScanProfile, Tier},
    ethrpc::{RpcClient, RpcConfig},
    explorer::{ExplorerClient, ExplorerConfig},
    sqlx::postgres::PgPoolOptions,
    std::{
        future::Future,
        path::PathBuf,
        process::ExitCode,
        sync::Arc,
        time::{Duration, Instant},
    },
    tracing::Instrument,
};

/// Everything a job body needs, owned for the duration of one
/// invocation. Sessions do not outlive the job.
pub struct JobEnv {
    pub chain: Chain,
    pub db: sqlx::PgPool,
    pub rpc: Arc<RpcClient>,
    pub explorer: Arc<ExplorerClient>,
    pub tier: Tier,
    pub profile: ScanProfile,
    pub token_list_dir: PathBuf,
    pub balance_helper: Option<alloy_primitives::Address>,
}

/// Installs tracing, the panic hook and the metrics registry. Must run
/// before anything logs.
pub fn startup(job: &str, shared: &Shared) {
    observe::tracing::initialize(&shared.log_filter);
    observe::panic_hook::install();
    observe::metrics::setup_registry(Some(format!("indexer_{}", job.replace('-', "_"))));
    tracing::info!(%job, network = %shared.network, "starting");
}

/// Connects and probes everything the job needs.
async fn init(shared: &Shared, ensure_schema: bool) -> Result<JobEnv> {
    let db = PgPoolOptions::new()
        .max_connections(20)
        .connect(shared.db_url.as_str())
        .await
        .context("connect postgres")?;

    if ensure_schema {
        let mut tx = db.begin().await.context("begin schema transaction")?;
        database::schema::ensure(&mut tx).await.context("ensure schema")?;
        tx.commit().await.context("commit schema transaction")?;
    }

    let proxied = shared.use_proxy_rpc && shared.proxy_rpc_url.is_some();
    let rpc_config = RpcConfig {
        urls: if proxied {
            vec![shared.proxy_rpc_url.clone().expect("checked above")]
        } else {
            shared.rpc_urls.clone()
        },
        // The proxy does its own pacing, so the budget is disabled and
        // batches run back to back.
        min_request_interval: (!proxied).then(|| Duration::from_millis(200)),
        tier: shared.rpc_tier.fixed(),
        ..Default::default()
    };
    let rpc = Arc::new(RpcClient::new(rpc_config).context("configure rpc client")?);
    let tier = rpc.tier().await;
    let profile = ScanProfile::select(shared.network, tier);
    tracing::info!(%tier, ?profile, "optimization profile selected");

    let explorer_config = ExplorerConfig::new(
        shared.network.explorer(),
        shared.explorer_api_keys.clone(),
    );
    let explorer = Arc::new(ExplorerClient::new(explorer_config).context("configure explorer")?);

    Ok(JobEnv {
        chain: shared.network,
        db,
        rpc,
        explorer,
        tier,
        profile,
        token_list_dir: shared.token_list_dir.clone(),
        balance_helper: shared.balance_helper,
    })
}

/// Runs a job body under the frame: init, wall-clock deadline, SIGINT,
/// teardown. Exit code 0 means the job ran to completion (partial
/// results are normal); 1 means it could not make progress.
pub async fn execute<F, Fut>(
    job: &str,
    shared: Shared,
    ensure_schema: bool,
    body: F,
) -> ExitCode
where
    F: FnOnce(JobEnv) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let started = Instant::now();
    let deadline = Duration::from_secs(shared.timeout_seconds);

    // Every line a job emits carries its name and chain.
    let span = tracing::info_span!("job", name = job, chain = %shared.network);

    let env = match init(&shared, ensure_schema).instrument(span.clone()).await {
        Ok(env) => env,
        Err(err) => {
            tracing::error!(?err, "startup failed");
            return ExitCode::FAILURE;
        }
    };
    let db = env.db.clone();

    let exit = tokio::select! {
        result = tokio::time::timeout(deadline, body(env).instrument(span)) => match result {
            Ok(Ok(())) => {
                tracing::info!(%job, elapsed = ?started.elapsed(), "finished");
                ExitCode::SUCCESS
            }
            Ok(Err(err)) => {
                tracing::error!(%job, ?err, "job failed");
                ExitCode::FAILURE
            }
            Err(_) => {
                tracing::error!(%job, ?deadline, "deadline exceeded, forcing exit");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(%job, "interrupted, shutting down");
            ExitCode::SUCCESS
        }
    };

    // Explicit teardown so no lingering connection keeps the runtime
    // alive past the frame.
    db.close().await;
    exit
}
