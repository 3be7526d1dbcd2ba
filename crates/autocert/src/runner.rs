use ac_acme::{account, lifecycle, AcmeClient, CertStore};
use ac_common::Config;
use anyhow::Context;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio_stream::StreamExt;
use tracing::{info, warn};

/// Resolve the ACME account, then run the lifecycle loop: an immediate
/// pass, then one per check interval, until SIGINT/SIGTERM.
///
/// Startup failures (account bootstrap) abort; failures inside a pass are
/// logged and the loop waits for the next tick. An in-flight pass is never
/// cancelled mid-way, the signal is observed at the wait point.
pub async fn run<C: AcmeClient>(config: &Config, client: &C) -> anyhow::Result<()> {
    let store = CertStore::new(&config.cache_dir);

    account::get_or_create(&store, &config.email, client)
        .await
        .context("failed to get ACME account")?;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    loop {
        info!("issuing or renewing certificates as needed");
        match lifecycle::run_pass(
            client,
            &store,
            &config.data_dir,
            &config.domains,
            config.renew_before(),
        )
        .await
        {
            Ok(Some(bundle)) => info!(domain = %bundle.domain, "certificate exported"),
            Ok(None) => {}
            Err(e) => warn!("lifecycle pass failed: {}", e),
        }

        info!("done, next check in {}s", config.check_interval_secs);
        tokio::select! {
            signal = signals.next() => {
                info!(signal = ?signal, "received termination signal, shutting down");
                return Ok(());
            }
            _ = tokio::time::sleep(config.check_interval()) => {}
        }
    }
}
