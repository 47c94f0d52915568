use crate::{
    admin::Admin,
    cc::CcClient,
    core::{ExchangeToken, LookupSpaces, PolicyGuard},
    external::ExternalApi,
    http_client::HttpClient,
    internal::InternalApi,
    metrics::Metrics,
    server,
    store::{MemoryStore, Store},
    uaa::UaaClient,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{net::TcpListener, sync::watch, time};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "policy-server", about = "Serves container networking policies")]
pub struct Args {
    #[clap(
        long,
        default_value = "netman=info,warn",
        env = "NETMAN_POLICY_SERVER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    /// Address of the external API, used by operators and developers.
    #[clap(long, default_value = "0.0.0.0:4002")]
    listen_addr: SocketAddr,

    /// Address of the internal API, used by policy enforcement agents.
    #[clap(long, default_value = "0.0.0.0:4003")]
    internal_listen_addr: SocketAddr,

    #[clap(long, default_value = "0.0.0.0:9990")]
    admin_addr: SocketAddr,

    #[clap(long)]
    uaa_url: String,

    #[clap(long, default_value = "network-policy")]
    uaa_client: String,

    #[clap(long, env = "UAA_CLIENT_SECRET", hide_env_values = true)]
    uaa_client_secret: String,

    /// Base URL of the Cloud Controller API.
    #[clap(long)]
    cc_url: String,

    /// Width of allocated tags, in bytes.
    #[clap(long, default_value = "2", value_parser = clap::value_parser!(u8).range(1..=4))]
    tag_length: u8,

    /// PEM bundle of additional CA certificates trusted when connecting to
    /// UAA or the Cloud Controller over HTTPS.
    #[clap(long)]
    upstream_ca_file: Option<PathBuf>,

    /// Timeout for each request to UAA or the Cloud Controller.
    #[clap(long, default_value = "5s", value_parser = parse_timeout)]
    request_timeout: time::Duration,

    #[clap(long, default_value = "1048576")]
    max_body_bytes: usize,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            listen_addr,
            internal_listen_addr,
            admin_addr,
            uaa_url,
            uaa_client,
            uaa_client_secret,
            cc_url,
            tag_length,
            upstream_ca_file,
            request_timeout,
            max_body_bytes,
        } = self;

        log_format.try_init(log_level)?;

        let mut prom = <Registry>::default();
        let metrics = Metrics::register(&mut prom);

        let ca_pem = match upstream_ca_file {
            Some(path) => Some(
                tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?,
            ),
            None => None,
        };
        let http = HttpClient::new(request_timeout, ca_pem.as_deref())
            .context("failed to build upstream HTTP client")?;
        let uaa = Arc::new(UaaClient::new(
            http.clone(),
            uaa_url,
            uaa_client,
            uaa_client_secret,
        ));
        let cc = Arc::new(CcClient::new(http, cc_url));
        let guard = PolicyGuard::new(
            uaa.clone() as Arc<dyn ExchangeToken>,
            cc as Arc<dyn LookupSpaces>,
        );
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(tag_length.into()));

        let external = ExternalApi::new(
            uaa,
            guard,
            store.clone(),
            metrics.clone(),
            max_body_bytes,
        );
        let internal = InternalApi::new(store, metrics, max_body_bytes);

        let (ready_tx, ready_rx) = watch::channel(false);
        let admin = Admin::new(ready_rx, Arc::new(prom));

        let admin_listener = bind(admin_addr).await?;
        let external_listener = bind(listen_addr).await?;
        let internal_listener = bind(internal_listen_addr).await?;

        let (shutdown, drain) = kubert::shutdown::sigint_or_sigterm()?;

        tokio::spawn(
            server::serve("admin", admin_listener, admin, drain.clone().signaled())
                .instrument(info_span!("admin")),
        );
        tokio::spawn(
            server::serve(
                "external",
                external_listener,
                external,
                drain.clone().signaled(),
            )
            .instrument(info_span!("external")),
        );
        tokio::spawn(
            server::serve("internal", internal_listener, internal, drain.signaled())
                .instrument(info_span!("internal")),
        );

        ready_tx.send_replace(true);
        info!("Ready");

        // Block the main thread on the shutdown signal. Once it fires, wait for
        // the servers to stop accepting connections.
        if shutdown.signaled().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))
}

/// Parses a duration like `500ms` or `5s`.
fn parse_timeout(s: &str) -> Result<time::Duration> {
    let s = s.trim();
    let (magnitude, unit) = match s.rfind(|c: char| c.is_ascii_digit()) {
        Some(offset) => {
            let (magnitude, unit) = s.split_at(offset + 1);
            (magnitude.parse::<u64>()?, unit)
        }
        None => bail!("{s} does not contain a timeout duration value"),
    };

    let mul = match unit {
        "" if magnitude == 0 => 0,
        "ms" => 1,
        "s" => 1000,
        "m" => 1000 * 60,
        "h" => 1000 * 60 * 60,
        "d" => 1000 * 60 * 60 * 24,
        _ => bail!("invalid duration unit {unit} (expected one of 'ms', 's', 'm', 'h' or 'd')"),
    };

    let ms = magnitude
        .checked_mul(mul)
        .ok_or_else(|| anyhow!("timeout value {s} overflows when converted to 'ms'"))?;
    Ok(time::Duration::from_millis(ms))
}
