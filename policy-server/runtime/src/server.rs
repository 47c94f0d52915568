use crate::http::Body;
use hyper::{body::Incoming, Request, Response};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder,
    service::TowerToHyperService,
};
use std::{convert::Infallible, future::Future};
use tokio::net::TcpListener;
use tracing::{debug, info, instrument, warn, Instrument};

/// Serves HTTP/1 and HTTP/2 connections on `listener` until `shutdown`
/// completes.
///
/// Connections that are already established are left to finish on their own.
#[instrument(skip_all, fields(%name))]
pub(crate) async fn serve<S, F>(
    name: &'static str,
    listener: TcpListener,
    service: S,
    shutdown: F,
) where
    F: Future + Send,
    S: tower::Service<Request<Incoming>, Response = Response<Body>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "HTTP server listening"),
        Err(error) => warn!(%error, "HTTP server listening on unknown address"),
    }

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (io, client) = match res {
                    Ok(conn) => conn,
                    Err(error) => {
                        warn!(%error, "Failed to accept connection");
                        continue;
                    }
                };
                debug!(%client, "Accepted connection");

                let svc = TowerToHyperService::new(service.clone());
                tokio::spawn(
                    async move {
                        let builder = Builder::new(TokioExecutor::new());
                        if let Err(error) = builder.serve_connection(TokioIo::new(io), svc).await {
                            debug!(%error, "Connection closed");
                        }
                    }
                    .instrument(tracing::debug_span!("conn", %client)),
                );
            }

            _ = &mut shutdown => {
                debug!("Received shutdown signal");
                return;
            }
        }
    }
}
