//! Reverse proxy to the local worker, including HTTP upgrades (WebSocket).

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::Response,
};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::{TokioExecutor, TokioIo};

use crate::errors::ControlPlaneError;

#[derive(Clone)]
pub struct WorkerProxy {
    client: Client<HttpConnector, Body>,
    port: u16,
}

impl WorkerProxy {
    pub fn new(port: u16) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            port,
        }
    }

    /// Send `req` to `127.0.0.1:<port>` with the same path and query.
    pub async fn forward(&self, mut req: Request) -> Result<Response, ControlPlaneError> {
        let target = format!(
            "http://127.0.0.1:{}{}",
            self.port,
            req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
        );
        *req.uri_mut() = target
            .parse::<Uri>()
            .map_err(|e| ControlPlaneError::Proxy(format!("Invalid upstream URI {}: {}", target, e)))?;
        if let Ok(host) = HeaderValue::from_str(&format!("127.0.0.1:{}", self.port)) {
            req.headers_mut().insert(header::HOST, host);
        }

        if !is_upgrade(req.headers()) {
            let resp = self
                .client
                .request(req)
                .await
                .map_err(|e| ControlPlaneError::Proxy(format!("{:#}", anyhow::Error::from(e))))?;
            return Ok(resp.map(Body::new));
        }

        let client_upgrade = hyper::upgrade::on(&mut req);
        let mut resp = self
            .client
            .request(req)
            .await
            .map_err(|e| ControlPlaneError::Proxy(format!("{:#}", anyhow::Error::from(e))))?;
        if resp.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Ok(resp.map(Body::new));
        }

        let upstream_upgrade = hyper::upgrade::on(&mut resp);
        tokio::spawn(async move {
            match tokio::try_join!(client_upgrade, upstream_upgrade) {
                Ok((client, upstream)) => {
                    let mut client = TokioIo::new(client);
                    let mut upstream = TokioIo::new(upstream);
                    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                        Ok((up, down)) => tracing::debug!(up, down, "upgraded connection closed"),
                        Err(e) => tracing::debug!(error = %e, "upgraded connection ended with error"),
                    }
                }
                Err(e) => tracing::warn!(error = %e, "connection upgrade failed"),
            }
        });

        let (parts, _) = resp.into_parts();
        Ok(Response::from_parts(parts, Body::empty()))
    }
}

fn is_upgrade(headers: &HeaderMap) -> bool {
    headers.contains_key(header::UPGRADE)
        && headers
            .get(header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"))
}
