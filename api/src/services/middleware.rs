//! Tower layer that wraps every request in a database transaction.
//!
//! For each request [`TrxService`]:
//!
//! 1. begins a transaction; on failure the inner service is never called and
//!    the request gets a 500
//! 2. spawns the finalize task, waiting on a one-shot completion signal
//! 3. binds the transaction under [`TRX_KEY`] in a new context scope (and in
//!    request extensions) and calls the inner service inside that scope
//! 4. wraps the response body so the signal fires when the body ends, fails,
//!    or is dropped
//!
//! The finalize task then commits (status < 400, clean finish) or rolls back.
//! It runs after the response has been handed back, so the client can see
//! the response before the commit lands.
//!
//! Without [`TrxConfig::abandon_after`], a response that never finishes keeps
//! its transaction open.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::extract::OriginalUri;
use axum::http::{Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tower::{Layer, Service, ServiceExt};

use super::accessor::Slot;
use super::db::{TransactionHandle, TransactionSource};
use super::error::{ConfigError, FinishError, TrxError};
use super::finish::{self, FinishBody};
use super::outcome::{Completion, Outcome};
use crate::constants::TRX_KEY;
use crate::context::Scope;

type Logger = Arc<dyn Fn(&str) + Send + Sync>;

/// Options for [`TrxLayer`].
#[derive(Clone, Default)]
pub struct TrxConfig {
    logger: Option<Logger>,
    abandon_after: Option<Duration>,
}

impl TrxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive the `TX: ...` lifecycle lines for every request.
    pub fn logger(mut self, logger: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    /// Force a rollback if the response has not finished within `timeout`.
    pub fn abandon_after(mut self, timeout: Duration) -> Self {
        self.abandon_after = Some(timeout);
        self
    }

    fn log(&self, message: impl FnOnce() -> String) {
        if let Some(logger) = &self.logger {
            logger(&message());
        }
    }
}

impl fmt::Debug for TrxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrxConfig")
            .field("logger", &self.logger.is_some())
            .field("abandon_after", &self.abandon_after)
            .finish()
    }
}

/// `METHOD path?query` of a request, for log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignature(String);

impl RequestSignature {
    pub fn of<B>(req: &Request<B>) -> Self {
        // Nested routers strip their prefix from the request URI.
        let uri = req
            .extensions()
            .get::<OriginalUri>()
            .map(|original| &original.0)
            .unwrap_or_else(|| req.uri());
        let target = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        Self(format!("{} {}", req.method(), target))
    }
}

impl fmt::Display for RequestSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Layer binding a request-scoped transaction from `S`.
#[derive(Clone)]
pub struct TrxLayer<S> {
    source: S,
    config: Arc<TrxConfig>,
}

impl<S> TrxLayer<S>
where
    S: TransactionSource,
{
    pub fn new(source: S) -> Result<Self, ConfigError> {
        Self::with_config(source, TrxConfig::default())
    }

    /// Fails if `source` reports it cannot begin transactions.
    pub fn with_config(source: S, config: TrxConfig) -> Result<Self, ConfigError> {
        source.check().map_err(|reason| ConfigError::Unusable {
            type_name: std::any::type_name::<S>(),
            reason,
        })?;
        Ok(Self {
            source,
            config: Arc::new(config),
        })
    }
}

impl<S, I> Layer<I> for TrxLayer<S>
where
    S: Clone,
{
    type Service = TrxService<S, I>;

    fn layer(&self, inner: I) -> Self::Service {
        TrxService {
            source: self.source.clone(),
            config: Arc::clone(&self.config),
            inner,
        }
    }
}

#[derive(Clone)]
pub struct TrxService<S, I> {
    source: S,
    config: Arc<TrxConfig>,
    inner: I,
}

impl<S, I, ReqBody, ResBody> Service<Request<ReqBody>> for TrxService<S, I>
where
    S: TransactionSource,
    I: Service<Request<ReqBody>, Response = Response<ResBody>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    I::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: http_body::Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<axum::BoxError>,
{
    type Response = axum::response::Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        // The ready service goes with this call; the clone stays for the next.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let source = self.source.clone();
        let config = Arc::clone(&self.config);

        Box::pin(async move {
            let signature = RequestSignature::of(&req);

            let trx = match source.begin().await {
                Ok(trx) => trx,
                // Logged once, by the error response.
                Err(err) => {
                    let reason = format!("{} ({})", err, signature);
                    return Ok(TrxError::Begin(reason).into_response());
                }
            };
            config.log(|| format!("TX: starting transaction for {}", signature));
            log::debug!("transaction open for {}", signature);

            let slot = Slot::new(trx);
            let (mut finalizer, completion) = finish::channel();
            tokio::spawn(finalize(
                slot.clone(),
                completion,
                signature,
                Arc::clone(&config),
            ));

            let head = req.method() == Method::HEAD;
            let scope = Scope::new();
            scope.set(TRX_KEY, slot.clone());
            req.extensions_mut().insert(slot);

            let res = match scope.clone().run(inner.oneshot(req)).await {
                Ok(res) => res,
                Err(never) => match never {},
            };

            let status = res.status();
            finalizer.set_status(status);
            let bodyless = head || carries_no_body(status);
            Ok(res.map(|body| {
                Body::new(FinishBody::new(Body::new(body), finalizer, scope).bodyless(bodyless))
            }))
        })
    }
}

async fn finalize<T>(
    slot: Slot<T>,
    completion: oneshot::Receiver<Completion>,
    signature: RequestSignature,
    config: Arc<TrxConfig>,
) where
    T: TransactionHandle,
{
    let completion = match config.abandon_after {
        Some(limit) => match tokio::time::timeout(limit, completion).await {
            Ok(received) => received.unwrap_or_else(|_| aborted()),
            Err(_) => {
                log::warn!("{} did not finish within {:?}", signature, limit);
                Completion::failed(None, FinishError::Abandoned(limit))
            }
        },
        None => completion.await.unwrap_or_else(|_| aborted()),
    };

    let outcome = completion.outcome();
    let Some(trx) = slot.begin_finalize(outcome).await else {
        log::warn!("transaction for {} already finalized; ignoring {}", signature, outcome);
        return;
    };

    let result = match outcome {
        Outcome::Commit => {
            config.log(|| format!("TX: committing transaction for {}", signature));
            trx.commit().await
        }
        Outcome::Rollback => {
            let status = completion
                .status
                .map_or_else(|| "none".to_string(), |s| s.as_u16().to_string());
            config.log(|| {
                format!(
                    "TX: rolling back transaction for {} : statusCode={}",
                    signature, status
                )
            });
            if let Some(error) = &completion.error {
                log::debug!("{} finished with error: {}", signature, error);
            }
            trx.rollback().await
        }
    };

    if let Err(err) = result {
        log::error!("{} of transaction for {} failed: {}", outcome, signature, err);
    }
    slot.close(outcome).await;
    log::debug!("transaction for {} closed ({})", signature, outcome);
}

/// 1xx, 204 and 304 responses are sent without a body, so it is never polled.
fn carries_no_body(status: StatusCode) -> bool {
    status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

fn aborted() -> Completion {
    Completion::failed(None, FinishError::Aborted)
}
