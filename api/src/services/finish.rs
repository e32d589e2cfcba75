//! One-shot "response finished" notification.
//!
//! A [`Finalizer`] owns the sending half of a oneshot channel. It is fired at
//! most once: explicitly through [`Finalizer::finish`], or on drop with
//! [`FinishError::Aborted`] if nobody fired it first. The wrapped response
//! body, [`FinishBody`], fires it when the body ends, fails, or is dropped.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::StatusCode;
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use tokio::sync::oneshot;

use super::error::FinishError;
use super::outcome::Completion;
use crate::context::Scope;

pub struct Finalizer {
    sender: Option<oneshot::Sender<Completion>>,
    status: Option<StatusCode>,
}

/// Create a finalizer and the receiver its completion is delivered to.
pub fn channel() -> (Finalizer, oneshot::Receiver<Completion>) {
    let (sender, receiver) = oneshot::channel();
    let finalizer = Finalizer {
        sender: Some(sender),
        status: None,
    };
    (finalizer, receiver)
}

impl Finalizer {
    /// Record the response status once one exists.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn is_finished(&self) -> bool {
        self.sender.is_none()
    }

    /// Deliver the completion. Later calls are ignored.
    pub fn finish(&mut self, error: Option<FinishError>) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        let completion = match error {
            None => Completion {
                status: self.status,
                error: None,
            },
            Some(error) => Completion::failed(self.status, error),
        };
        // Receiver is gone when an abandon timeout already finalized.
        let _ = sender.send(completion);
    }
}

impl Drop for Finalizer {
    fn drop(&mut self) {
        self.finish(Some(FinishError::Aborted));
    }
}

/// Response body that fires its [`Finalizer`] when the body is done.
///
/// Frames are polled inside the request's context scope, so streaming bodies
/// can still reach the transaction.
pub struct FinishBody {
    inner: Body,
    finalizer: Finalizer,
    scope: Scope,
    bodyless: bool,
}

impl FinishBody {
    pub fn new(inner: Body, finalizer: Finalizer, scope: Scope) -> Self {
        Self {
            inner,
            finalizer,
            scope,
            bodyless: false,
        }
    }

    /// Mark a response the transport sends without a body (HEAD, 204, 304).
    /// Dropping it unread then counts as a clean finish.
    pub fn bodyless(mut self, bodyless: bool) -> Self {
        self.bodyless = bodyless;
        self
    }
}

impl HttpBody for FinishBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        let inner = &mut this.inner;
        let polled = this.scope.enter(|| Pin::new(inner).poll_frame(cx));

        match &polled {
            Poll::Ready(None) => this.finalizer.finish(None),
            Poll::Ready(Some(Err(err))) => this
                .finalizer
                .finish(Some(FinishError::Transport(err.to_string()))),
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for FinishBody {
    fn drop(&mut self) {
        // The transport may stop polling once the body reports its end, and
        // never polls a body it is not going to send.
        if !self.finalizer.is_finished() && (self.bodyless || self.inner.is_end_stream()) {
            self.finalizer.finish(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use http_body_util::BodyExt;

    fn body_with(inner: Body) -> (FinishBody, oneshot::Receiver<Completion>) {
        let (mut finalizer, rx) = channel();
        finalizer.set_status(StatusCode::OK);
        (FinishBody::new(inner, finalizer, Scope::new()), rx)
    }

    #[tokio::test]
    async fn dropped_finalizer_reports_abort() {
        let (finalizer, rx) = channel();
        drop(finalizer);
        let completion = rx.await.unwrap();
        assert_eq!(completion, Completion::failed(None, FinishError::Aborted));
    }

    #[tokio::test]
    async fn finish_fires_once() {
        let (mut finalizer, rx) = channel();
        finalizer.set_status(StatusCode::CREATED);
        finalizer.finish(None);
        finalizer.finish(Some(FinishError::Aborted));
        drop(finalizer);
        assert_eq!(rx.await.unwrap(), Completion::finished(StatusCode::CREATED));
    }

    #[tokio::test]
    async fn fully_read_body_finishes_cleanly() {
        let (body, rx) = body_with(Body::from("hello"));
        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello");
        assert_eq!(rx.await.unwrap(), Completion::finished(StatusCode::OK));
    }

    #[tokio::test]
    async fn unread_body_reports_abort() {
        let chunks = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from("a"))]);
        let (body, rx) = body_with(Body::from_stream(chunks));
        drop(body);
        let completion = rx.await.unwrap();
        assert_eq!(completion.error, Some(FinishError::Aborted));
    }

    #[tokio::test]
    async fn empty_body_dropped_unpolled_finishes_cleanly() {
        let (body, rx) = body_with(Body::empty());
        drop(body);
        assert_eq!(rx.await.unwrap(), Completion::finished(StatusCode::OK));
    }

    #[tokio::test]
    async fn bodyless_response_dropped_unread_finishes_cleanly() {
        let chunks = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from("etag-body"))]);
        let (body, rx) = body_with(Body::from_stream(chunks));
        drop(body.bodyless(true));
        assert_eq!(rx.await.unwrap(), Completion::finished(StatusCode::OK));
    }

    #[tokio::test]
    async fn body_error_reports_transport_failure() {
        let chunks = stream::iter(vec![
            Ok(Bytes::from("a")),
            Err(std::io::Error::other("connection reset")),
        ]);
        let (body, rx) = body_with(Body::from_stream(chunks));
        assert!(body.collect().await.is_err());
        let completion = rx.await.unwrap();
        assert!(matches!(completion.error, Some(FinishError::Transport(_))));
        assert_eq!(completion.status, Some(StatusCode::OK));
    }
}
