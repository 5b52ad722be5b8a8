//! `GetResponse`: the send-side handle returned by each request method
//! (spec.md §4.E, §5). Exhaustive `GetResponseEvent` variants replace the
//! source's `onAny` catch-all (spec.md §9).

use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use std::sync::Arc;

use crate::error::P2pError;
use crate::route::Response;

/// Approximate wire size of a response's payload, used against the caller's
/// declared `limit` (spec.md §4.E: "caps total delivered bytes by a declared
/// `limit`... and cancels streams that exceed it").
fn response_byte_len(response: &Response) -> u64 {
    match response {
        Response::Fetch(r) => r.records.iter().map(|b| b.len() as u64).sum(),
        Response::ReadBlob(r) => r.data.len() as u64,
        Response::Store(_) | Response::WriteBlob(_) | Response::Unsubscribe(_) => 0,
        Response::Message(r) => r.payload.as_ref().map(|p| p.len() as u64).unwrap_or(0),
    }
}

#[derive(Debug)]
pub enum GetResponseEvent {
    Reply(Response),
    Cancel,
    Timeout,
    Error(P2pError),
}

/// The producer-side half, owned by the router/session plumbing that feeds
/// replies into a [`GetResponse`].
#[derive(Clone)]
pub struct GetResponseSender {
    sender: mpsc::Sender<Response>,
}

impl GetResponseSender {
    pub async fn send(&self, response: Response) -> Result<(), Response> {
        self.sender.send(response).await.map_err(|e| e.0)
    }
}

/// Create a linked `(GetResponse, GetResponseSender)` pair for one in-flight
/// request, named after the original request's `msgId`.
pub fn channel(
    msg_id: u64,
    limit: Option<u64>,
    timeout: Option<Duration>,
    timeout_stream: Option<Duration>,
) -> (GetResponse, GetResponseSender) {
    let (tx, rx) = mpsc::channel(16);
    let response = GetResponse {
        msg_id,
        receiver: rx,
        cancel_requested: Arc::new(Notify::new()),
        canceled: false,
        limit,
        delivered: 0,
        timeout,
        timeout_stream,
        received_any: false,
        on_reply: None,
        on_cancel: None,
        on_timeout: None,
        on_error: None,
    };
    (response, GetResponseSender { sender: tx })
}

pub struct GetResponse {
    msg_id: u64,
    receiver: mpsc::Receiver<Response>,
    cancel_requested: Arc<Notify>,
    canceled: bool,
    limit: Option<u64>,
    delivered: u64,
    timeout: Option<Duration>,
    timeout_stream: Option<Duration>,
    received_any: bool,
    on_reply: Option<Box<dyn FnMut(&Response) + Send>>,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
    on_timeout: Option<Box<dyn FnOnce() + Send>>,
    on_error: Option<Box<dyn FnOnce(&P2pError) + Send>>,
}

impl GetResponse {
    pub fn msg_id(&self) -> u64 {
        self.msg_id
    }

    pub fn on_reply(&mut self, f: impl FnMut(&Response) + Send + 'static) -> &mut Self {
        self.on_reply = Some(Box::new(f));
        self
    }

    pub fn on_cancel(&mut self, f: impl FnOnce() + Send + 'static) -> &mut Self {
        self.on_cancel = Some(Box::new(f));
        self
    }

    pub fn on_timeout(&mut self, f: impl FnOnce() + Send + 'static) -> &mut Self {
        self.on_timeout = Some(Box::new(f));
        self
    }

    pub fn on_error(&mut self, f: impl FnOnce(&P2pError) + Send + 'static) -> &mut Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Sends an `unsubscribe` for this handle's `msgId` (fire-and-forget),
    /// releases local handlers, and fires `onCancel`. Late replies after
    /// this point are discarded by the caller reading `events()`.
    pub fn cancel(&mut self) {
        if self.canceled {
            return;
        }
        self.canceled = true;
        self.cancel_requested.notify_waiters();
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }

    /// Await the next event: a reply (firing `onReply`), a timeout (firing
    /// `onTimeout` and treated as terminal), or a closed channel (`None`
    /// signals the stream ended without an explicit EOF/terminal status).
    pub async fn next_event(&mut self) -> Option<GetResponseEvent> {
        if self.canceled {
            return Some(GetResponseEvent::Cancel);
        }

        let wait = if self.received_any { self.timeout_stream } else { self.timeout };

        let received = match wait {
            Some(duration) => {
                tokio::select! {
                    _ = self.cancel_requested.notified() => {
                        self.canceled = true;
                        if let Some(on_cancel) = self.on_cancel.take() {
                            on_cancel();
                        }
                        return Some(GetResponseEvent::Cancel);
                    }
                    _ = tokio::time::sleep(duration) => {
                        if let Some(on_timeout) = self.on_timeout.take() {
                            on_timeout();
                        }
                        return Some(GetResponseEvent::Timeout);
                    }
                    message = self.receiver.recv() => message,
                }
            }
            None => {
                tokio::select! {
                    _ = self.cancel_requested.notified() => {
                        self.canceled = true;
                        if let Some(on_cancel) = self.on_cancel.take() {
                            on_cancel();
                        }
                        return Some(GetResponseEvent::Cancel);
                    }
                    message = self.receiver.recv() => message,
                }
            }
        };

        let response = received?;
        self.received_any = true;

        self.delivered += response_byte_len(&response);
        if let Some(limit) = self.limit {
            if self.delivered > limit {
                self.cancel();
                return Some(GetResponseEvent::Cancel);
            }
        }

        if let Some(on_reply) = self.on_reply.as_mut() {
            on_reply(&response);
        }
        Some(GetResponseEvent::Reply(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;
    use crate::route::StoreResponse;

    #[tokio::test]
    async fn delivers_replies_and_fires_on_reply() {
        let (mut response, sender) = channel(1, None, None, None);
        let mut seen = 0;
        response.on_reply(move |_| seen += 1);
        sender
            .send(Response::Store(StoreResponse { status: Status::Result, error: None }))
            .await
            .unwrap();
        let event = response.next_event().await.unwrap();
        assert!(matches!(event, GetResponseEvent::Reply(_)));
    }

    #[tokio::test]
    async fn cancel_is_sticky_and_fires_on_cancel() {
        let (mut response, _sender) = channel(1, None, None, None);
        response.on_cancel(|| {});
        response.cancel();
        let event = response.next_event().await.unwrap();
        assert!(matches!(event, GetResponseEvent::Cancel));
    }

    #[tokio::test(start_paused = true)]
    async fn first_reply_timeout_fires_on_timeout() {
        let (mut response, _sender) = channel(1, None, Some(Duration::from_millis(10)), None);
        let event = response.next_event().await.unwrap();
        assert!(matches!(event, GetResponseEvent::Timeout));
    }

    #[tokio::test]
    async fn byte_limit_cancels_oversized_stream() {
        let (mut response, sender) = channel(1, Some(2), None, None);
        sender
            .send(Response::Message(crate::route::MessageResponse {
                status: Status::Result,
                payload: Some(vec![0u8; 10]),
                error: None,
            }))
            .await
            .unwrap();
        let event = response.next_event().await.unwrap();
        assert!(matches!(event, GetResponseEvent::Cancel));
    }
}
