// Runs store tickets against a transport and reports back as StoreEvents.

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::api::{ChatStream, Transport};
use crate::parse::stream::Utf8Decoder;
use crate::store::{StoreEvent, Submission, ValidationRequest};

pub type EventSender = mpsc::UnboundedSender<StoreEvent>;

pub fn spawn_validation<T: Transport>(transport: T, tx: EventSender, request: ValidationRequest) {
    tokio::spawn(async move {
        let event = run_validation(&transport, request).await;
        let _ = tx.send(event);
    });
}

pub async fn run_validation<T: Transport>(transport: &T, request: ValidationRequest) -> StoreEvent {
    let result = transport.check_credential(&request.credential).await;
    StoreEvent::Validated { request, result }
}

pub fn spawn_submission<T: Transport>(transport: T, tx: EventSender, submission: Submission) {
    tokio::spawn(async move {
        run_submission(&transport, submission, &tx).await;
    });
}

/// Sends the request and streams the reply as cumulative `StreamChunk`s,
/// finishing with exactly one `StreamDone` or `StreamFailed`.
pub async fn run_submission<T: Transport>(transport: &T, submission: Submission, tx: &EventSender) {
    let Submission { epoch, request } = submission;

    let ChatStream {
        session_id,
        rate_limit,
        mut body,
    } = match transport.submit_message(&request).await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = tx.send(StoreEvent::StreamFailed {
                epoch,
                error: err.to_string(),
            });
            return;
        }
    };

    if let Some(limit) = &rate_limit {
        tracing::debug!(limit = ?limit.limit, remaining = ?limit.remaining, "rate limit");
    }

    let mut decoder = Utf8Decoder::new();
    let mut reply = String::new();

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = tx.send(StoreEvent::StreamFailed {
                    epoch,
                    error: err.to_string(),
                });
                return;
            }
        };

        let text = decoder.push(&bytes);
        if text.is_empty() {
            continue;
        }
        reply.push_str(&text);
        if tx
            .send(StoreEvent::StreamChunk {
                epoch,
                content: reply.clone(),
            })
            .is_err()
        {
            // nobody is listening any more
            return;
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        reply.push_str(&tail);
        let _ = tx.send(StoreEvent::StreamChunk {
            epoch,
            content: reply,
        });
    }

    let _ = tx.send(StoreEvent::StreamDone { epoch, session_id });
}
