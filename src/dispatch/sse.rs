use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::dispatch::CompletionStream;
use crate::error::ProviderError;

/// What one SSE event means for the fragment sequence.
#[derive(Debug, PartialEq)]
pub enum SseStep {
    /// Next text fragment, in generation order.
    Text(String),
    /// Event carries nothing for the caller (pings, role headers, usage frames).
    Skip,
    /// Model signalled a stop condition or max tokens.
    Stop,
}

/// Maps `(event name, data)` to a step. Errors carry a short reason.
pub type FrameParser = fn(&str, &str) -> Result<SseStep, String>;

/// Wrap an SSE response body as a `CompletionStream`.
///
/// The producer is pulled lazily by the consumer. Ending the sequence for any
/// reason (stop event, `[DONE]`, end of body, error, cancellation) drops the
/// response body, releasing the connection.
pub fn fragment_stream(
    response: reqwest::Response,
    provider: &str,
    model: &str,
    parse: FrameParser,
) -> CompletionStream {
    let cancel = CancellationToken::new();
    let events = Box::pin(response.bytes_stream().eventsource());
    let state = Some((events, cancel.clone(), provider.to_string()));

    let inner = futures_util::stream::unfold(state, move |state| async move {
        let (mut events, token, provider) = state?;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(%provider, "stream cancelled by consumer");
                    return None;
                }
                ev = events.next() => ev,
            };

            let event = match next {
                None => return None,
                Some(Err(e)) => {
                    let err = ProviderError::Unavailable {
                        provider: provider.clone(),
                        message: format!("stream interrupted: {e}"),
                        status: None,
                    };
                    return Some((Err(err), None));
                }
                Some(Ok(event)) => event,
            };

            if event.data.trim() == "[DONE]" {
                return None;
            }

            match parse(&event.event, &event.data) {
                Ok(SseStep::Text(text)) if text.is_empty() => continue,
                Ok(SseStep::Text(text)) => return Some((Ok(text), Some((events, token, provider)))),
                Ok(SseStep::Skip) => continue,
                Ok(SseStep::Stop) => return None,
                Err(message) => {
                    let err = ProviderError::Unavailable {
                        provider: provider.clone(),
                        message,
                        status: None,
                    };
                    return Some((Err(err), None));
                }
            }
        }
    });

    CompletionStream::new(Box::pin(inner), cancel, provider, model)
}
