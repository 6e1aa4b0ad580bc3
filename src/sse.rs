use tokio::sync::mpsc;

use crate::context::Context;

/// Payload that terminates an event stream cleanly when sent by a producer.
pub const CLOSE: &str = "close";

/// A typed server-sent event. Messages without a name are written under the
/// configured default event name.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: Option<String>,
    pub data: String,
}

impl Event {
    pub fn new(data: impl Into<String>) -> Self {
        Event {
            name: None,
            data: data.into(),
        }
    }

    pub fn named(name: impl Into<String>, data: impl Into<String>) -> Self {
        Event {
            name: Some(name.into()),
            data: data.into(),
        }
    }
}

/// Sending half handed to the event producer. Dropping it drains buffered
/// messages to the client and then ends the stream.
pub type EventSender = mpsc::Sender<Event>;

/// Receiving half attached to a [`Context`]; drained by the connection loop
/// after the handler chain returns.
pub struct EventSource {
    pub(crate) rx: mpsc::Receiver<Event>,
}

/// Create a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, EventSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, EventSource { rx })
}

/// Install the event-stream response headers and attach `source` to the
/// context. The connection loop writes the headers without a Content-Length
/// and then streams events until the source closes, a write fails, or a
/// message carries the [`CLOSE`] payload.
pub fn attach(ctx: &mut Context, source: EventSource) {
    ctx.set_header("Content-Type", "text/event-stream");
    ctx.set_header("Cache-Control", "no-cache");
    ctx.set_header("Connection", "keep-alive");
    ctx.set_header("Access-Control-Allow-Origin", "*");
    ctx.set_event_source(source);
}

/// Wire format for one event frame.
pub(crate) fn format_event(buf: &mut Vec<u8>, default_name: &str, event: &Event) {
    buf.clear();
    buf.extend_from_slice(b"event: ");
    buf.extend_from_slice(event.name.as_deref().unwrap_or(default_name).as_bytes());
    buf.extend_from_slice(b"\ndata: ");
    buf.extend_from_slice(event.data.as_bytes());
    buf.extend_from_slice(b"\n\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_use_the_default_name() {
        let mut buf = Vec::new();
        format_event(&mut buf, "message", &Event::new("event 1"));
        assert_eq!(buf, b"event: message\ndata: event 1\n\n");
    }

    #[test]
    fn frames_prefer_the_per_message_name() {
        let mut buf = Vec::new();
        format_event(&mut buf, "message", &Event::named("tick", "42"));
        assert_eq!(buf, b"event: tick\ndata: 42\n\n");
    }

    #[test]
    fn attach_installs_stream_headers() {
        let mut ctx = Context::new();
        let (_tx, source) = channel(4);
        attach(&mut ctx, source);

        let headers = ctx.response_headers();
        assert!(headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v == "text/event-stream"));
        assert!(headers
            .iter()
            .any(|(k, v)| k == "Access-Control-Allow-Origin" && v == "*"));
        assert!(ctx.events.is_some());
    }
}
