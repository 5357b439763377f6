//! AWS EventStream frame decoding.
//!
//! Bedrock answers streaming requests with
//! `application/vnd.amazon.eventstream`: length-prefixed binary frames with
//! CRC trailers. The smithy decoder handles framing and checksums; this
//! module adapts it onto a byte stream and lifts exception frames into
//! gateway errors.

use aws_smithy_eventstream::frame::{DecodedFrame, MessageFrameDecoder};
use aws_smithy_types::event_stream::{HeaderValue, Message};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use super::StreamEvent;
use crate::error::{GatewayError, GatewayResult};

pub(crate) fn decode<S>(bytes: S) -> impl Stream<Item = GatewayResult<StreamEvent>>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    let state = DecodeState {
        bytes,
        buffer: BytesMut::new(),
        decoder: MessageFrameDecoder::default(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            match state.decoder.decode_frame(&mut state.buffer) {
                Ok(DecodedFrame::Complete(message)) => {
                    let event = convert_message(&message);
                    if event.is_err() {
                        state.done = true;
                    }
                    return Some((event, state));
                }
                Ok(DecodedFrame::Incomplete) => {}
                Err(error) => {
                    state.done = true;
                    return Some((
                        Err(GatewayError::StreamMidFault(format!("EventStream framing error: {error}"))),
                        state,
                    ));
                }
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(error)) => {
                    state.done = true;
                    return Some((
                        Err(GatewayError::StreamMidFault(format!("upstream read failed: {error}"))),
                        state,
                    ));
                }
                None => {
                    state.done = true;
                    return None;
                }
            }
        }
    })
}

struct DecodeState<S> {
    bytes: S,
    buffer: BytesMut,
    decoder: MessageFrameDecoder,
    done: bool,
}

fn convert_message(message: &Message) -> GatewayResult<StreamEvent> {
    let message_type = header_string(message, ":message-type");

    if matches!(message_type.as_deref(), Some("exception") | Some("error")) {
        let kind = header_string(message, ":exception-type")
            .or_else(|| header_string(message, ":error-code"))
            .unwrap_or_else(|| "unknown".to_string());
        let detail = String::from_utf8_lossy(&message.payload()[..]).into_owned();

        return Err(GatewayError::StreamMidFault(format!(
            "upstream event stream exception '{kind}': {detail}"
        )));
    }

    Ok(StreamEvent {
        event: header_string(message, ":event-type"),
        data: Bytes::copy_from_slice(&message.payload()[..]),
    })
}

fn header_string(message: &Message, name: &str) -> Option<String> {
    message.headers().iter().find_map(|header| {
        if header.name().as_str() != name {
            return None;
        }

        match header.value() {
            HeaderValue::String(value) => Some(value.as_str().to_string()),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use aws_smithy_eventstream::frame::write_message_to;
    use aws_smithy_types::event_stream::Header;
    use futures::executor::block_on;

    use super::*;

    fn frame(message: &Message) -> Bytes {
        let mut buffer = Vec::new();
        write_message_to(message, &mut buffer).unwrap();
        Bytes::from(buffer)
    }

    #[test]
    fn decodes_frames_in_order() {
        let first = Message::new(&b"{\"bytes\":\"AA==\"}"[..])
            .add_header(Header::new(":message-type", HeaderValue::String("event".into())))
            .add_header(Header::new(":event-type", HeaderValue::String("chunk".into())));
        let second = Message::new(&b"{\"bytes\":\"BB==\"}"[..])
            .add_header(Header::new(":message-type", HeaderValue::String("event".into())))
            .add_header(Header::new(":event-type", HeaderValue::String("chunk".into())));

        let mut wire = BytesMut::new();
        wire.extend_from_slice(&frame(&first));
        wire.extend_from_slice(&frame(&second));

        // Split the wire bytes mid-frame to exercise buffering.
        let wire = wire.freeze();
        let split = wire.len() / 2 + 3;
        let parts = vec![Ok(wire.slice(..split)), Ok(wire.slice(split..))];

        let events: Vec<_> = block_on(decode(futures::stream::iter(parts)).collect::<Vec<_>>());

        assert_eq!(events.len(), 2);
        let first = events[0].as_ref().unwrap();
        assert_eq!(first.event.as_deref(), Some("chunk"));
        assert_eq!(first.data, Bytes::from_static(b"{\"bytes\":\"AA==\"}"));
    }

    #[test]
    fn exception_frames_become_errors() {
        let exception = Message::new(&b"{\"message\":\"throttled\"}"[..])
            .add_header(Header::new(":message-type", HeaderValue::String("exception".into())))
            .add_header(Header::new(
                ":exception-type",
                HeaderValue::String("throttlingException".into()),
            ));

        let parts = vec![Ok(frame(&exception))];
        let events: Vec<_> = block_on(decode(futures::stream::iter(parts)).collect::<Vec<_>>());

        assert_eq!(events.len(), 1);
        let error = events[0].as_ref().unwrap_err();
        assert!(matches!(error, GatewayError::StreamMidFault(message) if message.contains("throttlingException")));
    }
}
