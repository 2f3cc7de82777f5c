//! RPC envelope encoding and server message decoding.
//!
//! Outgoing requests are wrapped in `<rpc message-id="..">` by
//! [`wrap_rpc`]; the hello exchanged at session start is built by [`hello`].
//!
//! Incoming framed messages are classified by [`parse_message`] into either
//! an [`RpcReply`] (correlated back to a waiting caller by message-id) or a
//! [`Notification`] (out-of-band, no message-id). A reply carrying
//! `<rpc-error>` records is surfaced as [`NetconfError::Rpc`] instead of
//! attempting payload decode.

use chrono::{DateTime, FixedOffset};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::codec::encode::BodyBuilder;
use crate::error::{NetconfError, Result, RpcError, Severity};

/// Base protocol XML namespace (RFC 6241), the xmlns of every envelope.
pub const BASE_1_0: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
/// Base capability URI advertised in `<hello>`, implies end-marker framing.
/// Distinct from the XML namespace: capability URIs carry no `xml:ns`.
pub const CAP_BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
/// Base capability URI advertised in `<hello>`, implies chunked framing.
pub const CAP_BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";
/// Namespace of `<create-subscription>` and `<notification>` (RFC 5277).
pub const NOTIFICATION_NS: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";

/// Wrap an operation body in the RPC request envelope.
pub fn wrap_rpc(message_id: u64, body: &str) -> String {
    format!(
        "<rpc message-id=\"{}\" xmlns=\"{}\">{}</rpc>",
        message_id, BASE_1_0, body
    )
}

/// Build the client `<hello>` advertising the given capability URIs.
pub fn hello(capabilities: &[String]) -> Result<String> {
    let mut b = BodyBuilder::new();
    b.start_with_attrs("hello", &[("xmlns", BASE_1_0)])?;
    b.start("capabilities")?;
    for cap in capabilities {
        b.text_element("capability", cap)?;
    }
    b.end("capabilities")?;
    b.end("hello")?;
    Ok(b.finish())
}

/// A peer `<hello>`: advertised capabilities plus the session identifier
/// a server reports.
#[derive(Debug, Clone, Default)]
pub struct HelloMessage {
    pub capabilities: Vec<String>,
    pub session_id: Option<u64>,
}

/// A decoded `<rpc-reply>`.
#[derive(Debug, Clone, Default)]
pub struct RpcReply {
    /// The correlating message-id echoed from the request.
    pub message_id: u64,
    /// Whether the reply contained `<ok/>` (presence boolean).
    pub ok: bool,
    /// Inner XML of `<data>`, for operations that return a payload.
    pub data: Option<String>,
    /// Structured `<rpc-error>` records, empty on success.
    pub errors: Vec<RpcError>,
}

impl RpcReply {
    /// Convert a reply carrying error records into `Err(Rpc)`.
    pub fn check(self) -> Result<Self> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(NetconfError::Rpc(self.errors))
        }
    }
}

/// An out-of-band `<notification>`, not tied to any call.
#[derive(Debug, Clone)]
pub struct Notification {
    /// `<eventTime>` text as sent by the server.
    pub event_time: String,
    /// Local name of the payload's root element (the event name).
    pub name: String,
    /// Raw XML of the payload element.
    pub payload: String,
}

impl Notification {
    /// The event time parsed as RFC 3339, if well-formed.
    pub fn parsed_event_time(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.event_time).ok()
    }
}

/// A message the router pulled off the wire.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Reply(RpcReply),
    Notification(Notification),
}

/// Classify and decode one framed message from the server.
pub fn parse_message(src: &str) -> Result<ServerMessage> {
    let mut reader = reader_for(src);
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                return match e.local_name().as_ref() {
                    b"rpc-reply" => Ok(ServerMessage::Reply(parse_reply_body(
                        &mut reader,
                        &e,
                        src,
                    )?)),
                    b"notification" => {
                        Ok(ServerMessage::Notification(parse_notification_body(
                            &mut reader,
                            src,
                        )?))
                    }
                    other => Err(NetconfError::Framing(format!(
                        "unexpected message element <{}>",
                        String::from_utf8_lossy(other)
                    ))),
                };
            }
            Event::Empty(e) if e.local_name().as_ref() == b"rpc-reply" => {
                return Ok(ServerMessage::Reply(RpcReply {
                    message_id: message_id_attr(&e)?,
                    ..RpcReply::default()
                }));
            }
            Event::Eof => {
                return Err(NetconfError::Framing(
                    "message contained no recognizable element".to_string(),
                ));
            }
            _ => {}
        }
    }
}

/// Parse a peer `<hello>` message.
pub fn parse_hello(src: &str) -> Result<HelloMessage> {
    let mut reader = reader_for(src);
    let mut msg = HelloMessage::default();
    let mut saw_hello = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"hello" => saw_hello = true,
                b"capability" => {
                    let name = e.name();
                    let text = reader.read_text(name)?;
                    msg.capabilities.push(text.trim().to_string());
                }
                b"session-id" => {
                    let name = e.name();
                    let text = reader.read_text(name)?;
                    let id = text.trim().parse().map_err(|_| {
                        NetconfError::Handshake(format!("invalid session-id {:?}", text.trim()))
                    })?;
                    msg.session_id = Some(id);
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    if !saw_hello {
        return Err(NetconfError::Handshake(
            "peer did not send a <hello> message".to_string(),
        ));
    }
    Ok(msg)
}

fn reader_for(src: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(src);
    reader.config_mut().trim_text(true);
    reader
}

fn message_id_attr(e: &BytesStart<'_>) -> Result<u64> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.local_name().as_ref() == b"message-id" {
            let value = attr.unescape_value()?;
            return value.trim().parse().map_err(|_| {
                NetconfError::Framing(format!("invalid message-id {:?}", value.trim()))
            });
        }
    }
    Err(NetconfError::Framing(
        "rpc-reply missing message-id attribute".to_string(),
    ))
}

fn parse_reply_body(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
    src: &str,
) -> Result<RpcReply> {
    let mut reply = RpcReply {
        message_id: message_id_attr(start)?,
        ..RpcReply::default()
    };

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"ok" => {
                    reply.ok = true;
                    reader.read_to_end(e.name())?;
                }
                b"data" => {
                    let span = reader.read_to_end(e.name())?;
                    reply.data =
                        Some(src[span.start as usize..span.end as usize].trim().to_string());
                }
                b"rpc-error" => {
                    reply.errors.push(parse_rpc_error(reader)?);
                }
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"ok" => reply.ok = true,
                b"data" => reply.data = Some(String::new()),
                _ => {}
            },
            Event::End(e) if e.local_name().as_ref() == b"rpc-reply" => break,
            Event::Eof => {
                return Err(NetconfError::Framing("truncated rpc-reply".to_string()));
            }
            _ => {}
        }
    }
    Ok(reply)
}

fn parse_rpc_error(reader: &mut Reader<&[u8]>) -> Result<RpcError> {
    let mut record = RpcError::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let field = e.local_name().as_ref().to_vec();
                let text = reader.read_text(e.name())?;
                let text = text.trim();
                match field.as_slice() {
                    b"error-severity" => record.severity = Severity::parse(text),
                    b"error-tag" => record.tag = text.to_string(),
                    b"error-type" => record.error_type = text.to_string(),
                    b"error-path" => record.path = Some(text.to_string()),
                    b"error-message" => record.message = Some(text.to_string()),
                    _ => {}
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"rpc-error" => break,
            Event::Eof => {
                return Err(NetconfError::Framing("truncated rpc-error".to_string()));
            }
            _ => {}
        }
    }
    Ok(record)
}

fn parse_notification_body(reader: &mut Reader<&[u8]>, src: &str) -> Result<Notification> {
    let mut event_time = String::new();
    let mut name = String::new();
    let mut payload = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let local = e.local_name().as_ref().to_vec();
                if local == b"eventTime" {
                    event_time = reader.read_text(e.name())?.trim().to_string();
                } else {
                    let elem_start = src[..byte_pos(reader)].rfind('<').unwrap_or(0);
                    let span = reader.read_to_end(e.name())?;
                    if name.is_empty() {
                        name = String::from_utf8_lossy(&local).into_owned();
                        // Keep the whole element, not just its inner content.
                        let end = src[span.end as usize..]
                            .find('>')
                            .map(|i| span.end as usize + i + 1)
                            .unwrap_or(src.len());
                        payload = src[elem_start..end].trim().to_string();
                    }
                }
            }
            Event::Empty(e) => {
                if name.is_empty() && e.local_name().as_ref() != b"eventTime" {
                    name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    payload = format!("<{}/>", name);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"notification" => break,
            Event::Eof => {
                return Err(NetconfError::Framing("truncated notification".to_string()));
            }
            _ => {}
        }
    }

    if event_time.is_empty() {
        return Err(NetconfError::Framing(
            "notification missing eventTime".to_string(),
        ));
    }
    Ok(Notification {
        event_time,
        name,
        payload,
    })
}

fn byte_pos(reader: &Reader<&[u8]>) -> usize {
    reader.buffer_position() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_rpc() {
        let rpc = wrap_rpc(7, "<get-config/>");
        assert_eq!(
            rpc,
            "<rpc message-id=\"7\" xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">\
             <get-config/></rpc>"
        );
    }

    #[test]
    fn test_hello_encoding() {
        let caps = vec![CAP_BASE_1_0.to_string(), CAP_BASE_1_1.to_string()];
        let hello = hello(&caps).unwrap();
        // The envelope xmlns is the XML namespace; the advertised
        // capabilities are the plain capability URIs.
        assert!(hello.starts_with("<hello xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">"));
        assert!(hello.contains("<capability>urn:ietf:params:netconf:base:1.0</capability>"));
        assert!(hello.contains("<capability>urn:ietf:params:netconf:base:1.1</capability>"));
        assert!(hello.ends_with("</hello>"));
    }

    #[test]
    fn test_parse_hello_with_session_id() {
        let src = r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
            <capabilities>
                <capability>urn:ietf:params:netconf:base:1.1</capability>
                <capability>urn:ietf:params:netconf:capability:candidate:1.0</capability>
            </capabilities>
            <session-id>42</session-id>
        </hello>"#;
        let msg = parse_hello(src).unwrap();
        assert_eq!(msg.capabilities, vec![
            CAP_BASE_1_1.to_string(),
            "urn:ietf:params:netconf:capability:candidate:1.0".to_string(),
        ]);
        assert_eq!(msg.session_id, Some(42));
    }

    #[test]
    fn test_parse_hello_rejects_non_hello() {
        let result = parse_hello("<rpc-reply message-id=\"1\"><ok/></rpc-reply>");
        assert!(matches!(result, Err(NetconfError::Handshake(_))));
    }

    #[test]
    fn test_parse_ok_reply() {
        let src = r#"<rpc-reply message-id="3" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
            <ok/>
        </rpc-reply>"#;
        let ServerMessage::Reply(reply) = parse_message(src).unwrap() else {
            panic!("expected reply");
        };
        assert_eq!(reply.message_id, 3);
        assert!(reply.ok);
        assert!(reply.errors.is_empty());
        assert!(reply.data.is_none());
    }

    #[test]
    fn test_parse_data_reply() {
        let src = r#"<rpc-reply message-id="9">
            <data><interfaces><interface><name>eth0</name></interface></interfaces></data>
        </rpc-reply>"#;
        let ServerMessage::Reply(reply) = parse_message(src).unwrap() else {
            panic!("expected reply");
        };
        assert_eq!(reply.message_id, 9);
        let data = reply.data.unwrap();
        assert!(data.contains("<name>eth0</name>"));
        assert!(data.starts_with("<interfaces>"));
    }

    #[test]
    fn test_parse_error_reply() {
        let src = r#"<rpc-reply message-id="5">
            <rpc-error>
                <error-type>protocol</error-type>
                <error-tag>lock-denied</error-tag>
                <error-severity>error</error-severity>
                <error-path>/rpc/lock</error-path>
                <error-message>Lock is already held</error-message>
            </rpc-error>
        </rpc-reply>"#;
        let ServerMessage::Reply(reply) = parse_message(src).unwrap() else {
            panic!("expected reply");
        };
        assert_eq!(reply.errors.len(), 1);
        let err = &reply.errors[0];
        assert_eq!(err.severity, Severity::Error);
        assert_eq!(err.tag, "lock-denied");
        assert_eq!(err.error_type, "protocol");
        assert_eq!(err.path.as_deref(), Some("/rpc/lock"));
        assert_eq!(err.message.as_deref(), Some("Lock is already held"));

        let result = reply.check();
        assert!(matches!(result, Err(NetconfError::Rpc(errors)) if errors.len() == 1));
    }

    #[test]
    fn test_parse_multiple_error_records() {
        let src = r#"<rpc-reply message-id="6">
            <rpc-error><error-tag>bad-element</error-tag></rpc-error>
            <rpc-error><error-tag>missing-attribute</error-tag></rpc-error>
        </rpc-reply>"#;
        let ServerMessage::Reply(reply) = parse_message(src).unwrap() else {
            panic!("expected reply");
        };
        assert_eq!(reply.errors.len(), 2);
        assert_eq!(reply.errors[0].tag, "bad-element");
        assert_eq!(reply.errors[1].tag, "missing-attribute");
    }

    #[test]
    fn test_reply_without_message_id_rejected() {
        let result = parse_message("<rpc-reply><ok/></rpc-reply>");
        assert!(matches!(result, Err(NetconfError::Framing(_))));
    }

    #[test]
    fn test_parse_notification() {
        let src = r#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0">
            <eventTime>2024-05-01T10:00:00Z</eventTime>
            <netconf-config-change><changed-by>cli</changed-by></netconf-config-change>
        </notification>"#;
        let ServerMessage::Notification(n) = parse_message(src).unwrap() else {
            panic!("expected notification");
        };
        assert_eq!(n.event_time, "2024-05-01T10:00:00Z");
        assert_eq!(n.name, "netconf-config-change");
        assert!(n.payload.contains("<changed-by>cli</changed-by>"));
        assert!(n.parsed_event_time().is_some());
    }

    #[test]
    fn test_notification_missing_event_time_rejected() {
        let src = "<notification><thing/></notification>";
        assert!(matches!(
            parse_message(src),
            Err(NetconfError::Framing(_))
        ));
    }

    #[test]
    fn test_unknown_root_rejected() {
        let result = parse_message("<surprise/>");
        assert!(matches!(result, Err(NetconfError::Framing(_))));
    }

    #[test]
    fn test_presence_boolean_decode() {
        // <ok/> present decodes to true whatever its content...
        let src = r#"<rpc-reply message-id="1"><ok></ok></rpc-reply>"#;
        let ServerMessage::Reply(reply) = parse_message(src).unwrap() else {
            panic!("expected reply");
        };
        assert!(reply.ok);

        // ...and absent decodes to false.
        let src = r#"<rpc-reply message-id="2"><data/></rpc-reply>"#;
        let ServerMessage::Reply(reply) = parse_message(src).unwrap() else {
            panic!("expected reply");
        };
        assert!(!reply.ok);
    }
}
