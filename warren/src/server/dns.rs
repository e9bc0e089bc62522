//! The authoritative DNS front of the tunnel.
//!
//! A hickory `RequestHandler` that owns the zone suffix and dispatches
//! parsed commands against the session store. The mapping between
//! failures and response codes:
//!
//! - query outside the configured zone → REFUSED
//! - labels that do not parse as a tunnel command → NXDOMAIN
//! - chunk conflicts, busy sessions, internal failures → SERVFAIL
//!
//! Successful answers are authoritative and carry TTL 0 so resolvers on
//! the path never cache tunnel state. Response size is bounded by one
//! chunk per query; the server never recurses and never answers ANY.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::Name;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::proto::op::{Header, MessageType, OpCode, ResponseCode};
use hickory_server::proto::rr::rdata::a::A;
use hickory_server::proto::rr::rdata::txt::TXT;
use hickory_server::proto::rr::{LowerName, RData, Record, RecordType};
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use warren_wire::command::{format_status, Command};
use warren_wire::error::NameError;
use warren_wire::{ACK_REPLY, PAST_END_REPLY, PROBE_REPLY};

use crate::error::AppError;
use crate::server::session::{InboundOutcome, ReadOutcome};
use crate::server::{orchestrator, ServerContext};

/// DNS-layer errors, each mapping to one response code.
#[derive(Debug)]
pub enum DnsError {
    /// The incoming `OpCode` was not a standard query.
    InvalidOpCode(OpCode),
    /// The message was not a query at all.
    InvalidMessageType(MessageType),
    /// The query targets a name outside the tunnel zone.
    OutsideZone(LowerName),
    /// The labels left of the suffix are not a tunnel command.
    BadName(NameError),
    /// Conflicting chunk delivery; the session is now poisoned.
    SessionPoisoned,
    /// A generation is running; the request cannot start a turn yet.
    Busy,
    /// Socket-level failure while answering.
    Io(std::io::Error),
}

impl DnsError {
    fn rcode(&self) -> ResponseCode {
        match self {
            DnsError::OutsideZone(_) => ResponseCode::Refused,
            DnsError::BadName(_) => ResponseCode::NXDomain,
            DnsError::InvalidOpCode(_)
            | DnsError::InvalidMessageType(_)
            | DnsError::SessionPoisoned
            | DnsError::Busy
            | DnsError::Io(_) => ResponseCode::ServFail,
        }
    }
}

impl std::fmt::Display for DnsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DnsError::InvalidOpCode(code) => write!(f, "unsupported opcode: {:?}", code),
            DnsError::InvalidMessageType(kind) => write!(f, "unsupported message type: {:?}", kind),
            DnsError::OutsideZone(name) => write!(f, "name outside tunnel zone: {}", name),
            DnsError::BadName(err) => write!(f, "malformed command: {}", err),
            DnsError::SessionPoisoned => write!(f, "conflicting chunk delivery"),
            DnsError::Busy => write!(f, "session already generating"),
            DnsError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl From<std::io::Error> for DnsError {
    fn from(err: std::io::Error) -> Self {
        DnsError::Io(err)
    }
}

impl From<NameError> for DnsError {
    fn from(err: NameError) -> Self {
        DnsError::BadName(err)
    }
}

/// Request handler bound to one zone suffix.
pub struct TunnelHandler {
    zone: LowerName,
    suffix: String,
    ctx: Arc<ServerContext>,
}

impl TunnelHandler {
    pub fn new(ctx: Arc<ServerContext>, suffix: &str) -> Result<Self, AppError> {
        let name = Name::from_str(suffix)
            .map_err(|_| AppError::config(format!("invalid zone suffix: {}", suffix)))?;
        Ok(TunnelHandler {
            zone: LowerName::from(name),
            suffix: suffix.to_ascii_lowercase(),
            ctx,
        })
    }

    /// Extract and parse the command labels left of the suffix.
    fn parse_command(&self, name: &LowerName) -> Result<Command, DnsError> {
        let qname = name.to_string();
        let qname = qname.strip_suffix('.').unwrap_or(&qname);
        let prefix = qname
            .strip_suffix(self.suffix.as_str())
            .and_then(|p| p.strip_suffix('.'))
            .ok_or(DnsError::BadName(NameError::Empty))?;
        let labels: Vec<&str> = prefix.split('.').collect();
        Ok(Command::parse(&labels)?)
    }

    /// Execute one command against the session store and produce the
    /// answer rdata.
    async fn dispatch(&self, command: Command, qtype: RecordType) -> Result<RData, DnsError> {
        let store = &self.ctx.store;
        match command {
            Command::Tst => Ok(txt(PROBE_REPLY)),
            Command::Cnt { sid } => {
                let (produced, phase) = store.status(&sid).await;
                Ok(txt(&format_status(produced, phase)))
            }
            Command::Get { sid, idx } => match store.read_outbound(&sid, idx).await {
                ReadOutcome::Chunk(chunk) => Ok(txt(&chunk)),
                ReadOutcome::NotYet => Ok(txt("")),
                ReadOutcome::PastEnd => Ok(txt(PAST_END_REPLY)),
            },
            Command::Clr { sid } => {
                log::info!("session {}: cleared by wire command", sid);
                store.clear(&sid).await;
                Ok(ack(qtype))
            }
            Command::Msg {
                sid,
                idx,
                total,
                payload,
            } => match store.record_inbound(&sid, idx, total, payload).await {
                InboundOutcome::Pending => Ok(ack(qtype)),
                InboundOutcome::Complete(envelope) => {
                    if let Some(cancel) = store.begin_generation(&sid).await {
                        log::debug!("session {}: request complete, generation starting", sid);
                        orchestrator::spawn(Arc::clone(&self.ctx), sid, envelope, cancel);
                    }
                    Ok(ack(qtype))
                }
                InboundOutcome::Conflict => Err(DnsError::SessionPoisoned),
                InboundOutcome::Busy => Err(DnsError::Busy),
            },
        }
    }

    async fn process<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handler: &mut R,
    ) -> Result<ResponseInfo, DnsError> {
        if request.op_code() != OpCode::Query {
            return Err(DnsError::InvalidOpCode(request.op_code()));
        }
        if request.message_type() != MessageType::Query {
            return Err(DnsError::InvalidMessageType(request.message_type()));
        }

        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        let mut records: Vec<Record> = Vec::new();

        for query in request.queries() {
            let name = query.name();
            if !self.zone.zone_of(name) {
                log::warn!("refusing query for foreign zone: {}", name);
                return Err(DnsError::OutsideZone(name.clone()));
            }
            let command = self.parse_command(name)?;
            let rdata = self.dispatch(command, query.query_type()).await?;
            records.push(Record::from_rdata(name.into(), 0, rdata));
        }

        let response = MessageResponseBuilder::from_message_request(request).build(
            header,
            records.iter(),
            &[],
            &[],
            &[],
        );
        Ok(response_handler.send_response(response).await?)
    }
}

#[async_trait]
impl RequestHandler for TunnelHandler {
    /// Entry point invoked by hickory for each incoming request; maps
    /// processing failures to an error response with the right code.
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response: R,
    ) -> ResponseInfo
    where
        R: ResponseHandler + Send,
    {
        match self.process(request, &mut response).await {
            Ok(info) => info,
            Err(error) => {
                let code = error.rcode();
                log::warn!("query from {} failed: {}", request.src(), error);
                let builder = MessageResponseBuilder::from_message_request(request);
                match response
                    .send_response(builder.error_msg(request.header(), code))
                    .await
                {
                    Ok(info) => info,
                    Err(err) => {
                        log::error!("failed to send error response: {}", err);
                        let mut header = Header::new();
                        header.set_response_code(ResponseCode::ServFail);
                        header.into()
                    }
                }
            }
        }
    }
}

fn txt(value: &str) -> RData {
    RData::TXT(TXT::new(vec![value.to_string()]))
}

/// ACK for `msg`/`clr`: a synthetic A record when the client asked for
/// one, a short TXT otherwise.
fn ack(qtype: RecordType) -> RData {
    if qtype == RecordType::A {
        RData::A(A::new(0, 0, 0, 0))
    } else {
        RData::TXT(TXT::new(vec![ACK_REPLY.to_string()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::server::config::LlmConfig;
    use crate::server::llm::LlmClient;
    use crate::server::session::SessionStore;

    fn handler() -> TunnelHandler {
        let llm = LlmClient::new(&LlmConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: "test".to_string(),
            model: "test".to_string(),
            system_prompt: None,
        })
        .unwrap();
        let ctx = Arc::new(ServerContext {
            store: Arc::new(SessionStore::new(Duration::from_secs(60))),
            key: warren_wire::cipher::Key::generate(),
            llm,
            search: None,
            system_prompt: None,
        });
        TunnelHandler::new(ctx, "llm.example.com").unwrap()
    }

    fn lower(name: &str) -> LowerName {
        LowerName::from(Name::from_str(name).unwrap())
    }

    #[test]
    fn command_parsing_strips_zone() {
        let handler = handler();
        assert_eq!(
            handler
                .parse_command(&lower("tst.llm.example.com."))
                .unwrap(),
            Command::Tst
        );
        assert_eq!(
            handler
                .parse_command(&lower("cnt.ab12.llm.example.com."))
                .unwrap(),
            Command::Cnt {
                sid: "ab12".to_string()
            }
        );
    }

    #[test]
    fn bare_zone_is_malformed() {
        let handler = handler();
        assert!(matches!(
            handler.parse_command(&lower("llm.example.com.")),
            Err(DnsError::BadName(_))
        ));
    }

    #[test]
    fn case_insensitive_names_parse() {
        let handler = handler();
        // LowerName folds case before we ever see the labels.
        assert_eq!(
            handler
                .parse_command(&lower("TST.LLM.EXAMPLE.COM."))
                .unwrap(),
            Command::Tst
        );
    }

    #[tokio::test]
    async fn probe_answers_pong() {
        let handler = handler();
        assert_eq!(
            handler.dispatch(Command::Tst, RecordType::TXT).await.unwrap(),
            txt(PROBE_REPLY)
        );
    }

    #[tokio::test]
    async fn fresh_session_counts_zero_generating() {
        let handler = handler();
        let rdata = handler
            .dispatch(
                Command::Cnt {
                    sid: "aa".to_string(),
                },
                RecordType::TXT,
            )
            .await
            .unwrap();
        assert_eq!(rdata, txt("0,g"));
    }

    #[tokio::test]
    async fn msg_ack_matches_query_type() {
        let handler = handler();
        let payload = b"x".to_vec();
        let cmd = |idx| Command::Msg {
            sid: "aa".to_string(),
            idx,
            total: 3,
            payload: payload.clone(),
        };
        assert_eq!(
            handler.dispatch(cmd(0), RecordType::A).await.unwrap(),
            RData::A(A::new(0, 0, 0, 0))
        );
        assert_eq!(
            handler.dispatch(cmd(1), RecordType::TXT).await.unwrap(),
            txt(ACK_REPLY)
        );
    }

    #[tokio::test]
    async fn unfilled_get_is_empty_txt() {
        let handler = handler();
        let rdata = handler
            .dispatch(
                Command::Get {
                    sid: "aa".to_string(),
                    idx: 0,
                },
                RecordType::TXT,
            )
            .await
            .unwrap();
        assert_eq!(rdata, txt(""));
    }

    #[tokio::test]
    async fn conflicting_chunk_is_servfail() {
        let handler = handler();
        let msg = |payload: &[u8]| Command::Msg {
            sid: "aa".to_string(),
            idx: 0,
            total: 2,
            payload: payload.to_vec(),
        };
        handler
            .dispatch(msg(b"one"), RecordType::TXT)
            .await
            .unwrap();
        let err = handler
            .dispatch(msg(b"two"), RecordType::TXT)
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::SessionPoisoned));
        assert_eq!(err.rcode(), ResponseCode::ServFail);
    }

    #[tokio::test]
    async fn clear_acks_and_resets() {
        let handler = handler();
        handler
            .dispatch(
                Command::Msg {
                    sid: "aa".to_string(),
                    idx: 0,
                    total: 2,
                    payload: b"half".to_vec(),
                },
                RecordType::TXT,
            )
            .await
            .unwrap();
        assert_eq!(
            handler
                .dispatch(
                    Command::Clr {
                        sid: "aa".to_string()
                    },
                    RecordType::A
                )
                .await
                .unwrap(),
            RData::A(A::new(0, 0, 0, 0))
        );
    }

    #[test]
    fn rcode_mapping() {
        assert_eq!(
            DnsError::OutsideZone(lower("other.com.")).rcode(),
            ResponseCode::Refused
        );
        assert_eq!(
            DnsError::BadName(NameError::Empty).rcode(),
            ResponseCode::NXDomain
        );
        assert_eq!(DnsError::Busy.rcode(), ResponseCode::ServFail);
    }
}
