//! Structured SIP message model consumed by the transaction layer.
//!
//! Parsing and serialization of raw SIP text live outside this crate; the
//! transaction layer operates on already-parsed requests and responses. Only
//! the headers the transaction layer actually inspects are modeled: the Via
//! chain (branch correlation), Call-ID, CSeq, and the From/To addresses with
//! their tags.

use std::fmt;
use std::str::FromStr;

/// RFC 3261 magic cookie that prefixes every compliant branch parameter.
pub const MAGIC_COOKIE: &str = "z9hG4bK";

/// SIP request methods.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
    Info,
    Update,
    Subscribe,
    Notify,
    Message,
    /// Any method this crate has no dedicated variant for.
    Extension(String),
}

impl Method {
    /// Returns true for INVITE, the only method with the three-way handshake
    /// transaction variants.
    pub fn is_invite(&self) -> bool {
        matches!(self, Method::Invite)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Info => "INFO",
            Method::Update => "UPDATE",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Message => "MESSAGE",
            Method::Extension(name) => name,
        };
        f.write_str(s)
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "REGISTER" => Method::Register,
            "OPTIONS" => Method::Options,
            "INFO" => Method::Info,
            "UPDATE" => Method::Update,
            "SUBSCRIBE" => Method::Subscribe,
            "NOTIFY" => Method::Notify,
            "MESSAGE" => Method::Message,
            other => Method::Extension(other.to_string()),
        })
    }
}

/// SIP response status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const TRYING: StatusCode = StatusCode(100);
    pub const RINGING: StatusCode = StatusCode(180);
    pub const OK: StatusCode = StatusCode(200);
    pub const CALL_OR_TRANSACTION_DOES_NOT_EXIST: StatusCode = StatusCode(481);
    pub const LOOP_DETECTED: StatusCode = StatusCode(482);
    pub const REQUEST_TERMINATED: StatusCode = StatusCode(487);

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// 1xx class response.
    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.0)
    }

    /// 2xx class response.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// Any 2xx-6xx response.
    pub fn is_final(&self) -> bool {
        self.0 >= 200
    }

    /// Default reason phrase for the codes this layer synthesizes itself.
    pub fn default_reason(&self) -> &'static str {
        match self.0 {
            100 => "Trying",
            180 => "Ringing",
            200 => "OK",
            481 => "Call/Transaction Does Not Exist",
            482 => "Loop Detected",
            487 => "Request Terminated",
            _ => "",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single Via header entry. The top entry's branch parameter is the primary
/// transaction correlation token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Via {
    /// Transport token, e.g. "UDP" or "TCP".
    pub transport: String,
    /// The sent-by host[:port].
    pub sent_by: String,
    /// The branch parameter; pre-RFC 3261 peers may omit it.
    pub branch: Option<String>,
}

impl Via {
    pub fn new(transport: impl Into<String>, sent_by: impl Into<String>, branch: Option<String>) -> Self {
        Via {
            transport: transport.into(),
            sent_by: sent_by.into(),
            branch,
        }
    }
}

/// A From or To header: URI plus the optional tag parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub uri: String,
    pub tag: Option<String>,
}

impl Address {
    pub fn new(uri: impl Into<String>, tag: Option<String>) -> Self {
        Address {
            uri: uri.into(),
            tag,
        }
    }
}

/// CSeq header: sequence number plus the method of the originating request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(seq: u32, method: Method) -> Self {
        CSeq { seq, method }
    }
}

/// A structured SIP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub via: Vec<Via>,
    pub from: Address,
    pub to: Address,
    pub call_id: String,
    pub cseq: CSeq,
    pub body: Vec<u8>,
}

impl Request {
    /// The top-most Via entry, if any.
    pub fn top_via(&self) -> Option<&Via> {
        self.via.first()
    }

    /// The branch parameter of the top Via, if present.
    pub fn branch(&self) -> Option<&str> {
        self.top_via().and_then(|v| v.branch.as_deref())
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.to.tag.as_deref()
    }

    pub fn from_tag(&self) -> Option<&str> {
        self.from.tag.as_deref()
    }
}

/// A structured SIP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub reason: String,
    pub via: Vec<Via>,
    pub from: Address,
    pub to: Address,
    pub call_id: String,
    pub cseq: CSeq,
    pub body: Vec<u8>,
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn reason_phrase(&self) -> &str {
        &self.reason
    }

    /// The branch parameter of the top Via, if present.
    pub fn branch(&self) -> Option<&str> {
        self.via.first().and_then(|v| v.branch.as_deref())
    }
}

/// A request or a response, as delivered by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(r) => Some(r),
            Message::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Request(_) => None,
            Message::Response(r) => Some(r),
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}
