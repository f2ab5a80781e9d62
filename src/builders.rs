//! Helpers that synthesize the requests and responses the transaction layer
//! generates itself: ACKs for non-2xx final responses, CANCELs for pending
//! INVITEs, and the error responses the stack sends without involving the TU
//! (482 Loop Detected, 481 Call/Transaction Does Not Exist).

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::message::{CSeq, Method, Request, Response, StatusCode, MAGIC_COOKIE};

/// Generates a fresh RFC 3261 branch parameter with the magic cookie prefix.
pub fn generate_branch() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("{}{}", MAGIC_COOKIE, suffix)
}

/// Builds a response to `request` following the RFC 3261 section 8.2.6 copy
/// rules: Via chain, From, To (including any tag already present), Call-ID and
/// CSeq are taken verbatim from the request.
pub fn response_for_request(status: StatusCode, request: &Request) -> Response {
    Response {
        status,
        reason: status.default_reason().to_string(),
        via: request.via.clone(),
        from: request.from.clone(),
        to: request.to.clone(),
        call_id: request.call_id.clone(),
        cseq: request.cseq.clone(),
        body: Vec::new(),
    }
}

/// Builds the ACK for a non-2xx final response, per RFC 3261 section 17.1.1.3:
/// same Request-URI, Call-ID, From and CSeq number as the original INVITE, the
/// CSeq method set to ACK, a single Via matching the INVITE's top Via (same
/// branch), and the To header taken from the response being acknowledged.
pub fn ack_for_non_2xx(invite: &Request, response: &Response) -> Request {
    Request {
        method: Method::Ack,
        uri: invite.uri.clone(),
        via: invite.top_via().cloned().into_iter().collect(),
        from: invite.from.clone(),
        to: response.to.clone(),
        call_id: invite.call_id.clone(),
        cseq: CSeq::new(invite.cseq.seq, Method::Ack),
        body: Vec::new(),
    }
}

/// Builds a CANCEL for a pending INVITE, per RFC 3261 section 9.1: identical
/// Request-URI, Call-ID, From, To and CSeq number, the method set to CANCEL,
/// and a single Via matching the INVITE's top Via so the CANCEL reaches the
/// same transaction context.
pub fn cancel_for_invite(invite: &Request) -> Request {
    Request {
        method: Method::Cancel,
        uri: invite.uri.clone(),
        via: invite.top_via().cloned().into_iter().collect(),
        from: invite.from.clone(),
        to: invite.to.clone(),
        call_id: invite.call_id.clone(),
        cseq: CSeq::new(invite.cseq.seq, Method::Cancel),
        body: Vec::new(),
    }
}
