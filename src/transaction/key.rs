//! Transaction correlation keys.
//!
//! The primary key is the branch parameter of the top Via plus the request
//! method (RFC 3261 section 17.2.3). Messages from pre-RFC 3261 peers may
//! carry no branch, in which case a composite of Call-ID, CSeq number and the
//! From/To tags is used instead. A separate [`MergedRequestKey`] identifies
//! forked copies of the same logical request; it deliberately ignores the
//! branch, which differs per forked copy.

use std::fmt;

use crate::message::{Method, Request, Response};

/// Correlation key for registry lookups. Value-equal and hashable; client and
/// server transactions live in separate registries, so the key itself carries
/// no role.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransactionKey {
    /// RFC 3261 matching: branch parameter plus method.
    Branch { branch: String, method: Method },
    /// Fallback for branch-less legacy messages.
    Composite {
        call_id: String,
        cseq: u32,
        to_tag: Option<String>,
        from_tag: Option<String>,
    },
}

impl TransactionKey {
    /// Computes the key under which a server transaction for `request` is
    /// looked up. ACKs key to the INVITE transaction they acknowledge, per
    /// section 17.2.3.
    pub fn from_request(request: &Request) -> Self {
        let method = match request.method {
            Method::Ack => Method::Invite,
            ref m => m.clone(),
        };
        Self::for_method(request, method)
    }

    /// Computes the key of the INVITE transaction a CANCEL (or ACK) targets:
    /// same branch or composite, the method forced to INVITE.
    pub fn for_cancelled_invite(request: &Request) -> Self {
        Self::for_method(request, Method::Invite)
    }

    /// Computes the client-transaction key a response correlates to. The
    /// method comes from CSeq, since the response carries no request line.
    pub fn from_response(response: &Response) -> Self {
        match response.branch() {
            Some(branch) => TransactionKey::Branch {
                branch: branch.to_string(),
                method: response.cseq.method.clone(),
            },
            None => TransactionKey::Composite {
                call_id: response.call_id.clone(),
                cseq: response.cseq.seq,
                to_tag: response.to.tag.clone(),
                from_tag: response.from.tag.clone(),
            },
        }
    }

    fn for_method(request: &Request, method: Method) -> Self {
        match request.branch() {
            Some(branch) => TransactionKey::Branch {
                branch: branch.to_string(),
                method,
            },
            None => TransactionKey::Composite {
                call_id: request.call_id.clone(),
                cseq: request.cseq.seq,
                to_tag: request.to.tag.clone(),
                from_tag: request.from.tag.clone(),
            },
        }
    }

    /// The method this key correlates on, where one is present.
    pub fn method(&self) -> Option<&Method> {
        match self {
            TransactionKey::Branch { method, .. } => Some(method),
            TransactionKey::Composite { .. } => None,
        }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKey::Branch { branch, method } => write!(f, "{}:{}", branch, method),
            TransactionKey::Composite {
                call_id,
                cseq,
                to_tag,
                from_tag,
            } => write!(
                f,
                "{}:{}:{}:{}",
                call_id,
                cseq,
                to_tag.as_deref().unwrap_or("-"),
                from_tag.as_deref().unwrap_or("-")
            ),
        }
    }
}

/// Key for merged-request detection (RFC 3261 section 8.2.2.2): two requests
/// with the same Call-ID, CSeq number and From tag but no To tag are forked
/// copies of one logical request. The branch is intentionally excluded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergedRequestKey {
    pub call_id: String,
    pub cseq: u32,
    pub from_tag: Option<String>,
}

impl MergedRequestKey {
    pub fn from_request(request: &Request) -> Self {
        MergedRequestKey {
            call_id: request.call_id.clone(),
            cseq: request.cseq.seq,
            from_tag: request.from.tag.clone(),
        }
    }
}

impl fmt::Display for MergedRequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.call_id,
            self.cseq,
            self.from_tag.as_deref().unwrap_or("-")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Address, CSeq, Via};

    fn request(method: Method, branch: Option<&str>) -> Request {
        Request {
            method,
            uri: "sip:bob@example.com".to_string(),
            via: vec![Via::new(
                "UDP",
                "alice.example.com:5060",
                branch.map(str::to_string),
            )],
            from: Address::new("sip:alice@example.com", Some("f1".to_string())),
            to: Address::new("sip:bob@example.com", None),
            call_id: "call-1".to_string(),
            cseq: CSeq::new(7, Method::Invite),
            body: Vec::new(),
        }
    }

    #[test]
    fn same_branch_and_method_produce_equal_keys() {
        let a = TransactionKey::from_request(&request(Method::Invite, Some("z9hG4bK-1")));
        let b = TransactionKey::from_request(&request(Method::Invite, Some("z9hG4bK-1")));
        assert_eq!(a, b);

        let other = TransactionKey::from_request(&request(Method::Invite, Some("z9hG4bK-2")));
        assert_ne!(a, other);
    }

    #[test]
    fn branchless_messages_fall_back_to_composite() {
        let key = TransactionKey::from_request(&request(Method::Invite, None));
        match key {
            TransactionKey::Composite { call_id, cseq, .. } => {
                assert_eq!(call_id, "call-1");
                assert_eq!(cseq, 7);
            }
            TransactionKey::Branch { .. } => panic!("expected composite key"),
        }
    }

    #[test]
    fn ack_keys_to_the_invite_transaction() {
        let mut ack = request(Method::Ack, Some("z9hG4bK-1"));
        ack.cseq = CSeq::new(7, Method::Ack);
        let ack_key = TransactionKey::from_request(&ack);
        let invite_key = TransactionKey::from_request(&request(Method::Invite, Some("z9hG4bK-1")));
        assert_eq!(ack_key, invite_key);
    }

    #[test]
    fn cancel_derives_the_cancelled_invite_key() {
        let mut cancel = request(Method::Cancel, Some("z9hG4bK-1"));
        cancel.cseq = CSeq::new(7, Method::Cancel);

        let own = TransactionKey::from_request(&cancel);
        let target = TransactionKey::for_cancelled_invite(&cancel);
        assert_ne!(own, target);
        assert_eq!(target.method(), Some(&Method::Invite));
        assert_eq!(
            target,
            TransactionKey::from_request(&request(Method::Invite, Some("z9hG4bK-1")))
        );
    }

    #[test]
    fn response_key_uses_cseq_method() {
        let req = request(Method::Invite, Some("z9hG4bK-1"));
        let resp = crate::builders::response_for_request(crate::message::StatusCode::OK, &req);
        assert_eq!(
            TransactionKey::from_response(&resp),
            TransactionKey::from_request(&req)
        );
    }

    #[test]
    fn merged_key_ignores_the_branch() {
        let a = MergedRequestKey::from_request(&request(Method::Invite, Some("z9hG4bK-1")));
        let b = MergedRequestKey::from_request(&request(Method::Invite, Some("z9hG4bK-2")));
        assert_eq!(a, b);

        let mut other = request(Method::Invite, Some("z9hG4bK-1"));
        other.from.tag = Some("f2".to_string());
        assert_ne!(a, MergedRequestKey::from_request(&other));
    }
}
