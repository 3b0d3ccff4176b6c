// Transport boundary — the seam to the platform networking service
//
// Discovery, invitation exchange, reliable delivery and encryption all live
// behind this trait. The core only issues commands and consumes LinkEvents;
// it never blocks on transport I/O, and results come back as further events.

pub mod local;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("advertising failed: {0}")]
    Advertise(String),
    #[error("browsing failed: {0}")]
    Browse(String),
    #[error("send failed: {0}")]
    Send(String),
}

/// Connection state as the transport reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Connecting,
    Connected,
    NotConnected,
}

/// Outbound commands the core issues to the platform service.
///
/// All calls are fire-and-forget; failures surface either as an immediate
/// `TransportError` (advertise/browse/send setup) or as a later
/// `LinkEvent::ConnectionChanged`.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    fn send_invitation(
        &self,
        device_id: &str,
        context: Vec<u8>,
        timeout_secs: u32,
    ) -> Result<(), TransportError>;
    fn send_reliable(&self, device_ids: &[String], payload: Vec<u8>) -> Result<(), TransportError>;
    fn start_advertising(&self) -> Result<(), TransportError>;
    fn stop_advertising(&self) -> Result<(), TransportError>;
    fn start_browsing(&self) -> Result<(), TransportError>;
    fn stop_browsing(&self) -> Result<(), TransportError>;
    fn disconnect_all(&self);
}

/// Accept/decline handle for one inbound invitation.
///
/// Consuming `respond` moves the handle, so the underlying callback fires at
/// most once by construction.
pub struct InvitationResponder {
    callback: Box<dyn FnOnce(bool) + Send + Sync>,
}

impl InvitationResponder {
    pub fn new(callback: impl FnOnce(bool) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    pub fn respond(self, accept: bool) {
        (self.callback)(accept);
    }
}

impl fmt::Debug for InvitationResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InvitationResponder")
    }
}

/// Events the transport delivers to the core.
///
/// Within one peer's stream, connection-state transitions arrive in order;
/// across peers nothing is assumed.
#[derive(Debug)]
pub enum LinkEvent {
    PeerFound {
        device_id: String,
        display_name: String,
        info: HashMap<String, String>,
    },
    PeerLost {
        device_id: String,
    },
    ConnectionChanged {
        device_id: String,
        state: LinkState,
    },
    Invitation {
        device_id: String,
        context: Vec<u8>,
        responder: InvitationResponder,
    },
    Data {
        device_id: String,
        payload: Vec<u8>,
    },
}

/// Identity context carried inside an invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteContext {
    pub device_id: String,
    pub display_name: String,
    pub user_id: Uuid,
}

impl InviteContext {
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    /// Context bytes are opaque to the transport; a peer running other
    /// software may send anything, so decode failure is expected.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_responder_fires_once_by_move() {
        let count = Arc::new(AtomicU32::new(0));
        let counted = count.clone();
        let responder = InvitationResponder::new(move |accept| {
            assert!(accept);
            counted.fetch_add(1, Ordering::SeqCst);
        });

        responder.respond(true);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        // respond(self) consumed the handle; a second call cannot compile
    }

    #[test]
    fn test_invite_context_roundtrip() {
        let ctx = InviteContext {
            device_id: "dev-1".into(),
            display_name: "Alice".into(),
            user_id: Uuid::new_v4(),
        };
        let decoded = InviteContext::decode(&ctx.encode()).unwrap();
        assert_eq!(decoded, ctx);
    }

    #[test]
    fn test_invite_context_garbage_is_none() {
        assert!(InviteContext::decode(&[1, 2, 3]).is_none());
    }
}
