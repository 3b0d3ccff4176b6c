// In-process transport: commands are queued instead of hitting a radio.
// A `DevicePair` shuttles the queued traffic between two cores, which is
// enough to run the whole invitation and sync protocol on one machine.

use super::{InvitationResponder, LinkEvent, LinkState, Transport, TransportError};
use crate::Tincan;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// One recorded transport command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Invitation {
        to: String,
        context: Vec<u8>,
        timeout_secs: u32,
    },
    Reliable {
        to: Vec<String>,
        payload: Vec<u8>,
    },
    StartAdvertising,
    StopAdvertising,
    StartBrowsing,
    StopBrowsing,
    DisconnectAll,
}

/// Transport that records every command and never fails.
#[derive(Default)]
pub struct LoopbackTransport {
    queue: Mutex<VecDeque<Outbound>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything queued so far, in issue order.
    pub fn drain(&self) -> Vec<Outbound> {
        self.queue.lock().drain(..).collect()
    }

    fn push(&self, command: Outbound) {
        self.queue.lock().push_back(command);
    }
}

impl Transport for LoopbackTransport {
    fn send_invitation(
        &self,
        device_id: &str,
        context: Vec<u8>,
        timeout_secs: u32,
    ) -> Result<(), TransportError> {
        self.push(Outbound::Invitation {
            to: device_id.to_string(),
            context,
            timeout_secs,
        });
        Ok(())
    }

    fn send_reliable(&self, device_ids: &[String], payload: Vec<u8>) -> Result<(), TransportError> {
        self.push(Outbound::Reliable {
            to: device_ids.to_vec(),
            payload,
        });
        Ok(())
    }

    fn start_advertising(&self) -> Result<(), TransportError> {
        self.push(Outbound::StartAdvertising);
        Ok(())
    }

    fn stop_advertising(&self) -> Result<(), TransportError> {
        self.push(Outbound::StopAdvertising);
        Ok(())
    }

    fn start_browsing(&self) -> Result<(), TransportError> {
        self.push(Outbound::StartBrowsing);
        Ok(())
    }

    fn stop_browsing(&self) -> Result<(), TransportError> {
        self.push(Outbound::StopBrowsing);
        Ok(())
    }

    fn disconnect_all(&self) {
        self.push(Outbound::DisconnectAll);
    }
}

/// Shared accept/decline slot for an in-flight loopback invitation.
type DecisionSlot = Arc<Mutex<Option<bool>>>;

struct PendingLink {
    inviter: usize,
    invitee: usize,
    slot: DecisionSlot,
    settled: bool,
}

/// Two cores wired back to back. Events queued by either side are delivered
/// to the other when `pump` runs, so tests control interleaving exactly.
pub struct DevicePair {
    cores: [Tincan; 2],
    transports: [Arc<LoopbackTransport>; 2],
    device_ids: [String; 2],
    pending_links: Vec<PendingLink>,
}

impl DevicePair {
    pub const A: usize = 0;
    pub const B: usize = 1;

    /// Two fresh in-memory cores.
    pub fn new(name_a: &str, name_b: &str) -> Result<Self, crate::TincanError> {
        let ta = Arc::new(LoopbackTransport::new());
        let tb = Arc::new(LoopbackTransport::new());
        let a = Tincan::new(ta.clone(), name_a)?;
        let b = Tincan::new(tb.clone(), name_b)?;
        Ok(Self::wire(a, ta, b, tb))
    }

    /// Wire up cores built elsewhere (e.g. reopened from disk).
    pub fn wire(
        a: Tincan,
        ta: Arc<LoopbackTransport>,
        b: Tincan,
        tb: Arc<LoopbackTransport>,
    ) -> Self {
        let device_ids = [
            a.identity_info().device_id,
            b.identity_info().device_id,
        ];
        Self {
            cores: [a, b],
            transports: [ta, tb],
            device_ids,
            pending_links: Vec::new(),
        }
    }

    pub fn core(&self, side: usize) -> &Tincan {
        &self.cores[side]
    }

    pub fn device_id(&self, side: usize) -> &str {
        &self.device_ids[side]
    }

    /// Deliver mutual discovery, as browsing would.
    pub fn introduce(&self) {
        for side in [Self::A, Self::B] {
            let other = 1 - side;
            self.cores[side].handle_event(LinkEvent::PeerFound {
                device_id: self.device_ids[other].clone(),
                display_name: self.cores[other].identity_info().display_name,
                info: self.cores[other].advertised_info(),
            });
        }
    }

    /// Shuttle queued traffic until both sides go quiet. Returns the number
    /// of events delivered.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        // Each round can queue more work on the other side; the protocol has
        // no unbounded loops, so a generous cap catches only harness bugs.
        for _ in 0..64 {
            let before = delivered;
            delivered += self.settle_links();
            for side in [Self::A, Self::B] {
                delivered += self.deliver_from(side);
            }
            delivered += self.settle_links();
            if delivered == before {
                break;
            }
        }
        delivered
    }

    fn deliver_from(&mut self, side: usize) -> usize {
        let other = 1 - side;
        let mut delivered = 0;
        for command in self.transports[side].drain() {
            match command {
                Outbound::Invitation { to, context, .. } => {
                    if to != self.device_ids[other] {
                        tracing::trace!(%to, "dropping invitation to unknown device");
                        continue;
                    }
                    let slot: DecisionSlot = Arc::new(Mutex::new(None));
                    let writer = slot.clone();
                    self.cores[other].handle_event(LinkEvent::Invitation {
                        device_id: self.device_ids[side].clone(),
                        context,
                        responder: InvitationResponder::new(move |accept| {
                            *writer.lock() = Some(accept);
                        }),
                    });
                    self.pending_links.push(PendingLink {
                        inviter: side,
                        invitee: other,
                        slot,
                        settled: false,
                    });
                    delivered += 1;
                }
                Outbound::Reliable { to, payload } => {
                    for target in to {
                        if target == self.device_ids[other] {
                            self.cores[other].handle_event(LinkEvent::Data {
                                device_id: self.device_ids[side].clone(),
                                payload: payload.clone(),
                            });
                            delivered += 1;
                        } else {
                            tracing::trace!(%target, "dropping payload to unknown device");
                        }
                    }
                }
                Outbound::DisconnectAll => {
                    self.cores[other].handle_event(LinkEvent::ConnectionChanged {
                        device_id: self.device_ids[side].clone(),
                        state: LinkState::NotConnected,
                    });
                    delivered += 1;
                }
                // Session commands have no cross-device effect here
                Outbound::StartAdvertising
                | Outbound::StopAdvertising
                | Outbound::StartBrowsing
                | Outbound::StopBrowsing => {}
            }
        }
        delivered
    }

    /// Turn settled invitation decisions into connection-state events.
    fn settle_links(&mut self) -> usize {
        let mut delivered = 0;
        for link in &mut self.pending_links {
            if link.settled {
                continue;
            }
            let decision = *link.slot.lock();
            let Some(accept) = decision else { continue };
            link.settled = true;
            if accept {
                for (side, other) in [(link.inviter, link.invitee), (link.invitee, link.inviter)] {
                    self.cores[side].handle_event(LinkEvent::ConnectionChanged {
                        device_id: self.device_ids[other].clone(),
                        state: LinkState::Connected,
                    });
                    delivered += 1;
                }
            } else {
                self.cores[link.inviter].handle_event(LinkEvent::ConnectionChanged {
                    device_id: self.device_ids[link.invitee].clone(),
                    state: LinkState::NotConnected,
                });
                delivered += 1;
            }
        }
        self.pending_links.retain(|l| !l.settled);
        delivered
    }
}
