use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use log::{debug, trace};
use mwfd_core::lp::{LpPacket, NetPacket};
use mwfd_core::packets::Interest;

use crate::dispatch::Dispatcher;
use crate::face::{
    Face, FaceCounters, FaceId, FacePersistency, FaceScope, FaceSendError, FaceState, FaceTable,
    LinkType, StateCell, StateObserver, UnsolicitedDataPolicy,
};

const INTERNAL_QUEUE_CAPACITY: usize = 1024;

/// Forwarder-side half of the in-process link: a local point-to-point face
/// whose sends land in the peer's receive ring.
pub struct InternalFace {
    id: FaceId,
    state: StateCell,
    counters: FaceCounters,
    to_peer: Arc<ArrayQueue<LpPacket>>,
}

impl Face for InternalFace {
    fn id(&self) -> FaceId {
        self.id
    }

    fn scope(&self) -> FaceScope {
        FaceScope::Local
    }

    fn link_type(&self) -> LinkType {
        LinkType::PointToPoint
    }

    fn persistency(&self) -> FacePersistency {
        FacePersistency::Permanent
    }

    fn state(&self) -> FaceState {
        self.state.get()
    }

    fn unsolicited_data_policy(&self) -> UnsolicitedDataPolicy {
        UnsolicitedDataPolicy::AdmitLocal
    }

    fn send(&self, packet: LpPacket) -> Result<(), FaceSendError> {
        match self.state.get() {
            FaceState::Up => {}
            FaceState::Down => return Err(FaceSendError::Down),
            FaceState::Closed => return Err(FaceSendError::Closed),
        }
        self.to_peer
            .push(packet)
            .map_err(|_| FaceSendError::QueueFull)
    }

    fn counters(&self) -> &FaceCounters {
        &self.counters
    }

    fn subscribe_state(&self, observer: StateObserver) {
        self.state.subscribe(observer);
    }

    fn close(&self) {
        self.state.set(FaceState::Closed);
    }
}

/// Client-side half: pops what the forwarder sent and watches the face
/// state to notice teardown.
pub struct InternalPeer {
    face_id: FaceId,
    rx: Arc<ArrayQueue<LpPacket>>,
    connected: Arc<AtomicBool>,
}

impl InternalPeer {
    pub fn face_id(&self) -> FaceId {
        self.face_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Next packet the forwarder sent us, if any.
    pub fn receive(&self) -> Option<NetPacket> {
        loop {
            let lp = self.rx.pop()?;
            match lp.parse() {
                Ok(packet) => return Some(packet),
                Err(err) => {
                    debug!("internal peer: unparseable packet: {err}");
                }
            }
        }
    }

    pub fn receive_raw(&self) -> Option<LpPacket> {
        self.rx.pop()
    }
}

/// Create the in-process face pair and register the face.
pub fn internal_pair(faces: &FaceTable) -> (Arc<InternalFace>, InternalPeer) {
    let id = faces.allocate_id();
    let queue = Arc::new(ArrayQueue::new(INTERNAL_QUEUE_CAPACITY));
    let face = Arc::new(InternalFace {
        id,
        state: StateCell::new(id),
        counters: FaceCounters::default(),
        to_peer: queue.clone(),
    });
    faces.add(face.clone());

    let connected = Arc::new(AtomicBool::new(true));
    {
        let connected = connected.clone();
        face.subscribe_state(Box::new(move |face_id, _old, new| {
            if new != FaceState::Up {
                debug!("internal peer: face {face_id} went {new:?}, disconnecting");
                connected.store(false, Ordering::Release);
            }
        }));
    }

    let peer = InternalPeer {
        face_id: id,
        rx: queue,
        connected,
    };
    (face, peer)
}

/// The management client embedded in the process: sends through the worker
/// dispatch and receives from its peer ring.
pub struct InternalClient {
    peer: InternalPeer,
    dispatcher: Dispatcher,
}

impl InternalClient {
    pub fn attach(peer: InternalPeer, dispatcher: Dispatcher) -> Self {
        Self { peer, dispatcher }
    }

    pub fn face_id(&self) -> FaceId {
        self.peer.face_id()
    }

    pub fn is_connected(&self) -> bool {
        self.peer.is_connected()
    }

    /// Inject a packet into the forwarder as if it arrived on the internal
    /// face.
    pub fn send_packet(&self, packet: NetPacket) -> bool {
        if !self.is_connected() {
            return false;
        }
        trace!("internal client: sending {}", packet.name());
        self.dispatcher.dispatch_packet(self.peer.face_id(), packet)
    }

    /// Send an Interest, assigning a nonce when the caller set none.
    pub fn express_interest(&self, mut interest: Interest) -> bool {
        if interest.nonce.is_none() {
            interest.nonce = Some(rand::random());
        }
        self.send_packet(NetPacket::Interest(interest))
    }

    pub fn receive(&self) -> Option<NetPacket> {
        self.peer.receive()
    }
}
