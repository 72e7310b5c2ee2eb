use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info};
use mwfd_core::lp::LpPacket;
use mwfd_core::name::Name;

pub type FaceId = u32;

/// Face id 0 is reserved as "no face".
pub const INVALID_FACE_ID: FaceId = 0;

/// Name prefix that must never leave the local host.
pub fn localhost_prefix() -> Name {
    Name::from_uri("/localhost").unwrap()
}

/// Name prefix that may travel at most one hop.
pub fn localhop_prefix() -> Name {
    Name::from_uri("/localhop").unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceScope {
    NonLocal,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    PointToPoint,
    MultiAccess,
    AdHoc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacePersistency {
    OnDemand,
    Persistent,
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FaceState {
    Up = 0,
    Down = 1,
    Closed = 2,
}

impl FaceState {
    fn from_u8(value: u8) -> FaceState {
        match value {
            0 => FaceState::Up,
            1 => FaceState::Down,
            _ => FaceState::Closed,
        }
    }
}

/// What to do with Data that matched no PIT entry on this face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsolicitedDataPolicy {
    DropAll,
    AdmitLocal,
    AdmitNetwork,
    AdmitAll,
}

impl UnsolicitedDataPolicy {
    pub fn admits(&self, scope: FaceScope) -> bool {
        match self {
            UnsolicitedDataPolicy::DropAll => false,
            UnsolicitedDataPolicy::AdmitLocal => scope == FaceScope::Local,
            UnsolicitedDataPolicy::AdmitNetwork => scope == FaceScope::NonLocal,
            UnsolicitedDataPolicy::AdmitAll => true,
        }
    }
}

/// Errors from `Face::send`
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FaceSendError {
    #[error("face is down")]
    Down,
    #[error("face is closed")]
    Closed,
    #[error("send queue full")]
    QueueFull,
}

/// Per-face packet counters
#[derive(Debug, Default)]
pub struct FaceCounters {
    pub n_in_packets: AtomicU64,
    pub n_out_packets: AtomicU64,
    pub n_dropped: AtomicU64,
    pub n_parse_errors: AtomicU64,
}

impl FaceCounters {
    pub fn record_in(&self) {
        self.n_in_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_out(&self) {
        self.n_out_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.n_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.n_parse_errors.fetch_add(1, Ordering::Relaxed);
    }
}

pub type StateObserver = Box<dyn Fn(FaceId, FaceState, FaceState) + Send + Sync>;

/// Face state with an explicit observer list for state-change notification.
///
/// Face implementations embed one of these; observers run on the thread that
/// performed the transition.
pub struct StateCell {
    face_id: FaceId,
    state: AtomicU8,
    observers: Mutex<Vec<StateObserver>>,
}

impl StateCell {
    pub fn new(face_id: FaceId) -> Self {
        Self {
            face_id,
            state: AtomicU8::new(FaceState::Up as u8),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self) -> FaceState {
        FaceState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transition to `new`, notifying observers when the state changed.
    /// A closed face never reopens.
    pub fn set(&self, new: FaceState) {
        let old = FaceState::from_u8(self.state.swap(new as u8, Ordering::AcqRel));
        if old == new {
            return;
        }
        if old == FaceState::Closed {
            self.state.store(FaceState::Closed as u8, Ordering::Release);
            return;
        }
        debug!("face {}: {:?} -> {:?}", self.face_id, old, new);
        for observer in self.observers.lock().unwrap().iter() {
            observer(self.face_id, old, new);
        }
    }

    pub fn subscribe(&self, observer: StateObserver) {
        self.observers.lock().unwrap().push(observer);
    }
}

impl std::fmt::Debug for StateCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCell")
            .field("face_id", &self.face_id)
            .field("state", &self.get())
            .finish()
    }
}

/// A bidirectional packet endpoint.
///
/// `send` must not block: implementations enqueue or fail. Receiving is
/// handled outside the trait: the I/O path owning the face feeds packets
/// into the worker dispatch.
pub trait Face: Send + Sync {
    fn id(&self) -> FaceId;
    fn scope(&self) -> FaceScope;
    fn link_type(&self) -> LinkType;
    fn persistency(&self) -> FacePersistency;
    fn mtu(&self) -> Option<usize> {
        None
    }
    fn state(&self) -> FaceState;
    fn unsolicited_data_policy(&self) -> UnsolicitedDataPolicy {
        UnsolicitedDataPolicy::DropAll
    }
    fn send(&self, packet: LpPacket) -> Result<(), FaceSendError>;
    fn counters(&self) -> &FaceCounters;
    fn subscribe_state(&self, observer: StateObserver);
    /// Close the face, transitioning it to `Closed`.
    fn close(&self);
}

/// Registry of live faces, shared between the I/O side and the workers.
pub struct FaceTable {
    faces: RwLock<HashMap<FaceId, Arc<dyn Face>>>,
    next_id: AtomicU32,
}

impl FaceTable {
    pub fn new() -> Self {
        Self {
            faces: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Reserve the next face id for a face about to be constructed.
    pub fn allocate_id(&self) -> FaceId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add(&self, face: Arc<dyn Face>) {
        let id = face.id();
        self.faces.write().unwrap().insert(id, face);
        info!("face {id} added");
    }

    pub fn get(&self, id: FaceId) -> Option<Arc<dyn Face>> {
        self.faces.read().unwrap().get(&id).cloned()
    }

    pub fn remove(&self, id: FaceId) -> Option<Arc<dyn Face>> {
        let removed = self.faces.write().unwrap().remove(&id);
        if removed.is_some() {
            info!("face {id} removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.faces.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self) -> Vec<Arc<dyn Face>> {
        self.faces.read().unwrap().values().cloned().collect()
    }
}

impl Default for FaceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct NullFace {
        id: FaceId,
        state: StateCell,
        counters: FaceCounters,
    }

    impl NullFace {
        fn new(id: FaceId) -> Self {
            Self {
                id,
                state: StateCell::new(id),
                counters: FaceCounters::default(),
            }
        }
    }

    impl Face for NullFace {
        fn id(&self) -> FaceId {
            self.id
        }
        fn scope(&self) -> FaceScope {
            FaceScope::NonLocal
        }
        fn link_type(&self) -> LinkType {
            LinkType::PointToPoint
        }
        fn persistency(&self) -> FacePersistency {
            FacePersistency::Persistent
        }
        fn state(&self) -> FaceState {
            self.state.get()
        }
        fn send(&self, _packet: LpPacket) -> Result<(), FaceSendError> {
            Ok(())
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

    #[test]
    fn test_face_table_lifecycle() {
        let table = FaceTable::new();
        let id = table.allocate_id();
        assert_ne!(id, INVALID_FACE_ID);
        table.add(Arc::new(NullFace::new(id)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(id).unwrap().id(), id);
        assert!(table.remove(id).is_some());
        assert!(table.get(id).is_none());
    }

    #[test]
    fn test_state_observers_fire_once_per_transition() {
        let face = NullFace::new(9);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        face.subscribe_state(Box::new(move |id, old, new| {
            assert_eq!(id, 9);
            assert_eq!(old, FaceState::Up);
            assert_eq!(new, FaceState::Down);
            fired2.fetch_add(1, Ordering::SeqCst);
        }));
        face.state.set(FaceState::Down);
        face.state.set(FaceState::Down);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closed_is_terminal() {
        let face = NullFace::new(3);
        face.close();
        face.state.set(FaceState::Up);
        assert_eq!(face.state(), FaceState::Closed);
    }

    #[test]
    fn test_unsolicited_policy() {
        assert!(!UnsolicitedDataPolicy::DropAll.admits(FaceScope::Local));
        assert!(UnsolicitedDataPolicy::AdmitLocal.admits(FaceScope::Local));
        assert!(!UnsolicitedDataPolicy::AdmitLocal.admits(FaceScope::NonLocal));
        assert!(UnsolicitedDataPolicy::AdmitNetwork.admits(FaceScope::NonLocal));
        assert!(UnsolicitedDataPolicy::AdmitAll.admits(FaceScope::Local));
    }
}
