use std::sync::Arc;
use std::time::Duration;

use mwfd_core::lp::{Nack, NackReason, NetPacket, PitToken};
use mwfd_core::name::Name;
use mwfd_core::packets::{Data, Interest};
use mwfd_fw::clock::Clock;
use mwfd_fw::dispatch::DispatchConfig;
use mwfd_fw::face::{Face, FaceTable};
use mwfd_fw::fw::forwarder::{WorkerCommand, WorkerContext};
use mwfd_fw::fw::multicast::MulticastStrategy;
use mwfd_fw::fw::strategy::StrategyRegistry;
use mwfd_fw::internal::{internal_pair, InternalFace, InternalPeer};
use mwfd_fw::tables::cs::CsConfig;
use mwfd_fw::tables::Tables;
use mwfd_fw::WorkerPool;

fn name(uri: &str) -> Name {
    Name::from_uri(uri).unwrap()
}

struct TestBed {
    faces: Arc<FaceTable>,
    clock: Clock,
    ctx: WorkerContext,
}

impl TestBed {
    fn new() -> Self {
        Self::with_cs(CsConfig::default())
    }

    fn with_cs(cs_config: CsConfig) -> Self {
        let faces = Arc::new(FaceTable::new());
        let registry = Arc::new(StrategyRegistry::with_builtins());
        let clock = Clock::manual();
        let ctx = WorkerContext::new(0, &cs_config, faces.clone(), registry, clock.clone());
        Self { faces, clock, ctx }
    }

    fn face(&self) -> (Arc<InternalFace>, InternalPeer) {
        internal_pair(&self.faces)
    }

    fn add_route(&mut self, prefix: &str, face: u32, cost: u32) {
        self.ctx.handle_command(WorkerCommand::FibAdd {
            name: name(prefix),
            face,
            cost,
            flags: 0,
        });
    }

    fn preload_cs(&mut self, data: Data) {
        let now = self.clock.now();
        let Tables { name_tree, cs, .. } = &mut self.ctx.tables;
        cs.insert(name_tree, data, now, false);
    }
}

fn expect_data(peer: &InternalPeer) -> Data {
    match peer.receive() {
        Some(NetPacket::Data(data)) => data,
        other => panic!("expected Data, got {other:?}"),
    }
}

fn expect_interest(peer: &InternalPeer) -> Interest {
    match peer.receive() {
        Some(NetPacket::Interest(interest)) => interest,
        other => panic!("expected Interest, got {other:?}"),
    }
}

fn expect_nack(peer: &InternalPeer) -> Nack {
    match peer.receive() {
        Some(NetPacket::Nack(nack)) => nack,
        other => panic!("expected Nack, got {other:?}"),
    }
}

#[test]
fn content_store_hit_answers_from_cache() {
    let mut bed = TestBed::new();
    let (face1, peer1) = bed.face();

    bed.preload_cs(Data::new(name("/a/b"), b"cached".to_vec()).with_freshness(Duration::from_secs(10)));
    bed.ctx.on_incoming_interest(
        face1.id(),
        Interest::new(name("/a/b")).with_nonce(1),
    );

    let data = expect_data(&peer1);
    assert_eq!(data.name, name("/a/b"));
    assert_eq!(data.content, b"cached");

    let counters = bed.ctx.counters().snapshot();
    assert_eq!(counters.n_cs_hits, 1);
    assert_eq!(counters.n_cs_misses, 0);

    // The hit entry is scheduled for immediate erasure.
    bed.ctx.process_timers();
    assert!(bed.ctx.tables.pit.is_empty());
}

#[test]
fn aggregation_forwards_once_and_fans_out() {
    let mut bed = TestBed::new();
    let (face1, peer1) = bed.face();
    let (face2, peer2) = bed.face();
    let (face3, peer3) = bed.face();
    bed.add_route("/x", face3.id(), 10);

    bed.ctx
        .on_incoming_interest(face1.id(), Interest::new(name("/x")).with_nonce(100));
    bed.ctx
        .on_incoming_interest(face2.id(), Interest::new(name("/x")).with_nonce(200));

    // Exactly one Interest went upstream, carrying the reverse-path token.
    let upstream = expect_interest(&peer3);
    assert_eq!(upstream.name, name("/x"));
    let token = upstream.pit_token.expect("token stamped");
    assert_eq!(token.worker_id, 0);
    assert!(peer3.receive().is_none());

    bed.ctx.on_incoming_data(
        face3.id(),
        Data::new(name("/x"), b"payload".to_vec()).with_freshness(Duration::from_secs(1)),
    );

    assert_eq!(expect_data(&peer1).name, name("/x"));
    assert_eq!(expect_data(&peer2).name, name("/x"));

    let counters = bed.ctx.counters().snapshot();
    assert_eq!(counters.n_satisfied_interests, 2);
    assert_eq!(counters.n_out_interests, 1);

    bed.ctx.process_timers();
    assert!(bed.ctx.tables.pit.is_empty());
}

#[test]
fn loop_detection_nacks_other_face_only() {
    let mut bed = TestBed::new();
    let (face1, peer1) = bed.face();
    let (face2, peer2) = bed.face();
    let (face3, peer3) = bed.face();
    bed.add_route("/y", face3.id(), 10);

    let interest = Interest::new(name("/y")).with_nonce(7);
    bed.ctx.on_incoming_interest(face1.id(), interest.clone());
    assert_eq!(expect_interest(&peer3).name, name("/y"));

    // Same nonce from the same face: a retransmission, quietly aggregated.
    bed.ctx.on_incoming_interest(face1.id(), interest.clone());
    assert!(peer1.receive().is_none());

    // Same nonce from another face: a loop.
    bed.ctx.on_incoming_interest(face2.id(), interest);
    let nack = expect_nack(&peer2);
    assert_eq!(nack.reason, NackReason::Duplicate);
    assert_eq!(nack.nonce(), Some(7));

    // No extra Interest went upstream.
    assert!(peer3.receive().is_none());
    assert_eq!(bed.ctx.counters().snapshot().n_out_interests, 1);
}

#[test]
fn expiry_erases_entry_and_later_data_is_unsolicited() {
    let mut bed = TestBed::new();
    let (face1, _peer1) = bed.face();
    let (face3, _peer3) = bed.face();
    bed.add_route("/z", face3.id(), 10);

    bed.ctx.on_incoming_interest(
        face1.id(),
        Interest::new(name("/z"))
            .with_nonce(5)
            .with_lifetime(Duration::from_millis(100)),
    );
    assert_eq!(bed.ctx.tables.pit.len(), 1);

    bed.clock.advance(Duration::from_millis(150));
    bed.ctx.process_timers();
    assert!(bed.ctx.tables.pit.is_empty());
    let counters = bed.ctx.counters().snapshot();
    assert_eq!(counters.n_unsatisfied_interests, 1);

    bed.ctx
        .on_incoming_data(face3.id(), Data::new(name("/z"), Vec::new()));
    assert_eq!(bed.ctx.counters().snapshot().n_unsolicited_data, 1);
    assert_eq!(bed.ctx.counters().snapshot().n_satisfied_interests, 0);
}

#[test]
fn nack_requires_matching_nonce() {
    let mut bed = TestBed::new();
    let (face1, peer1) = bed.face();
    let (face3, _peer3) = bed.face();
    bed.add_route("/n", face3.id(), 10);

    bed.ctx
        .on_incoming_interest(face1.id(), Interest::new(name("/n")).with_nonce(42));

    // A Nack with the wrong nonce is ignored.
    bed.ctx.on_incoming_nack(
        face3.id(),
        Nack::new(Interest::new(name("/n")).with_nonce(41), NackReason::NoRoute),
    );
    assert!(peer1.receive().is_none());

    // The matching Nack is the last pending upstream: it propagates.
    bed.ctx.on_incoming_nack(
        face3.id(),
        Nack::new(Interest::new(name("/n")).with_nonce(42), NackReason::NoRoute),
    );
    let nack = expect_nack(&peer1);
    assert_eq!(nack.reason, NackReason::NoRoute);
    assert_eq!(nack.nonce(), Some(42));
}

#[test]
fn no_route_nacks_downstream() {
    let mut bed = TestBed::new();
    let (face1, peer1) = bed.face();

    bed.ctx
        .on_incoming_interest(face1.id(), Interest::new(name("/nowhere")).with_nonce(1));
    let nack = expect_nack(&peer1);
    assert_eq!(nack.reason, NackReason::NoRoute);

    bed.ctx.process_timers();
    assert!(bed.ctx.tables.pit.is_empty());
}

#[test]
fn forwarding_hint_selects_delegation_until_producer_region() {
    let mut bed = TestBed::new();
    let (face1, peer1) = bed.face();
    let (face3, peer3) = bed.face();
    bed.add_route("/telia", face3.id(), 10);

    let hinted = |nonce: u32, uri: &str| {
        Interest::new(name(uri))
            .with_nonce(nonce)
            .with_forwarding_hint(vec![name("/telia")])
    };

    // Outside the producer region the delegation drives the FIB lookup.
    bed.ctx.on_incoming_interest(face1.id(), hinted(1, "/video/a"));
    assert_eq!(expect_interest(&peer3).name, name("/video/a"));

    // Inside the producer region the Interest's own name is used; there is
    // no route for it.
    bed.ctx.handle_command(WorkerCommand::AddRegion {
        region: name("/telia/pop3"),
    });
    bed.ctx.on_incoming_interest(face1.id(), hinted(2, "/video/b"));
    assert_eq!(expect_nack(&peer1).reason, NackReason::NoRoute);
    assert!(peer3.receive().is_none());
}

#[test]
fn multicast_forwards_to_all_and_chases_new_next_hops() {
    let mut bed = TestBed::new();
    let (face1, _peer1) = bed.face();
    let (face3, peer3) = bed.face();
    let (face4, peer4) = bed.face();
    let (face5, peer5) = bed.face();

    bed.ctx.handle_command(WorkerCommand::SetStrategy {
        prefix: name("/m"),
        instance: MulticastStrategy::strategy_name(),
    });
    bed.add_route("/m", face3.id(), 10);
    bed.add_route("/m", face4.id(), 20);

    bed.ctx
        .on_incoming_interest(face1.id(), Interest::new(name("/m/1")).with_nonce(9));
    assert_eq!(expect_interest(&peer3).name, name("/m/1"));
    assert_eq!(expect_interest(&peer4).name, name("/m/1"));

    // A next-hop added while the Interest is pending is offered it too.
    bed.add_route("/m", face5.id(), 30);
    assert_eq!(expect_interest(&peer5).name, name("/m/1"));
}

#[test]
fn cs_limit_holds_under_data_arrivals() {
    let mut bed = TestBed::new();
    let (face3, _peer3) = bed.face();
    bed.ctx.handle_command(WorkerCommand::SetCsLimit { limit: 2 });

    for index in 0..5 {
        let data = Data::new(name(&format!("/bulk/{index}")), Vec::new())
            .with_freshness(Duration::from_secs(10));
        // Unsolicited, but the local internal face admits it.
        bed.ctx.on_incoming_data(face3.id(), data);
        assert!(bed.ctx.tables.cs.len() <= 2);
    }
    assert_eq!(bed.ctx.tables.cs.len(), 2);
}

#[test]
fn face_close_clears_routes_and_records() {
    let mut bed = TestBed::new();
    let (face1, _peer1) = bed.face();
    let (face3, peer3) = bed.face();
    bed.add_route("/c", face3.id(), 10);

    bed.ctx
        .on_incoming_interest(face1.id(), Interest::new(name("/c")).with_nonce(3));
    assert_eq!(expect_interest(&peer3).name, name("/c"));

    face3.close();
    bed.ctx.handle_command(WorkerCommand::FaceClosed { face: face3.id() });
    assert!(bed
        .ctx
        .tables
        .fib
        .find_longest_prefix_match(&bed.ctx.tables.name_tree, &name("/c"))
        .is_none());
    let entry_ids = bed.ctx.tables.pit.ids();
    for id in entry_ids {
        assert!(bed.ctx.tables.pit.get(id).unwrap().out_record(face3.id()).is_none());
    }
}

#[test]
fn dispatch_is_deterministic_and_token_routes_back() {
    let faces = Arc::new(FaceTable::new());
    let registry = Arc::new(StrategyRegistry::with_builtins());
    let config = DispatchConfig {
        workers: 2,
        queue_capacity: 64,
        hash_prefix_components: 1,
        pin_workers: false,
    };
    let pool = WorkerPool::spawn(
        &config,
        &CsConfig::default(),
        faces.clone(),
        registry,
        Clock::system(),
    );
    let dispatcher_a = pool.dispatcher();
    let dispatcher_b = pool.dispatcher();

    // Two I/O threads agree on the owner of a name.
    let owner = dispatcher_a.worker_for_name(&name("/foo/bar"));
    assert_eq!(owner, dispatcher_b.worker_for_name(&name("/foo/bar")));
    // Sibling names under the hashed prefix share the owner.
    assert_eq!(owner, dispatcher_a.worker_for_name(&name("/foo/baz")));

    // A PitToken routes Data straight back to its worker.
    let token_owner =
        dispatcher_a.worker_for_reverse(&name("/foo/bar"), Some(owner as u32));
    assert_eq!(token_owner, owner);
    // An out-of-range worker id falls back to the name hash.
    assert_eq!(
        dispatcher_a.worker_for_reverse(&name("/foo/bar"), Some(99)),
        owner
    );

    pool.shutdown();
}

#[test]
fn dispatched_interest_reaches_a_worker_pipeline() {
    let faces = Arc::new(FaceTable::new());
    let (_face1, peer1) = internal_pair(&faces);
    let registry = Arc::new(StrategyRegistry::with_builtins());
    let config = DispatchConfig {
        workers: 2,
        queue_capacity: 64,
        hash_prefix_components: 1,
        pin_workers: false,
    };
    let pool = WorkerPool::spawn(
        &config,
        &CsConfig::default(),
        faces.clone(),
        registry,
        Clock::system(),
    );
    let dispatcher = pool.dispatcher();

    // No route exists, so the pipeline answers with Nack(NoRoute).
    assert!(dispatcher.dispatch_interest(
        peer1.face_id(),
        Interest::new(name("/e2e/ask")).with_nonce(11),
    ));

    let mut nack = None;
    for _ in 0..200 {
        if let Some(NetPacket::Nack(received)) = peer1.receive() {
            nack = Some(received);
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    let nack = nack.expect("worker answered");
    assert_eq!(nack.reason, NackReason::NoRoute);
    assert_eq!(nack.interest.name, name("/e2e/ask"));

    let totals = pool.dispatcher().total_counters();
    assert_eq!(totals.n_in_interests, 1);
    assert_eq!(totals.n_out_nacks, 1);

    pool.shutdown();
}

#[test]
fn pit_token_roundtrip_through_pipeline() {
    // Downstream token is echoed onto the Data returned to that face.
    let mut bed = TestBed::new();
    let (face1, peer1) = bed.face();
    let (face3, peer3) = bed.face();
    bed.add_route("/t", face3.id(), 10);

    let mut interest = Interest::new(name("/t")).with_nonce(77);
    interest.pit_token = Some(PitToken::new(5, false, Some(0xABCD)));
    bed.ctx.on_incoming_interest(face1.id(), interest);
    let upstream = expect_interest(&peer3);
    // Upstream gets this forwarder's token, not the downstream's.
    assert_eq!(upstream.pit_token.unwrap().worker_id, 0);

    bed.ctx
        .on_incoming_data(face3.id(), Data::new(name("/t"), Vec::new()));
    let data = expect_data(&peer1);
    let token = data.pit_token.expect("downstream token echoed");
    assert_eq!(token.worker_id, 5);
    assert_eq!(token.name_hash, Some(0xABCD));
}
