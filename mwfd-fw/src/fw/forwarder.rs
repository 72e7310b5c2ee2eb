use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use mwfd_core::lp::{LpPacket, Nack, NackReason, PitToken};
use mwfd_core::name::Name;
use mwfd_core::packets::{Data, Interest};

use crate::clock::Clock;
use crate::counters::{bump, gauge, WorkerCounters};
use crate::dispatch::name_hash;
use crate::face::{
    localhop_prefix, localhost_prefix, FaceId, FaceScope, FaceState, FaceTable, LinkType,
};
use crate::fw::strategy::{Strategy, StrategyRegistry, StrategySet};
use crate::tables::cs::CsConfig;
use crate::tables::fib::{FibEntry, FibUpdate, NextHop};
use crate::tables::measurements::MeasurementsEntry;
use crate::tables::pit::{DuplicateNonce, PitEntryId, PitKey};
use crate::tables::Tables;

/// How often a worker sweeps stale CS entries.
const CS_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
/// How often a worker sweeps expired measurements.
const MEASUREMENTS_SWEEP_INTERVAL: Duration = Duration::from_secs(4);

/// Events on a worker's timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    PitExpiry { entry: PitEntryId, epoch: u64 },
    CsSweep,
    MeasurementsSweep,
}

#[derive(Debug, PartialEq, Eq)]
struct Scheduled {
    at: Instant,
    seq: u64,
    event: TimerEvent,
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of timer events for one worker's event loop.
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<Scheduled>>,
    seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub fn schedule(&mut self, at: Instant, event: TimerEvent) {
        self.seq += 1;
        self.heap.push(Reverse(Scheduled {
            at,
            seq: self.seq,
            event,
        }));
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(s)| s.at)
    }

    pub fn pop_due(&mut self, now: Instant) -> Option<TimerEvent> {
        if self.heap.peek()?.0.at > now {
            return None;
        }
        self.heap.pop().map(|Reverse(s)| s.event)
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Management updates broadcast to every worker's private tables.
/// A single management task pushes these, so updates stay totally ordered
/// per name.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    FibAdd {
        name: Name,
        face: FaceId,
        cost: u32,
        flags: u64,
    },
    FibRemove {
        name: Name,
        face: FaceId,
    },
    SetStrategy {
        prefix: Name,
        instance: Name,
    },
    UnsetStrategy {
        prefix: Name,
    },
    AddRegion {
        region: Name,
    },
    RemoveRegion {
        region: Name,
    },
    SetCsLimit {
        limit: usize,
    },
    SetCsAdmit {
        admit: bool,
    },
    SetCsServe {
        serve: bool,
    },
    FaceClosed {
        face: FaceId,
    },
}

/// Reschedule the entry's expiry timer; the epoch bump invalidates any
/// event already queued for it.
fn schedule_entry_expiry(
    tables: &mut Tables,
    timers: &mut TimerQueue,
    entry_id: PitEntryId,
    at: Instant,
) {
    if let Some(entry) = tables.pit.get_mut(entry_id) {
        entry.expiry = at;
        entry.timer_epoch += 1;
        timers.schedule(
            at,
            TimerEvent::PitExpiry {
                entry: entry_id,
                epoch: entry.timer_epoch,
            },
        );
    }
}

/// The action surface handed to strategy triggers: the worker's tables and
/// faces, minus the strategy set itself.
pub struct StrategyApi<'a> {
    pub(crate) worker_id: u32,
    pub(crate) clock: &'a Clock,
    pub(crate) tables: &'a mut Tables,
    pub(crate) faces: &'a FaceTable,
    pub(crate) counters: &'a WorkerCounters,
    pub(crate) timers: &'a mut TimerQueue,
}

impl<'a> StrategyApi<'a> {
    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Outgoing Interest pipeline: construct the out-record, stamp the
    /// PitToken and hand the Interest to the egress face. Returns whether
    /// the Interest left.
    pub fn send_interest(
        &mut self,
        entry_id: PitEntryId,
        egress: FaceId,
        interest: &Interest,
    ) -> bool {
        let now = self.now();
        let Some(face) = self.faces.get(egress) else {
            return false;
        };
        if face.state() != FaceState::Up {
            return false;
        }
        let Some(entry) = self.tables.pit.get_mut(entry_id) else {
            return false;
        };

        let mut outgoing = interest.clone();
        let nonce = match outgoing.nonce {
            Some(nonce) => nonce,
            None => {
                let nonce = rand::random();
                outgoing.nonce = Some(nonce);
                nonce
            }
        };
        entry.upsert_out_record(egress, nonce, now + outgoing.lifetime_or_default());
        outgoing.pit_token = Some(PitToken::new(
            self.worker_id,
            entry.key.can_be_prefix,
            Some(name_hash(&outgoing.name, outgoing.name.len())),
        ));

        match face.send(LpPacket::from_interest(&outgoing)) {
            Ok(()) => {
                face.counters().record_out();
                bump(&self.counters.n_out_interests);
                trace!("out interest {} -> face {egress}", outgoing.name);
                true
            }
            Err(err) => {
                debug!("face {egress} refused interest: {err}");
                face.counters().record_drop();
                if let Some(entry) = self.tables.pit.get_mut(entry_id) {
                    entry.remove_out_record(egress);
                }
                false
            }
        }
    }

    /// Outgoing Data pipeline: echo the PitToken from the matched
    /// in-record (stripping when it carried none), consume the in-record
    /// and send.
    pub fn send_data(&mut self, entry_id: PitEntryId, mut data: Data, egress: FaceId) -> bool {
        if let Some(entry) = self.tables.pit.get_mut(entry_id) {
            if let Some(in_record) = entry.remove_in_record(egress) {
                data.pit_token = in_record.interest.pit_token;
            }
        }
        let Some(face) = self.faces.get(egress) else {
            bump(&self.counters.n_pipeline_drops);
            return false;
        };
        if face.state() != FaceState::Up {
            face.counters().record_drop();
            bump(&self.counters.n_pipeline_drops);
            return false;
        }
        match face.send(LpPacket::from_data(&data)) {
            Ok(()) => {
                face.counters().record_out();
                bump(&self.counters.n_out_data);
                trace!("out data {} -> face {egress}", data.name);
                true
            }
            Err(err) => {
                debug!("face {egress} refused data: {err}");
                face.counters().record_drop();
                bump(&self.counters.n_pipeline_drops);
                false
            }
        }
    }

    /// Send the Data to every downstream with an in-record. The ingress
    /// itself only qualifies on ad-hoc links.
    pub fn send_data_to_all(&mut self, entry_id: PitEntryId, ingress: FaceId, data: &Data) {
        let Some(entry) = self.tables.pit.get(entry_id) else {
            return;
        };
        let downstreams: Vec<FaceId> = entry
            .in_records()
            .map(|record| record.face)
            .filter(|&face| {
                face != ingress
                    || self
                        .faces
                        .get(face)
                        .map_or(false, |f| f.link_type() == LinkType::AdHoc)
            })
            .collect();
        for egress in downstreams {
            self.send_data(entry_id, data.clone(), egress);
        }
    }

    /// Outgoing Nack pipeline: requires and consumes the in-record for the
    /// egress; the Nack carries that downstream's own Interest.
    pub fn send_nack(&mut self, entry_id: PitEntryId, egress: FaceId, reason: NackReason) -> bool {
        let Some(entry) = self.tables.pit.get_mut(entry_id) else {
            return false;
        };
        let Some(in_record) = entry.remove_in_record(egress) else {
            return false;
        };
        let Some(face) = self.faces.get(egress) else {
            bump(&self.counters.n_pipeline_drops);
            return false;
        };
        if face.state() != FaceState::Up || face.link_type() != LinkType::PointToPoint {
            face.counters().record_drop();
            bump(&self.counters.n_pipeline_drops);
            return false;
        }
        let nack = Nack::new(in_record.interest, reason);
        match face.send(LpPacket::from_nack(&nack)) {
            Ok(()) => {
                face.counters().record_out();
                bump(&self.counters.n_out_nacks);
                true
            }
            Err(err) => {
                debug!("face {egress} refused nack: {err}");
                face.counters().record_drop();
                bump(&self.counters.n_pipeline_drops);
                false
            }
        }
    }

    /// Nack every downstream except those listed.
    pub fn send_nacks(&mut self, entry_id: PitEntryId, reason: NackReason, except: &[FaceId]) {
        let Some(entry) = self.tables.pit.get(entry_id) else {
            return;
        };
        let downstreams: Vec<FaceId> = entry
            .in_records()
            .map(|record| record.face)
            .filter(|face| !except.contains(face))
            .collect();
        for egress in downstreams {
            self.send_nack(entry_id, egress, reason);
        }
    }

    /// Schedule the entry for immediate erasure.
    pub fn reject_pending_interest(&mut self, entry_id: PitEntryId) {
        let now = self.now();
        schedule_entry_expiry(self.tables, self.timers, entry_id, now);
    }

    /// Keep the entry alive for `after` from now.
    pub fn set_expiry_timer(&mut self, entry_id: PitEntryId, after: Duration) {
        let at = self.now() + after;
        schedule_entry_expiry(self.tables, self.timers, entry_id, at);
    }

    /// FIB lookup for the entry, honoring the forwarding hint while the
    /// Interest has not reached the producer region.
    pub fn lookup_fib(&self, entry_id: PitEntryId) -> Option<FibEntry> {
        let entry = self.tables.pit.get(entry_id)?;
        let hint = &entry.interest.forwarding_hint;
        if !hint.is_empty() && !self.tables.network_region.is_in_producer_region(hint) {
            for delegation in hint {
                if let Some(fib_entry) = self
                    .tables
                    .fib
                    .find_longest_prefix_match(&self.tables.name_tree, delegation)
                {
                    if fib_entry.has_next_hops() {
                        return Some(fib_entry.clone());
                    }
                }
            }
        }
        self.tables
            .fib
            .find_longest_prefix_match(&self.tables.name_tree, entry.name())
            .cloned()
    }

    /// Measurements entry for `name`, created on first use.
    pub fn measurements_for(&mut self, name: &Name) -> &mut MeasurementsEntry {
        let now = self.clock.now();
        let Tables {
            name_tree,
            measurements,
            ..
        } = &mut *self.tables;
        measurements.get_or_insert(name_tree, name, now)
    }

    /// Whether a next-hop qualifies as upstream for this entry: the face is
    /// up, is not the downstream (unless ad-hoc) and the name's scope
    /// permits leaving the host through it.
    pub fn is_eligible_upstream(
        &self,
        entry_id: PitEntryId,
        ingress: FaceId,
        next_hop: &NextHop,
    ) -> bool {
        let Some(entry) = self.tables.pit.get(entry_id) else {
            return false;
        };
        let Some(face) = self.faces.get(next_hop.face) else {
            return false;
        };
        if face.state() != FaceState::Up {
            return false;
        }
        if next_hop.face == ingress && face.link_type() != LinkType::AdHoc {
            return false;
        }
        if face.scope() == FaceScope::NonLocal {
            let name = entry.name();
            if localhost_prefix().is_prefix_of(name) || localhop_prefix().is_prefix_of(name) {
                return false;
            }
        }
        true
    }

    /// Read access to a PIT entry, for strategy decisions over its records.
    pub fn pit_entry(&self, entry_id: PitEntryId) -> Option<&crate::tables::pit::PitEntry> {
        self.tables.pit.get(entry_id)
    }

    /// Whether the entry still awaits some upstream.
    pub fn has_pending_upstreams(&self, entry_id: PitEntryId) -> bool {
        let now = self.now();
        self.tables
            .pit
            .get(entry_id)
            .map_or(false, |entry| entry.has_pending_out_records(now))
    }
}

/// One forwarding worker's state: private tables, strategies and timers,
/// driven by the worker's event loop. Thread-local in spirit, but passed
/// explicitly into the pipelines.
pub struct WorkerContext {
    worker_id: u32,
    clock: Clock,
    pub tables: Tables,
    faces: Arc<FaceTable>,
    counters: Arc<WorkerCounters>,
    timers: TimerQueue,
    strategies: StrategySet,
    registry: Arc<StrategyRegistry>,
}

impl WorkerContext {
    pub fn new(
        worker_id: u32,
        cs_config: &CsConfig,
        faces: Arc<FaceTable>,
        registry: Arc<StrategyRegistry>,
        clock: Clock,
    ) -> Self {
        Self::with_counters(
            worker_id,
            cs_config,
            faces,
            registry,
            clock,
            Arc::new(WorkerCounters::default()),
        )
    }

    /// Construct over caller-owned counters, so drop counts recorded at the
    /// inbound rings and pipeline counts land in the same place.
    pub fn with_counters(
        worker_id: u32,
        cs_config: &CsConfig,
        faces: Arc<FaceTable>,
        registry: Arc<StrategyRegistry>,
        clock: Clock,
        counters: Arc<WorkerCounters>,
    ) -> Self {
        let tables = Tables::new(cs_config, registry.default_instance().clone());
        let mut timers = TimerQueue::new();
        let now = clock.now();
        timers.schedule(now + CS_SWEEP_INTERVAL, TimerEvent::CsSweep);
        timers.schedule(
            now + MEASUREMENTS_SWEEP_INTERVAL,
            TimerEvent::MeasurementsSweep,
        );
        Self {
            worker_id,
            clock,
            tables,
            faces,
            counters,
            timers,
            strategies: StrategySet::new(),
            registry,
        }
    }

    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    pub fn counters(&self) -> Arc<WorkerCounters> {
        self.counters.clone()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Build the action surface over this context's state.
    pub fn api(&mut self) -> StrategyApi<'_> {
        StrategyApi {
            worker_id: self.worker_id,
            clock: &self.clock,
            tables: &mut self.tables,
            faces: &*self.faces,
            counters: &*self.counters,
            timers: &mut self.timers,
        }
    }

    /// Run a strategy trigger for the namespace of `governed_name`.
    fn with_strategy<F>(&mut self, governed_name: &Name, f: F)
    where
        F: FnOnce(&mut dyn Strategy, &mut StrategyApi<'_>),
    {
        let instance = self
            .tables
            .strategy_choice
            .find_effective(governed_name)
            .clone();
        let Some(mut strategy) = self.strategies.take_or_create(&instance, &self.registry) else {
            warn!("no strategy available for {governed_name}");
            return;
        };
        let mut api = StrategyApi {
            worker_id: self.worker_id,
            clock: &self.clock,
            tables: &mut self.tables,
            faces: &*self.faces,
            counters: &*self.counters,
            timers: &mut self.timers,
        };
        f(strategy.as_mut(), &mut api);
        self.strategies.put(instance, strategy);
    }

    /// Incoming Interest pipeline.
    pub fn on_incoming_interest(&mut self, ingress: FaceId, mut interest: Interest) {
        bump(&self.counters.n_in_interests);
        let now = self.clock.now();
        let Some(face) = self.faces.get(ingress) else {
            bump(&self.counters.n_pipeline_drops);
            return;
        };
        face.counters().record_in();

        if interest.hop_limit == Some(0) {
            debug!("interest {}: hop limit exhausted", interest.name);
            bump(&self.counters.n_pipeline_drops);
            return;
        }
        if let Some(hops) = interest.hop_limit {
            interest.hop_limit = Some(hops - 1);
        }
        if localhost_prefix().is_prefix_of(&interest.name) && face.scope() != FaceScope::Local {
            debug!("interest {}: scope violation on face {ingress}", interest.name);
            bump(&self.counters.n_pipeline_drops);
            return;
        }

        // Loop check against the existing entry, before it is touched.
        let key = PitKey::from_interest(&interest);
        if let (Some(entry_id), Some(nonce)) = (self.tables.pit.find(&key), interest.nonce) {
            let entry = self.tables.pit.get(entry_id).unwrap();
            match entry.find_nonce(nonce, ingress) {
                DuplicateNonce::InRecordOtherFace | DuplicateNonce::OutRecord => {
                    debug!("interest {}: looped nonce {nonce:#010x}", interest.name);
                    self.send_nack_direct(ingress, interest, NackReason::Duplicate);
                    return;
                }
                _ => {}
            }
        }

        let (entry_id, _created) = {
            let Tables { name_tree, pit, .. } = &mut self.tables;
            pit.find_or_insert(name_tree, &interest, self.worker_id, now)
        };

        // CS lookup is skipped while the entry already has downstreams: the
        // request is in flight and the answer will fan out on return.
        let in_flight = self
            .tables
            .pit
            .get(entry_id)
            .map_or(false, |entry| entry.has_in_records());
        if !in_flight {
            let hit = {
                let Tables { cs, .. } = &mut self.tables;
                cs.lookup(&interest, now)
            };
            if let Some(mut data) = hit {
                bump(&self.counters.n_cs_hits);
                data.pit_token = interest.pit_token;
                schedule_entry_expiry(&mut self.tables, &mut self.timers, entry_id, now);
                let governed = interest.name.clone();
                self.with_strategy(&governed, |strategy, api| {
                    strategy.after_content_store_hit(api, entry_id, ingress, data);
                });
                return;
            }
            bump(&self.counters.n_cs_misses);
        }

        let expiry = now + interest.lifetime_or_default();
        let entry = self.tables.pit.get_mut(entry_id).unwrap();
        entry.upsert_in_record(ingress, &interest, expiry);
        let deadline = entry.max_in_record_expiry().unwrap();
        schedule_entry_expiry(&mut self.tables, &mut self.timers, entry_id, deadline);

        let governed = interest.name.clone();
        self.with_strategy(&governed, |strategy, api| {
            strategy.after_receive_interest(api, ingress, &interest, entry_id);
        });
    }

    /// Incoming Data pipeline.
    pub fn on_incoming_data(&mut self, ingress: FaceId, data: Data) {
        bump(&self.counters.n_in_data);
        let now = self.clock.now();
        let Some(face) = self.faces.get(ingress) else {
            bump(&self.counters.n_pipeline_drops);
            return;
        };
        face.counters().record_in();

        let matches = self.tables.pit.find_all_satisfied_by(&data);
        if matches.is_empty() {
            bump(&self.counters.n_unsolicited_data);
            let admit = self.tables.cs.admit_enabled()
                && face.unsolicited_data_policy().admits(face.scope());
            if admit {
                let Tables { name_tree, cs, .. } = &mut self.tables;
                cs.insert(name_tree, data, now, true);
            } else {
                trace!("unsolicited data dropped on face {ingress}");
                bump(&self.counters.n_pipeline_drops);
            }
            return;
        }

        {
            let Tables { name_tree, cs, .. } = &mut self.tables;
            cs.insert(name_tree, data.clone(), now, false);
        }

        for &entry_id in &matches {
            let entry = self.tables.pit.get_mut(entry_id).unwrap();
            if !entry.satisfied {
                entry.satisfied = true;
                let satisfied = entry.in_record_count() as u64;
                self.counters
                    .n_satisfied_interests
                    .fetch_add(satisfied, std::sync::atomic::Ordering::Relaxed);
            }
            schedule_entry_expiry(&mut self.tables, &mut self.timers, entry_id, now);
        }

        if let [entry_id] = matches[..] {
            let governed = self.tables.pit.get(entry_id).unwrap().name().clone();
            self.with_strategy(&governed, |strategy, api| {
                strategy.after_receive_data(api, entry_id, ingress, &data);
            });
        } else {
            for &entry_id in &matches {
                let governed = self.tables.pit.get(entry_id).unwrap().name().clone();
                self.with_strategy(&governed, |strategy, api| {
                    strategy.before_satisfy_interest(api, entry_id, ingress, &data);
                });
            }
            for &entry_id in &matches {
                self.api().send_data_to_all(entry_id, ingress, &data);
            }
        }
    }

    /// Incoming Nack pipeline.
    pub fn on_incoming_nack(&mut self, ingress: FaceId, nack: Nack) {
        bump(&self.counters.n_in_nacks);
        let Some(face) = self.faces.get(ingress) else {
            bump(&self.counters.n_pipeline_drops);
            return;
        };
        face.counters().record_in();
        if face.link_type() != LinkType::PointToPoint {
            bump(&self.counters.n_pipeline_drops);
            return;
        }

        let key = PitKey::from_interest(&nack.interest);
        let Some(entry_id) = self.tables.pit.find(&key) else {
            debug!("nack {}: no pit entry", nack.interest.name);
            bump(&self.counters.n_pipeline_drops);
            return;
        };
        let Some(nonce) = nack.nonce() else {
            bump(&self.counters.n_pipeline_drops);
            return;
        };
        let entry = self.tables.pit.get_mut(entry_id).unwrap();
        if entry.satisfied || !entry.record_nack(ingress, nonce, nack.reason) {
            debug!("nack {}: no matching out-record", nack.interest.name);
            bump(&self.counters.n_pipeline_drops);
            return;
        }

        let governed = self.tables.pit.get(entry_id).unwrap().name().clone();
        self.with_strategy(&governed, |strategy, api| {
            strategy.after_receive_nack(api, ingress, &nack, entry_id);
        });
    }

    /// A Nack emitted outside any PIT entry (loop refusal).
    fn send_nack_direct(&self, egress: FaceId, interest: Interest, reason: NackReason) {
        let Some(face) = self.faces.get(egress) else {
            return;
        };
        if face.state() != FaceState::Up || face.link_type() != LinkType::PointToPoint {
            bump(&self.counters.n_pipeline_drops);
            return;
        }
        let nack = Nack::new(interest, reason);
        if face.send(LpPacket::from_nack(&nack)).is_ok() {
            face.counters().record_out();
            bump(&self.counters.n_out_nacks);
        } else {
            face.counters().record_drop();
        }
    }

    /// Service every due timer; returns the next deadline, for the event
    /// loop's park timeout.
    pub fn process_timers(&mut self) -> Option<Instant> {
        let now = self.clock.now();
        while let Some(event) = self.timers.pop_due(now) {
            match event {
                TimerEvent::PitExpiry { entry, epoch } => self.finalize_pit_entry(entry, epoch, now),
                TimerEvent::CsSweep => {
                    let Tables { name_tree, cs, .. } = &mut self.tables;
                    cs.evict_stale(name_tree, now);
                    self.timers
                        .schedule(now + CS_SWEEP_INTERVAL, TimerEvent::CsSweep);
                }
                TimerEvent::MeasurementsSweep => {
                    let Tables {
                        name_tree,
                        measurements,
                        ..
                    } = &mut self.tables;
                    measurements.sweep(name_tree, now);
                    self.timers.schedule(
                        now + MEASUREMENTS_SWEEP_INTERVAL,
                        TimerEvent::MeasurementsSweep,
                    );
                }
            }
        }
        gauge(&self.counters.pit_entries, self.tables.pit.len() as u64);
        gauge(&self.counters.cs_entries, self.tables.cs.len() as u64);
        self.timers.next_deadline()
    }

    fn finalize_pit_entry(&mut self, entry_id: PitEntryId, epoch: u64, now: Instant) {
        let Tables { name_tree, pit, .. } = &mut self.tables;
        let Some(entry) = pit.get(entry_id) else {
            return;
        };
        if entry.timer_epoch != epoch || entry.expiry > now {
            return;
        }
        if !entry.satisfied {
            let unsatisfied = entry.in_record_count() as u64;
            self.counters
                .n_unsatisfied_interests
                .fetch_add(unsatisfied, std::sync::atomic::Ordering::Relaxed);
        }
        trace!("pit entry {} expired", entry.name());
        pit.erase(name_tree, entry_id);
    }

    /// Apply a management update to this worker's tables.
    pub fn handle_command(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::FibAdd {
                name,
                face,
                cost,
                flags,
            } => {
                let update = {
                    let Tables { name_tree, fib, .. } = &mut self.tables;
                    fib.insert(name_tree, &name, face, cost, flags)
                };
                if update == FibUpdate::NewNextHop {
                    self.after_new_next_hop(&name, NextHop { face, cost, flags });
                }
            }
            WorkerCommand::FibRemove { name, face } => {
                let Tables { name_tree, fib, .. } = &mut self.tables;
                fib.remove(name_tree, &name, face);
            }
            WorkerCommand::SetStrategy { prefix, instance } => {
                self.tables.strategy_choice.insert(prefix, instance);
            }
            WorkerCommand::UnsetStrategy { prefix } => {
                self.tables.strategy_choice.erase(&prefix);
            }
            WorkerCommand::AddRegion { region } => {
                self.tables.network_region.insert(region);
            }
            WorkerCommand::RemoveRegion { region } => {
                self.tables.network_region.remove(&region);
            }
            WorkerCommand::SetCsLimit { limit } => {
                let Tables { name_tree, cs, .. } = &mut self.tables;
                cs.set_limit(name_tree, limit);
            }
            WorkerCommand::SetCsAdmit { admit } => {
                self.tables.cs.set_admit(admit);
            }
            WorkerCommand::SetCsServe { serve } => {
                self.tables.cs.set_serve(serve);
            }
            WorkerCommand::FaceClosed { face } => {
                let Tables { name_tree, fib, .. } = &mut self.tables;
                fib.remove_face(name_tree, face);
                for entry_id in self.tables.pit.ids() {
                    let entry = self.tables.pit.get_mut(entry_id).unwrap();
                    entry.remove_in_record(face);
                    entry.remove_out_record(face);
                }
            }
        }
    }

    /// Offer pending Interests under the prefix to strategies that asked
    /// for the new-next-hop trigger.
    fn after_new_next_hop(&mut self, prefix: &Name, next_hop: NextHop) {
        for entry_id in self.tables.pit.entries_under_prefix(prefix) {
            let Some(entry) = self.tables.pit.get(entry_id) else {
                continue;
            };
            if entry.satisfied {
                continue;
            }
            let governed = entry.name().clone();
            self.with_strategy(&governed, |strategy, api| {
                if strategy.wants_new_next_hop_trigger() {
                    strategy.after_new_next_hop(api, next_hop, entry_id);
                }
            });
        }
    }
}
