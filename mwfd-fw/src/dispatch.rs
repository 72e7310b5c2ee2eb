use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use log::{debug, info, warn};
use mwfd_core::lp::{Nack, NetPacket};
use mwfd_core::name::Name;
use mwfd_core::packets::{Data, Interest};

use crate::clock::Clock;
use crate::counters::{bump, CountersSnapshot, WorkerCounters};
use crate::face::{FaceId, FaceTable};
use crate::fw::forwarder::{WorkerCommand, WorkerContext};
use crate::fw::strategy::StrategyRegistry;
use crate::tables::cs::CsConfig;

/// Packets dequeued per queue per loop turn.
const BATCH_SIZE: usize = 64;
/// Park bound while no timer is pending.
const IDLE_PARK: Duration = Duration::from_millis(100);

/// 64-bit hash of the first `components` name components. All packets of a
/// name hash identically, which is what pins a name to one worker.
pub fn name_hash(name: &Name, components: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    for component in name.components.iter().take(components.max(1)) {
        component.hash(&mut hasher);
    }
    hasher.finish()
}

/// Dispatch configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub workers: usize,
    /// Capacity of each inbound ring; a full ring drops.
    pub queue_capacity: usize,
    /// Name prefix length fed into the worker hash.
    pub hash_prefix_components: usize,
    /// Pin each worker thread to a CPU.
    pub pin_workers: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(2, |n| n.get().min(8)),
            queue_capacity: 4096,
            hash_prefix_components: 1,
            pin_workers: true,
        }
    }
}

/// Data-path events on the second ring.
enum DataEvent {
    Data(FaceId, Data),
    Nack(FaceId, Nack),
}

struct WorkerRef {
    interests: Arc<ArrayQueue<(FaceId, Interest)>>,
    data: Arc<ArrayQueue<DataEvent>>,
    commands: Arc<ArrayQueue<WorkerCommand>>,
    counters: Arc<WorkerCounters>,
    unparker: Thread,
}

impl WorkerRef {
    fn wake(&self) {
        self.unparker.unpark();
    }
}

/// The I/O-thread side of the worker pool: routes packets to workers by
/// name hash or PitToken. Cloneable; every I/O thread carries its own copy.
#[derive(Clone)]
pub struct Dispatcher {
    workers: Arc<Vec<WorkerRef>>,
    hash_prefix_components: usize,
}

impl Dispatcher {
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Worker owning `name`.
    pub fn worker_for_name(&self, name: &Name) -> usize {
        (name_hash(name, self.hash_prefix_components) % self.workers.len() as u64) as usize
    }

    /// Worker for a Data/Nack: the PitToken's worker when it carries a
    /// valid one, the name hash otherwise.
    pub fn worker_for_reverse(&self, name: &Name, token_worker: Option<u32>) -> usize {
        match token_worker {
            Some(worker) if (worker as usize) < self.workers.len() => worker as usize,
            _ => self.worker_for_name(name),
        }
    }

    /// Enqueue an Interest; a full ring drops it (admission control).
    pub fn dispatch_interest(&self, ingress: FaceId, interest: Interest) -> bool {
        let worker = &self.workers[self.worker_for_name(&interest.name)];
        match worker.interests.push((ingress, interest)) {
            Ok(()) => {
                worker.wake();
                true
            }
            Err(_) => {
                bump(&worker.counters.n_queue_drops);
                false
            }
        }
    }

    pub fn dispatch_data(&self, ingress: FaceId, data: Data) -> bool {
        let index =
            self.worker_for_reverse(&data.name, data.pit_token.map(|token| token.worker_id));
        let worker = &self.workers[index];
        match worker.data.push(DataEvent::Data(ingress, data)) {
            Ok(()) => {
                worker.wake();
                true
            }
            Err(_) => {
                bump(&worker.counters.n_queue_drops);
                false
            }
        }
    }

    pub fn dispatch_nack(&self, ingress: FaceId, nack: Nack) -> bool {
        let index = self.worker_for_reverse(
            &nack.interest.name,
            nack.interest.pit_token.map(|token| token.worker_id),
        );
        let worker = &self.workers[index];
        match worker.data.push(DataEvent::Nack(ingress, nack)) {
            Ok(()) => {
                worker.wake();
                true
            }
            Err(_) => {
                bump(&worker.counters.n_queue_drops);
                false
            }
        }
    }

    /// Route any parsed packet.
    pub fn dispatch_packet(&self, ingress: FaceId, packet: NetPacket) -> bool {
        match packet {
            NetPacket::Interest(interest) => self.dispatch_interest(ingress, interest),
            NetPacket::Data(data) => self.dispatch_data(ingress, data),
            NetPacket::Nack(nack) => self.dispatch_nack(ingress, nack),
        }
    }

    /// Broadcast a management update to every worker. Per-queue FIFO keeps
    /// updates totally ordered per name.
    pub fn broadcast(&self, command: WorkerCommand) {
        for worker in self.workers.iter() {
            if worker.commands.push(command.clone()).is_err() {
                warn!("worker command ring full, update lost");
            }
            worker.wake();
        }
    }

    /// (interest, data) ring depths per worker.
    pub fn queue_depths(&self) -> Vec<(usize, usize)> {
        self.workers
            .iter()
            .map(|worker| (worker.interests.len(), worker.data.len()))
            .collect()
    }

    pub fn worker_counters(&self) -> Vec<CountersSnapshot> {
        self.workers
            .iter()
            .map(|worker| worker.counters.snapshot())
            .collect()
    }

    /// Aggregate counters across the pool.
    pub fn total_counters(&self) -> CountersSnapshot {
        let mut total = CountersSnapshot::default();
        for snapshot in self.worker_counters() {
            total.merge(&snapshot);
        }
        total
    }
}

/// The fixed pool of forwarding workers, each a pinned thread with private
/// tables, fed through its inbound rings.
pub struct WorkerPool {
    threads: Vec<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    dispatcher: Dispatcher,
}

impl WorkerPool {
    pub fn spawn(
        config: &DispatchConfig,
        cs_config: &CsConfig,
        faces: Arc<FaceTable>,
        registry: Arc<StrategyRegistry>,
        clock: Clock,
    ) -> Self {
        let worker_count = config.workers.max(1);
        let running = Arc::new(AtomicBool::new(true));
        let mut workers = Vec::with_capacity(worker_count);
        let mut threads = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count as u32 {
            let interests = Arc::new(ArrayQueue::new(config.queue_capacity));
            let data = Arc::new(ArrayQueue::new(config.queue_capacity));
            let commands = Arc::new(ArrayQueue::new(config.queue_capacity));
            let counters = Arc::new(WorkerCounters::default());

            let thread = {
                let interests = interests.clone();
                let data = data.clone();
                let commands = commands.clone();
                let counters = counters.clone();
                let running = running.clone();
                let faces = faces.clone();
                let registry = registry.clone();
                let clock = clock.clone();
                let cs_config = cs_config.clone();
                let pin = config.pin_workers;
                thread::Builder::new()
                    .name(format!("mwfd-worker-{worker_id}"))
                    .spawn(move || {
                        let context = WorkerContext::with_counters(
                            worker_id, &cs_config, faces, registry, clock, counters,
                        );
                        worker_main(context, interests, data, commands, running, pin);
                    })
                    .expect("spawn worker thread")
            };

            workers.push(WorkerRef {
                interests,
                data,
                commands,
                counters,
                unparker: thread.thread().clone(),
            });
            threads.push(thread);
        }

        info!("spawned {worker_count} forwarding workers");
        Self {
            threads,
            running,
            dispatcher: Dispatcher {
                workers: Arc::new(workers),
                hash_prefix_components: config.hash_prefix_components,
            },
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Stop the workers after they drain their rings.
    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::SeqCst);
        for worker in self.dispatcher.workers.iter() {
            worker.wake();
        }
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        info!("worker pool stopped");
    }
}

fn worker_main(
    mut context: WorkerContext,
    interests: Arc<ArrayQueue<(FaceId, Interest)>>,
    data: Arc<ArrayQueue<DataEvent>>,
    commands: Arc<ArrayQueue<WorkerCommand>>,
    running: Arc<AtomicBool>,
    pin: bool,
) {
    if pin {
        pin_current_thread(context.worker_id());
    }
    loop {
        let mut worked = 0usize;
        while worked < BATCH_SIZE {
            let Some(command) = commands.pop() else {
                break;
            };
            context.handle_command(command);
            worked += 1;
        }
        while worked < BATCH_SIZE {
            let Some((ingress, interest)) = interests.pop() else {
                break;
            };
            context.on_incoming_interest(ingress, interest);
            worked += 1;
        }
        while worked < BATCH_SIZE {
            let Some(event) = data.pop() else {
                break;
            };
            match event {
                DataEvent::Data(ingress, packet) => context.on_incoming_data(ingress, packet),
                DataEvent::Nack(ingress, nack) => context.on_incoming_nack(ingress, nack),
            }
            worked += 1;
        }

        let next_deadline = context.process_timers();

        let idle = interests.is_empty() && data.is_empty() && commands.is_empty();
        if !running.load(Ordering::SeqCst) {
            if idle {
                break;
            }
            continue;
        }
        if worked == 0 && idle {
            let timeout = next_deadline
                .map(|deadline| deadline.saturating_duration_since(context.clock().now()))
                .unwrap_or(IDLE_PARK)
                .min(IDLE_PARK);
            thread::park_timeout(timeout);
        }
    }
    debug!("worker {} exited", context.worker_id());
}

fn pin_current_thread(worker_id: u32) {
    let Some(cores) = core_affinity::get_core_ids() else {
        warn!("worker {worker_id}: no CPU topology, not pinning");
        return;
    };
    if cores.is_empty() {
        return;
    }
    let core = cores[worker_id as usize % cores.len()];
    if core_affinity::set_for_current(core) {
        debug!("worker {worker_id} pinned to core {:?}", core.id);
    } else {
        warn!("worker {worker_id}: failed to pin to core {:?}", core.id);
    }
}
