use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use serde::Serialize;

use mwfd_core::name::Name;
use mwfd_fw::counters::CountersSnapshot;
use mwfd_fw::dispatch::Dispatcher;
use mwfd_fw::face::{Face, FaceId, FaceTable};
use mwfd_fw::fw::forwarder::WorkerCommand;
use mwfd_fw::fw::strategy::StrategyRegistry;
use mwfd_fw::internal::{internal_pair, InternalClient, InternalFace};
use mwfd_fw::{Clock, WorkerPool};

use crate::config::Config;

/// The running forwarder: worker pool, face table, internal transport and
/// the management surface over them.
pub struct Daemon {
    config: Config,
    faces: Arc<FaceTable>,
    pool: Option<WorkerPool>,
    dispatcher: Option<Dispatcher>,
    internal_face: Option<Arc<InternalFace>>,
    client: Option<InternalClient>,
}

/// Status snapshot for the management collaborator.
#[derive(Debug, Serialize)]
pub struct DaemonStatus {
    pub totals: CountersSnapshot,
    pub per_worker: Vec<CountersSnapshot>,
    /// (interest, data) inbound ring depths per worker.
    pub queue_depths: Vec<(usize, usize)>,
    pub face_count: usize,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            faces: Arc::new(FaceTable::new()),
            pool: None,
            dispatcher: None,
            internal_face: None,
            client: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        info!("starting mwfd daemon services");
        mwfd_core::init();
        mwfd_fw::init();

        let registry = Arc::new(StrategyRegistry::with_builtins());
        info!(
            "registered strategies: {:?}",
            registry
                .list_registered()
                .iter()
                .map(Name::to_string)
                .collect::<Vec<_>>()
        );

        let pool = WorkerPool::spawn(
            &self.config.dispatch_config(),
            &self.config.cs_config(),
            self.faces.clone(),
            registry,
            Clock::system(),
        );
        let dispatcher = pool.dispatcher();

        let (face, peer) = internal_pair(&self.faces);
        let client = InternalClient::attach(peer, dispatcher.clone());
        info!("internal transport attached as face {}", face.id());

        self.internal_face = Some(face);
        self.client = Some(client);
        self.dispatcher = Some(dispatcher);
        self.pool = Some(pool);

        info!("all services started");
        Ok(())
    }

    pub fn stop(&mut self) {
        info!("stopping mwfd daemon services");
        if let Some(face) = self.internal_face.take() {
            face.close();
            self.faces.remove(face.id());
            if let Some(dispatcher) = &self.dispatcher {
                dispatcher.broadcast(WorkerCommand::FaceClosed { face: face.id() });
            }
        }
        self.client = None;
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
        self.dispatcher = None;
        info!("all services stopped");
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_some()
    }

    pub fn faces(&self) -> &FaceTable {
        &self.faces
    }

    /// The in-process management client, available while running.
    pub fn client(&self) -> Option<&InternalClient> {
        self.client.as_ref()
    }

    fn dispatcher(&self) -> Result<&Dispatcher> {
        match &self.dispatcher {
            Some(dispatcher) => Ok(dispatcher),
            None => bail!("daemon is not running"),
        }
    }

    // === management surface ===

    /// Idempotent route insert, fanned out to every worker.
    pub fn add_route(&self, prefix: &str, face: FaceId, cost: u32, flags: u64) -> Result<()> {
        let name: Name = prefix.parse().context("invalid route prefix")?;
        self.dispatcher()?.broadcast(WorkerCommand::FibAdd {
            name,
            face,
            cost,
            flags,
        });
        Ok(())
    }

    pub fn remove_route(&self, prefix: &str, face: FaceId) -> Result<()> {
        let name: Name = prefix.parse().context("invalid route prefix")?;
        self.dispatcher()?
            .broadcast(WorkerCommand::FibRemove { name, face });
        Ok(())
    }

    pub fn set_strategy(&self, prefix: &str, instance: &str) -> Result<()> {
        let prefix: Name = prefix.parse().context("invalid strategy prefix")?;
        let instance: Name = instance.parse().context("invalid strategy instance")?;
        self.dispatcher()?
            .broadcast(WorkerCommand::SetStrategy { prefix, instance });
        Ok(())
    }

    pub fn unset_strategy(&self, prefix: &str) -> Result<()> {
        let prefix: Name = prefix.parse().context("invalid strategy prefix")?;
        self.dispatcher()?
            .broadcast(WorkerCommand::UnsetStrategy { prefix });
        Ok(())
    }

    pub fn add_network_region(&self, region: &str) -> Result<()> {
        let region: Name = region.parse().context("invalid region name")?;
        self.dispatcher()?
            .broadcast(WorkerCommand::AddRegion { region });
        Ok(())
    }

    pub fn remove_network_region(&self, region: &str) -> Result<()> {
        let region: Name = region.parse().context("invalid region name")?;
        self.dispatcher()?
            .broadcast(WorkerCommand::RemoveRegion { region });
        Ok(())
    }

    pub fn set_cs_limit(&self, limit: usize) -> Result<()> {
        self.dispatcher()?
            .broadcast(WorkerCommand::SetCsLimit { limit });
        Ok(())
    }

    pub fn status(&self) -> Result<DaemonStatus> {
        let dispatcher = self.dispatcher()?;
        Ok(DaemonStatus {
            totals: dispatcher.total_counters(),
            per_worker: dispatcher.worker_counters(),
            queue_depths: dispatcher.queue_depths(),
            face_count: self.faces.len(),
        })
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}
