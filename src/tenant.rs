use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::compactor;
use crate::engine::{Engine, EngineSettings};
use crate::limits::*;
use crate::notify::NotifyHub;

/// Per-tenant engines, keyed by the pgwire database name. Each tenant has
/// its own WAL file and compactor task.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    settings: EngineSettings,
}

/// Keep only characters safe in a file name.
fn sanitize(tenant: &str) -> String {
    tenant
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, settings: EngineSettings) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            settings,
        }
    }

    /// Get or lazily create (replaying its WAL) the engine for a tenant.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }
        let safe_name = sanitize(tenant);
        if safe_name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
        }

        // Two connections may race to create the same tenant; the entry lock
        // makes sure only one engine (and one WAL writer) exists.
        let engine = match self.engines.entry(tenant.to_string()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let engine = Arc::new(Engine::new(wal_path, Arc::new(NotifyHub::new()), self.settings)?);
                slot.insert(engine.clone());
                engine
            }
        };

        tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!(tenant, "tenant engine ready");
        Ok(engine)
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }
}
