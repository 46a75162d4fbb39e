use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::compactor;
use crate::engine::{Engine, EngineConfig};
use crate::limits::*;
use crate::report::ReportService;

/// One engine per studio database. Tenant = database name from the pgwire
/// connection; each gets its own WAL file and compactor task.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    engine_config: EngineConfig,
    reports: ReportService,
}

impl TenantManager {
    /// Must be called from inside a Tokio runtime (spawns the report worker).
    pub fn new(data_dir: PathBuf, compact_threshold: u64, engine_config: EngineConfig) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            engine_config,
            reports: ReportService::spawn(),
        }
    }

    pub fn reports(&self) -> &ReportService {
        &self.reports
    }

    /// Get or lazily create the engine for `tenant`.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        let safe_name = sanitize(tenant);
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        // Two connections may race here; the entry API keeps the first engine.
        let engine = match self.engines.entry(tenant.to_string()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let engine = Arc::new(Engine::new(wal_path, self.engine_config)?);
                slot.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        info!("opened studio database {tenant:?}");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

/// Keep only characters safe in a file name.
fn sanitize(tenant: &str) -> String {
    tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
