use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::error::EsError;
use crate::event_sourcing::core::{
    payload_from, Command, CommandKind, CommandRegistry, Event, ProjectionView, SeedContext,
    StateView,
};

// ============================================================================
// Site Domain - Monitored Site Aggregate & Dashboard Projection
// ============================================================================
//
// Reference aggregate for the runtime: a monitored site with a name, a
// region, and a running check counter. Two views fold the same stream:
//
// - Site:          the current-state materialization, field-for-field
// - SiteDashboard: a read view that additionally carries the region row
//                  fetched from the Site container when first established
//
// ============================================================================

/// Commands understood by the Site aggregate. Built once per process.
pub fn site_commands() -> &'static CommandRegistry {
    static REGISTRY: OnceLock<CommandRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut r = CommandRegistry::new();
        r.register("Create_Site", CommandKind::Create);
        r.register("BulkCreate_Site", CommandKind::BulkCreate);
        r.register("Update_Site", CommandKind::Update);
        r.register("Delete_Site", CommandKind::Delete);
        r
    })
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct Site {
    // Identity
    pub id: Uuid,
    pub tenant_id: Uuid,

    // Current state (derived from events)
    pub name: String,
    pub region: String,
    pub checks: i64,

    // Fold bookkeeping
    pub is_deleted: bool,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl StateView for Site {
    fn aggregate_type() -> &'static str {
        "Site"
    }

    fn registry() -> &'static CommandRegistry {
        site_commands()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    fn set_identity(&mut self, id: Uuid, tenant_id: Uuid) {
        self.id = id;
        self.tenant_id = tenant_id;
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn set_deleted(&mut self, deleted: bool) {
        self.is_deleted = deleted;
    }

    fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.last_event_at
    }

    fn set_last_event_at(&mut self, at: DateTime<Utc>) {
        self.last_event_at = Some(at);
    }
}

// ============================================================================
// Site Dashboard Projection
// ============================================================================

/// Synthetic command carrying the externally fetched seed data. Update
/// semantics: it merges by name like any other payload.
const SEED_SITE_DASHBOARD: &str = "Seed_SiteDashboard";

fn dashboard_commands() -> &'static CommandRegistry {
    static REGISTRY: OnceLock<CommandRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut r = CommandRegistry::new();
        r.register("Create_Site", CommandKind::Create);
        r.register("BulkCreate_Site", CommandKind::BulkCreate);
        r.register("Update_Site", CommandKind::Update);
        r.register("Delete_Site", CommandKind::Delete);
        r.register(SEED_SITE_DASHBOARD, CommandKind::Update);
        r
    })
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteDashboard {
    pub id: Uuid,
    pub tenant_id: Uuid,

    pub name: String,
    /// Seeded from the Site current-state container, not from the trigger.
    pub region: String,
    pub checks: i64,

    pub is_deleted: bool,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl StateView for SiteDashboard {
    fn aggregate_type() -> &'static str {
        "SiteDashboard"
    }

    fn registry() -> &'static CommandRegistry {
        dashboard_commands()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    fn set_identity(&mut self, id: Uuid, tenant_id: Uuid) {
        self.id = id;
        self.tenant_id = tenant_id;
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn set_deleted(&mut self, deleted: bool) {
        self.is_deleted = deleted;
    }

    fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.last_event_at
    }

    fn set_last_event_at(&mut self, at: DateTime<Utc>) {
        self.last_event_at = Some(at);
    }
}

#[async_trait]
impl ProjectionView for SiteDashboard {
    fn container_name() -> &'static str {
        "SiteDashboard"
    }

    /// Fetch the site's region from the Site current-state container and
    /// wrap it in a seed event. The seed event is pinned to the trigger's
    /// timestamp so folding it directly after the trigger never regresses
    /// the ordering guard.
    async fn seed_external_data(
        &self,
        ctx: &SeedContext,
        trigger: &Event,
    ) -> Result<Event, EsError> {
        let doc = ctx
            .state
            .load(
                Site::aggregate_type(),
                trigger.tenant_id,
                trigger.aggregate_root_id,
            )
            .await?
            .ok_or_else(|| {
                EsError::SeedFailed(format!(
                    "no Site row for aggregate {} in tenant {}",
                    trigger.aggregate_root_id, trigger.tenant_id
                ))
            })?;
        let site: Site = serde_json::from_value(doc)
            .map_err(|e| EsError::SeedFailed(format!("Site row does not parse: {e}")))?;

        let seed = Self::registry().lookup(SEED_SITE_DASHBOARD)?;
        Ok(Event::new(
            trigger.aggregate_root_id,
            trigger.tenant_id,
            seed,
            payload_from(&[("region", json!(site.region))]),
        )
        .at(trigger.timestamp))
    }
}

/// Caller-side descriptor helper.
pub fn site_command(name: &str) -> Result<&'static Command, EsError> {
    site_commands().lookup(name)
}
