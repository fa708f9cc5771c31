use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::command::{CommandKind, CommandRegistry};
use super::event::Event;
use crate::error::EsError;

// ============================================================================
// Fold Engine - Generic Event Application
// ============================================================================
//
// Folds an ordered event sequence onto a view's in-memory state:
//
// 1. State is derived from events, never written directly
// 2. Payloads merge by field NAME; unknown fields are ignored and absent
//    fields stay unchanged, so old consumers survive new producers
// 3. Delete tombstones; it never merges
// 4. Commands not registered for a view are skipped, so several view types
//    can share one event stream
//
// The fold is pure with respect to everything but the passed-in view, and
// idempotent under re-delivery of the same event.
//
// ============================================================================

/// A materializable view of an aggregate or projection. Aggregates and
/// projections both implement this; fold semantics come entirely from the
/// command registry plus the name-based payload merge.
pub trait StateView:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Type constant shared by every instance, e.g. `"Site"`. Doubles as
    /// the current-state container name.
    fn aggregate_type() -> &'static str;

    /// The command descriptors this view folds. Built once per process and
    /// looked up by name, never by descriptor identity.
    fn registry() -> &'static CommandRegistry;

    fn id(&self) -> Uuid;
    fn tenant_id(&self) -> Uuid;
    fn set_identity(&mut self, id: Uuid, tenant_id: Uuid);

    fn is_deleted(&self) -> bool;
    fn set_deleted(&mut self, deleted: bool);

    /// Timestamp of the last applied event, used to reject regressions.
    fn last_event_at(&self) -> Option<DateTime<Utc>>;
    fn set_last_event_at(&mut self, at: DateTime<Utc>);
}

/// Apply one event to a view.
///
/// Events must arrive in non-decreasing timestamp order per aggregate; an
/// older event is rejected with `EsError::OutOfOrder` and the view is left
/// untouched. Equal timestamps are allowed so duplicate delivery of the
/// same event stays idempotent.
pub fn apply<V: StateView>(view: &mut V, event: &Event) -> Result<(), EsError> {
    let Some(command) = V::registry().get(&event.command) else {
        tracing::trace!(
            command = %event.command,
            view = V::aggregate_type(),
            "command not registered for this view, skipping"
        );
        return Ok(());
    };

    if let Some(last_applied) = view.last_event_at() {
        if event.timestamp < last_applied {
            return Err(EsError::OutOfOrder {
                event_id: event.id,
                aggregate_root_id: event.aggregate_root_id,
                timestamp: event.timestamp,
                last_applied,
            });
        }
    }

    match command.kind() {
        CommandKind::Create | CommandKind::BulkCreate => {
            view.set_identity(event.aggregate_root_id, event.tenant_id);
            merge_payload(view, &event.payload)?;
        }
        CommandKind::Update => {
            merge_payload(view, &event.payload)?;
        }
        CommandKind::Delete => {
            view.set_deleted(true);
        }
    }

    view.set_last_event_at(event.timestamp);
    Ok(())
}

/// Fold an ordered sequence onto a fresh default instance.
pub fn fold<V: StateView>(events: &[Event]) -> Result<V, EsError> {
    let mut view = V::default();
    for event in events {
        apply(&mut view, event)?;
    }
    Ok(view)
}

/// Name-based field merge.
///
/// Only keys present in the view's own serialized form are copied, so a
/// payload field no view version knows about is ignored rather than
/// rejected. Explicit `null` values are skipped: clearing would force every
/// view field to be nullable for deserialization to succeed, and "absent
/// fields unchanged" already covers the producer that has nothing to say.
fn merge_payload<V: StateView>(
    view: &mut V,
    payload: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), EsError> {
    let mut doc = serde_json::to_value(&*view)?;
    let fields = doc
        .as_object_mut()
        .ok_or_else(|| EsError::Malformed("view does not serialize to an object".into()))?;

    for (name, value) in payload {
        if value.is_null() {
            continue;
        }
        if fields.contains_key(name) {
            fields.insert(name.clone(), value.clone());
        }
    }

    *view = serde_json::from_value(doc)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::command::Command;
    use crate::event_sourcing::core::event::payload_from;
    use chrono::Duration;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::OnceLock;

    #[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
    struct Probe {
        id: Uuid,
        tenant_id: Uuid,
        is_deleted: bool,
        last_event_at: Option<DateTime<Utc>>,
        name: String,
        checks: i64,
    }

    impl StateView for Probe {
        fn aggregate_type() -> &'static str {
            "Probe"
        }

        fn registry() -> &'static CommandRegistry {
            static REGISTRY: OnceLock<CommandRegistry> = OnceLock::new();
            REGISTRY.get_or_init(|| {
                let mut r = CommandRegistry::new();
                r.register("Create_Probe", CommandKind::Create);
                r.register("Update_Probe", CommandKind::Update);
                r.register("Delete_Probe", CommandKind::Delete);
                r
            })
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

    fn command(name: &str) -> Command {
        Probe::registry().lookup(name).unwrap().clone()
    }

    fn history(root: Uuid, tenant: Uuid) -> Vec<Event> {
        let t0 = Utc::now();
        vec![
            Event::new(
                root,
                tenant,
                &command("Create_Probe"),
                payload_from(&[("name", json!("A")), ("checks", json!(1))]),
            )
            .at(t0),
            Event::new(
                root,
                tenant,
                &command("Update_Probe"),
                payload_from(&[("name", json!("B"))]),
            )
            .at(t0 + Duration::seconds(1)),
            Event::new(root, tenant, &command("Delete_Probe"), Payload::default())
                .at(t0 + Duration::seconds(2)),
        ]
    }

    use crate::event_sourcing::core::event::Payload;

    #[test]
    fn create_adopts_identity_and_merges() {
        let root = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let events = history(root, tenant);

        let mut probe = Probe::default();
        apply(&mut probe, &events[0]).unwrap();

        assert_eq!(probe.id, root);
        assert_eq!(probe.tenant_id, tenant);
        assert_eq!(probe.name, "A");
        assert_eq!(probe.checks, 1);
        assert!(!probe.is_deleted);
    }

    #[test]
    fn update_leaves_absent_fields_unchanged() {
        let events = history(Uuid::new_v4(), Uuid::new_v4());
        let probe: Probe = fold(&events[..2]).unwrap();

        assert_eq!(probe.name, "B");
        // `checks` was not in the update payload.
        assert_eq!(probe.checks, 1);
    }

    #[test]
    fn unknown_payload_fields_are_ignored() {
        let root = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let event = Event::new(
            root,
            tenant,
            &command("Create_Probe"),
            payload_from(&[("name", json!("A")), ("added_in_v9", json!(true))]),
        );

        let mut probe = Probe::default();
        apply(&mut probe, &event).unwrap();
        assert_eq!(probe.name, "A");
    }

    #[test]
    fn null_payload_value_leaves_field_unchanged() {
        let root = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let t0 = Utc::now();
        let create = Event::new(
            root,
            tenant,
            &command("Create_Probe"),
            payload_from(&[("name", json!("A"))]),
        )
        .at(t0);
        let update = Event::new(
            root,
            tenant,
            &command("Update_Probe"),
            payload_from(&[("name", serde_json::Value::Null), ("checks", json!(7))]),
        )
        .at(t0 + Duration::seconds(1));

        let probe: Probe = fold(&[create, update]).unwrap();
        assert_eq!(probe.name, "A");
        assert_eq!(probe.checks, 7);
    }

    #[test]
    fn delete_tombstones_without_merging() {
        let events = history(Uuid::new_v4(), Uuid::new_v4());
        let probe: Probe = fold(&events).unwrap();

        assert!(probe.is_deleted);
        // Field values as of the last update survive the tombstone.
        assert_eq!(probe.name, "B");
    }

    #[test]
    fn unregistered_command_is_a_noop() {
        let root = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let foreign = Command::new("Create_Invoice", CommandKind::Create);
        let event = Event::new(root, tenant, &foreign, payload_from(&[("name", json!("X"))]));

        let mut probe = Probe::default();
        apply(&mut probe, &event).unwrap();
        assert_eq!(probe, Probe::default());
    }

    #[test]
    fn out_of_order_event_is_rejected_and_state_untouched() {
        let events = history(Uuid::new_v4(), Uuid::new_v4());
        let mut probe: Probe = fold(&events[..2]).unwrap();
        let before = probe.clone();

        let stale = events[0].clone();
        let err = apply(&mut probe, &stale).unwrap_err();
        assert!(matches!(err, EsError::OutOfOrder { .. }));
        assert_eq!(probe, before);
    }

    #[test]
    fn duplicate_delivery_is_idempotent() {
        let events = history(Uuid::new_v4(), Uuid::new_v4());
        let mut once: Probe = fold(&events).unwrap();
        apply(&mut once, &events[2]).unwrap(); // delete redelivered

        let twice: Probe = fold(&events).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn folding_twice_is_deterministic() {
        let events = history(Uuid::new_v4(), Uuid::new_v4());
        let a: Probe = fold(&events).unwrap();
        let b: Probe = fold(&events).unwrap();
        assert_eq!(a, b);
    }
}
