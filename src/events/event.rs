//! Lifecycle events published on the [`EventBus`](super::EventBus).

use std::fmt;

use crate::domain::{Resource, ResourceKind};

/// Dispatch tag of an [`Event`]; handlers register for one or more of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Discovered(ResourceKind),
    Created(ResourceKind),
    Updated(ResourceKind),
    Unchanged(ResourceKind),
    PostProcessRequested,
}

impl EventKind {
    /// The terminal outcomes a resource of `kind` can report
    pub fn outcomes(kind: ResourceKind) -> [EventKind; 3] {
        [EventKind::Created(kind), EventKind::Updated(kind), EventKind::Unchanged(kind)]
    }

    /// Terminal outcomes for every resource kind
    pub fn all_outcomes() -> Vec<EventKind> {
        ResourceKind::ALL.into_iter().flat_map(EventKind::outcomes).collect()
    }

    pub fn resource_kind(&self) -> Option<ResourceKind> {
        match self {
            EventKind::Discovered(kind)
            | EventKind::Created(kind)
            | EventKind::Updated(kind)
            | EventKind::Unchanged(kind) => Some(*kind),
            EventKind::PostProcessRequested => None,
        }
    }

    /// Outcome label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Discovered(_) => "discovered",
            EventKind::Created(_) => "created",
            EventKind::Updated(_) => "updated",
            EventKind::Unchanged(_) => "unchanged",
            EventKind::PostProcessRequested => "post_process_requested",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resource_kind() {
            Some(kind) => write!(f, "{}.{}", kind, self.label()),
            None => f.write_str(self.label()),
        }
    }
}

/// What reconciling one resource against the backend did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Something that happened to a resource. Events are never mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Ingested from a manifest, not reconciled yet
    Discovered(Resource),
    Created(Resource),
    Updated(Resource),
    Unchanged(Resource),
    /// Every discovery has been published
    PostProcessRequested,
}

impl Event {
    /// The terminal event announcing `outcome` for `resource`.
    pub fn reconciled<R: Into<Resource>>(outcome: ReconcileOutcome, resource: R) -> Self {
        let resource = resource.into();
        match outcome {
            ReconcileOutcome::Created => Event::Created(resource),
            ReconcileOutcome::Updated => Event::Updated(resource),
            ReconcileOutcome::Unchanged => Event::Unchanged(resource),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Discovered(resource) => EventKind::Discovered(resource.kind()),
            Event::Created(resource) => EventKind::Created(resource.kind()),
            Event::Updated(resource) => EventKind::Updated(resource.kind()),
            Event::Unchanged(resource) => EventKind::Unchanged(resource.kind()),
            Event::PostProcessRequested => EventKind::PostProcessRequested,
        }
    }

    pub fn resource(&self) -> Option<&Resource> {
        match self {
            Event::Discovered(resource)
            | Event::Created(resource)
            | Event::Updated(resource)
            | Event::Unchanged(resource) => Some(resource),
            Event::PostProcessRequested => None,
        }
    }

    /// Final path of the resource the event describes
    pub fn path(&self) -> Option<String> {
        self.resource().map(Resource::absolute_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PasswordPolicy;

    #[test]
    fn test_event_kind_follows_payload() {
        let policy = PasswordPolicy::with_charset("strong", 20, "abc");
        let event = Event::Created(policy.into());

        assert_eq!(event.kind(), EventKind::Created(ResourceKind::PasswordPolicy));
        assert_eq!(event.path().as_deref(), Some("strong"));
        assert_eq!(event.kind().to_string(), "PasswordPolicy.created");
        assert_eq!(Event::PostProcessRequested.kind().resource_kind(), None);
    }

    #[test]
    fn test_reconciled_event_matches_outcome() {
        let policy = PasswordPolicy::with_charset("strong", 20, "abc");

        let event = Event::reconciled(ReconcileOutcome::Updated, policy.clone());
        assert_eq!(event, Event::Updated(policy.clone().into()));
        let event = Event::reconciled(ReconcileOutcome::Unchanged, policy);
        assert_eq!(event.kind(), EventKind::Unchanged(ResourceKind::PasswordPolicy));
    }

    #[test]
    fn test_all_outcomes_cover_every_kind() {
        let outcomes = EventKind::all_outcomes();
        assert_eq!(outcomes.len(), 15);
        assert!(outcomes.contains(&EventKind::Unchanged(ResourceKind::Issuer)));
        assert!(outcomes.contains(&EventKind::Updated(ResourceKind::SecretsEngine)));
        assert!(outcomes.contains(&EventKind::Created(ResourceKind::PkiRole)));
        assert!(!outcomes.contains(&EventKind::Discovered(ResourceKind::Issuer)));
    }
}
