//! Per-session controller registry
//!
//! A host running several consultations keeps one [`DegradationController`]
//! per call session. Controllers share nothing; the registry only maps
//! session ids to controllers and drives their lifecycle.

use std::fmt;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::controller::DegradationController;
use crate::error::{Error, Result};

/// Identifier of one monitored call session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a session id from an existing call identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random session id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Registry of degradation controllers keyed by session
#[derive(Debug, Default)]
pub struct SessionMonitors {
    controllers: DashMap<SessionId, DegradationController>,
}

impl SessionMonitors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller under its own session id
    pub fn insert(&self, controller: DegradationController) -> Result<SessionId> {
        let session_id = controller.session_id().clone();
        match self.controllers.entry(session_id.clone()) {
            Entry::Occupied(_) => Err(Error::SessionExists {
                session_id: session_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(controller);
                debug!("Registered quality monitor for {}", session_id);
                Ok(session_id)
            }
        }
    }

    /// Look up a session's controller
    pub fn get(&self, session_id: &SessionId) -> Option<DegradationController> {
        self.controllers
            .get(session_id)
            .map(|entry| entry.value().clone())
    }

    fn require(&self, session_id: &SessionId) -> Result<DegradationController> {
        self.get(session_id).ok_or_else(|| Error::SessionNotFound {
            session_id: session_id.to_string(),
        })
    }

    /// Start monitoring a registered session
    pub async fn start(&self, session_id: &SessionId) -> Result<bool> {
        let controller = self.require(session_id)?;
        Ok(controller.start().await)
    }

    /// Stop monitoring a registered session, keeping it registered
    pub async fn stop(&self, session_id: &SessionId) -> Result<()> {
        let controller = self.require(session_id)?;
        controller.stop().await;
        Ok(())
    }

    /// Stop and unregister a session
    pub async fn remove(&self, session_id: &SessionId) -> Result<DegradationController> {
        let (_, controller) =
            self.controllers
                .remove(session_id)
                .ok_or_else(|| Error::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
        controller.stop().await;
        info!("Removed quality monitor for {}", session_id);
        Ok(controller)
    }

    /// Stop every registered session concurrently
    pub async fn stop_all(&self) {
        // Clone out first so no map shard lock is held across an await
        let controllers: Vec<DegradationController> = self
            .controllers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        join_all(controllers.iter().map(|controller| controller.stop())).await;
    }

    /// Sessions whose polling task is running
    pub fn active_sessions(&self) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = self
            .controllers
            .iter()
            .filter(|entry| entry.value().is_monitoring())
            .map(|entry| entry.key().clone())
            .collect();
        sessions.sort();
        sessions
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerPolicy;
    use crate::events::LoggingEventHandler;
    use crate::mitigation::{MitigationApplier, MitigationOutcome, MitigationRequest};
    use crate::stats::{StatsProvider, StatsReport, StatsSnapshot};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct HealthyProvider;

    #[async_trait]
    impl StatsProvider for HealthyProvider {
        async fn get_stats(&self) -> Result<StatsReport> {
            let snapshot = StatsSnapshot::builder().rtt_ms(30.0).build();
            Ok(StatsReport::from_snapshot(&snapshot))
        }
    }

    struct DecliningApplier;

    #[async_trait]
    impl MitigationApplier for DecliningApplier {
        async fn apply(&self, request: MitigationRequest) -> Result<MitigationOutcome> {
            Ok(MitigationOutcome::declined(request.current_level, "not needed"))
        }
    }

    fn controller(id: &str) -> DegradationController {
        DegradationController::for_session(
            SessionId::from(id),
            ControllerPolicy::default(),
            Arc::new(HealthyProvider),
            Arc::new(DecliningApplier),
            Arc::new(LoggingEventHandler),
        )
        .unwrap()
    }

    #[test]
    fn test_session_id_generation() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(SessionId::from("visit-42").to_string(), "visit-42");
    }

    #[test]
    fn test_duplicate_session_rejected() {
        let monitors = SessionMonitors::new();
        monitors.insert(controller("visit-1")).unwrap();
        let err = monitors.insert(controller("visit-1")).unwrap_err();
        assert!(matches!(err, Error::SessionExists { .. }));
        assert_eq!(monitors.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle() {
        let monitors = SessionMonitors::new();
        let a = monitors.insert(controller("visit-a")).unwrap();
        let b = monitors.insert(controller("visit-b")).unwrap();

        assert!(monitors.start(&a).await.unwrap());
        assert!(!monitors.start(&a).await.unwrap());
        assert!(monitors.start(&b).await.unwrap());
        assert_eq!(monitors.active_sessions(), vec![a.clone(), b.clone()]);

        monitors.stop(&a).await.unwrap();
        assert_eq!(monitors.active_sessions(), vec![b.clone()]);

        let removed = monitors.remove(&b).await.unwrap();
        assert!(!removed.is_monitoring());
        assert_eq!(monitors.len(), 1);

        monitors.start(&a).await.unwrap();
        monitors.stop_all().await;
        assert!(monitors.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let monitors = SessionMonitors::new();
        let missing = SessionId::from("nobody");
        assert!(matches!(
            monitors.start(&missing).await,
            Err(Error::SessionNotFound { .. })
        ));
        assert!(monitors.remove(&missing).await.is_err());
        assert!(monitors.get(&missing).is_none());
    }
}
