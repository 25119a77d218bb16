use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use globaliq_core::audit::{AuditContext, AuditSink};
use globaliq_core::config::{AppConfig, ServerConfig};
use globaliq_core::domain::collection::{CollectionState, CollectionStatus};
use globaliq_core::domain::route::{Route, RoutingDecision};
use globaliq_core::errors::{ApplicationError, InterfaceError};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::collector::{start_prompt, Collector, CollectorReply};
use crate::confirmation::ReplyTokens;
use crate::llm::{ChatCompletionsClient, LlmClient};
use crate::orchestrator::{
    FallbackResponder, HealthMonitor, HostAllowList, HttpServiceClient, Orchestrator,
    OrchestratorSettings, TaggedResult,
};
use crate::router::{tokenize, KeywordSets, Router};

const BOTH_PROMPT: &str = "This touches both mobility policy and compensation. Which analysis \
                           should I start with?\n1. Policy\n2. Compensation";
const GUIDANCE_INTRO: &str = "Hi, I'm GlobalIQ. I help plan international assignments. I can \
                              estimate relocation compensation packages, including salary, cost \
                              of living, housing and hardship allowances, and I can check global \
                              mobility policy such as visas, immigration and compliance. Tell me \
                              about the move you are planning.";
const GUIDANCE_HINT: &str =
    "I can help with relocation compensation estimates or mobility policy questions. Which would \
     you like?";

/// Conversation state owned by one session. Mutated by one turn at a time.
#[derive(Clone, Debug, Default)]
pub struct Session {
    collection: Option<CollectionState>,
    pending_choice: bool,
    last_route: Option<Route>,
    guidance_intro_shown: bool,
}

impl Session {
    pub fn collection(&self) -> Option<&CollectionState> {
        self.collection.as_ref()
    }

    pub fn last_route(&self) -> Option<Route> {
        self.last_route
    }
}

pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(1_800);
const DEFAULT_MAX_SESSIONS: usize = 10_000;

struct SessionEntry {
    handle: SessionHandle,
    last_active: Instant,
}

/// Live sessions keyed by id. The map lock is never held across an await.
///
/// Sessions idle for longer than `idle_ttl` are dropped on access and by [`SessionStore::sweep`];
/// at capacity the least recently active session makes room for a new one.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_IDLE, DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn new(idle_ttl: Duration, max_sessions: usize) -> Self {
        Self { sessions: RwLock::default(), idle_ttl, max_sessions: max_sessions.max(1) }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.session_idle(), config.max_sessions)
    }

    pub fn create(&self) -> String {
        let session_id = Uuid::new_v4().to_string();
        let now = Instant::now();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        self.evict_idle(&mut sessions, now);
        if sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_active)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                sessions.remove(&oldest);
                info!(
                    event_name = "runtime.session_evicted",
                    correlation_id = %oldest,
                    reason = "capacity",
                );
            }
        }
        sessions.insert(
            session_id.clone(),
            SessionEntry { handle: SessionHandle::default(), last_active: now },
        );
        session_id
    }

    /// Returns the session and marks it active. An idle-expired session is dropped instead.
    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let entry = sessions.get_mut(session_id)?;
        if now.saturating_duration_since(entry.last_active) >= self.idle_ttl {
            sessions.remove(session_id);
            info!(event_name = "runtime.session_evicted", correlation_id = %session_id, reason = "idle");
            return None;
        }
        entry.last_active = now;
        Some(Arc::clone(&entry.handle))
    }

    pub fn remove(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(session_id).is_some()
    }

    /// Drops every idle-expired session and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        self.evict_idle(&mut sessions, Instant::now())
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_idle(&self, sessions: &mut HashMap<String, SessionEntry>, now: Instant) -> usize {
        let before = sessions.len();
        sessions.retain(|_, entry| now.saturating_duration_since(entry.last_active) < self.idle_ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(
                event_name = "runtime.sessions_evicted",
                correlation_id = "session_sweep",
                evicted,
                reason = "idle",
            );
        }
        evicted
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnReply {
    pub session_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CollectionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaggedResult>,
}

impl TurnReply {
    fn new(session_id: &str, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.to_string(),
            message: message.into(),
            routing: None,
            status: None,
            result: None,
        }
    }
}

/// Drives one conversation turn through routing, collection and dispatch.
pub struct AgentRuntime {
    router: Router,
    collector: Collector,
    orchestrator: Arc<Orchestrator>,
    turn_deadline: Duration,
}

impl AgentRuntime {
    pub fn new(
        router: Router,
        collector: Collector,
        orchestrator: Arc<Orchestrator>,
        turn_deadline: Duration,
    ) -> Self {
        Self { router, collector, orchestrator, turn_deadline }
    }

    pub fn from_config(config: &AppConfig, audit: Arc<dyn AuditSink>) -> Result<Self> {
        let llm: Arc<dyn LlmClient> = Arc::new(ChatCompletionsClient::from_config(&config.llm)?);
        let schemas = Arc::new(config.schema_registry().context("invalid schema configuration")?);
        let services = Arc::new(HttpServiceClient::new()?);

        let router = Router::new(
            KeywordSets::from_config(&config.routing),
            Arc::clone(&llm),
            Duration::from_secs(config.routing.classification_timeout_secs),
            Arc::clone(&audit),
        );
        let collector = Collector::new(
            Arc::clone(&llm),
            Arc::clone(&schemas),
            ReplyTokens::from_config(&config.collector),
            Duration::from_secs(config.llm.timeout_secs),
            Arc::clone(&audit),
        );
        let health = Arc::new(
            HealthMonitor::new(services.clone(), config.health.ttl(), config.health.probe_timeout())
                .with_audit_sink(Arc::clone(&audit)),
        );
        let orchestrator = Orchestrator::new(
            config.services.endpoints(),
            schemas,
            HostAllowList::new(&config.security.allowed_hosts),
            health,
            services,
            FallbackResponder::new(llm),
            OrchestratorSettings::from_config(&config.dispatch),
            audit,
        );

        Ok(Self::new(router, collector, Arc::new(orchestrator), config.dispatch.turn_deadline()))
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Runs one turn on a copy of the session and commits it only when the turn succeeds.
    pub async fn handle_turn(
        &self,
        session_id: &str,
        session: &SessionHandle,
        text: &str,
        correlation_id: &str,
    ) -> Result<TurnReply, InterfaceError> {
        let mut guard = session.lock().await;
        let mut working = guard.clone();
        let audit = AuditContext::new(
            Some(session_id.to_string()),
            working.collection.as_ref().map(CollectionState::route).or(working.last_route),
            correlation_id,
        );

        let outcome =
            tokio::time::timeout(self.turn_deadline, self.process(&mut working, session_id, text, &audit))
                .await;
        match outcome {
            Ok(Ok(reply)) => {
                *guard = working;
                Ok(reply)
            }
            Ok(Err(error)) => Err(error),
            Err(_) => {
                let error = ApplicationError::Timeout {
                    stage: "turn",
                    deadline_ms: self.turn_deadline.as_millis(),
                };
                Err(self.fail(error, &audit))
            }
        }
    }

    async fn process(
        &self,
        session: &mut Session,
        session_id: &str,
        text: &str,
        audit: &AuditContext,
    ) -> Result<TurnReply, InterfaceError> {
        if let Some(state) = session.collection.take() {
            let (reply, _) = self.advance(session, state, session_id, text, audit).await?;
            return Ok(reply);
        }

        if std::mem::take(&mut session.pending_choice) {
            if let Some(route) = parse_choice(text) {
                info!(
                    event_name = "runtime.route_chosen",
                    correlation_id = %audit.correlation_id,
                    route = route.as_str(),
                );
                let state = self.collector.start(route).map_err(|error| self.fail(error, audit))?;
                let message = self.opening(route)?;
                session.last_route = Some(route);
                session.collection = Some(state);
                let mut reply = TurnReply::new(session_id, message);
                reply.status = Some(CollectionStatus::Init);
                return Ok(reply);
            }
        }

        let decision = self.router.route(text, session.last_route, audit).await;
        let mut reply = match decision.route {
            Route::Both => {
                session.pending_choice = true;
                TurnReply::new(session_id, BOTH_PROMPT)
            }
            Route::Guidance => {
                let message = if session.guidance_intro_shown { GUIDANCE_HINT } else { GUIDANCE_INTRO };
                session.guidance_intro_shown = true;
                TurnReply::new(session_id, message)
            }
            route @ (Route::Policy | Route::Compensation) => {
                session.last_route = Some(route);
                let state = self.collector.start(route).map_err(|error| self.fail(error, audit))?;
                let (mut reply, follow_up) =
                    self.advance(session, state, session_id, text, audit).await?;
                let nothing_filled = session
                    .collection
                    .as_ref()
                    .is_some_and(|state| state.fields().values().all(Option::is_none));
                if follow_up && nothing_filled {
                    reply.message = self.opening(route)?;
                }
                reply
            }
        };
        reply.routing = Some(decision);
        Ok(reply)
    }

    /// Feeds `text` to the collector. The flag is set when the reply asks for missing details.
    async fn advance(
        &self,
        session: &mut Session,
        state: CollectionState,
        session_id: &str,
        text: &str,
        audit: &AuditContext,
    ) -> Result<(TurnReply, bool), InterfaceError> {
        let route = state.route();
        let (next, reply) = self
            .collector
            .collect(&state, text, audit)
            .await
            .map_err(|error| self.fail(error, audit))?;
        let status = next.status();
        let follow_up = matches!(reply, CollectorReply::FollowUp { .. });

        let mut turn = TurnReply::new(session_id, reply.prompt());
        turn.status = Some(status);
        match reply {
            CollectorReply::Confirmed { fields, .. } => {
                let result = self.orchestrator.execute(route, &fields, None, audit).await?;
                turn.result = Some(result);
            }
            CollectorReply::Cancelled { .. } => {}
            CollectorReply::FollowUp { .. }
            | CollectorReply::Confirmation { .. }
            | CollectorReply::Rephrase { .. } => session.collection = Some(next),
        }
        Ok((turn, follow_up))
    }

    fn opening(&self, route: Route) -> Result<String, InterfaceError> {
        self.collector
            .schemas()
            .get(route)
            .map(start_prompt)
            .ok_or_else(|| {
                InterfaceError::from(ApplicationError::Configuration(format!(
                    "no schema registered for route `{route}`"
                )))
            })
    }

    fn fail(&self, error: ApplicationError, audit: &AuditContext) -> InterfaceError {
        warn!(
            event_name = "runtime.turn_failed",
            correlation_id = %audit.correlation_id,
            error_kind = error.kind(),
            error = %error,
            "turn failed"
        );
        error.into_interface(audit.correlation_id.clone())
    }
}

fn parse_choice(text: &str) -> Option<Route> {
    let words = tokenize(text);
    let policy = words.iter().any(|word| matches!(word.as_str(), "1" | "policy" | "policies"));
    let compensation =
        words.iter().any(|word| matches!(word.as_str(), "2" | "compensation" | "pay" | "salary"));
    match (policy, compensation) {
        (true, false) => Some(Route::Policy),
        (false, true) => Some(Route::Compensation),
        _ => None,
    }
}
