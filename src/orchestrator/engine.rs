//! Conversation orchestrator for Chatloom
//!
//! Drives one user turn end to end: session resolution, history assembly,
//! provider calls, tool dispatch, and persistence of every exchanged
//! message. The provider loop is bounded so a model that keeps requesting
//! tools can never spin forever.

use crate::config::{Config, ResolvedModel};
use crate::error::Result;
use crate::providers::{CompletionRequest, OpenAiProvider, Provider, ToolCall};
use crate::router::ModelRouter;
use crate::store::{ContextEntry, Session, SessionStore};
use crate::tools::{ToolContext, ToolRegistry};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Maximum provider rounds per user turn
pub const MAX_ROUNDS: usize = 8;

/// Topic used until a summarized one is available
pub const TOPIC_PLACEHOLDER: &str = "New conversation";

/// Answer returned when the round budget is exhausted
pub const FALLBACK_ANSWER: &str = "The conversation failed, please try again later.";

/// Identity of the person a turn belongs to
#[derive(Debug, Clone)]
pub struct UserIdentity {
    /// Stable identifier, keys session ownership
    pub id: String,
    /// Display name forwarded to the provider and tools, if known
    pub name: Option<String>,
}

impl UserIdentity {
    /// Creates an identity with a display name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }

    /// Creates an identity without a display name
    pub fn anonymous(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Conversation engine tying the router, store, and tool registry together
///
/// One instance serves all users. The provider handle is swapped atomically
/// on configuration reload; turns already in flight finish on the old
/// instance.
pub struct Orchestrator {
    provider: RwLock<Arc<dyn Provider>>,
    router: ModelRouter,
    store: SessionStore,
    tools: Arc<ToolRegistry>,
}

impl Orchestrator {
    /// Creates an orchestrator from explicit parts
    pub fn new(
        provider: Arc<dyn Provider>,
        router: ModelRouter,
        store: SessionStore,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            provider: RwLock::new(provider),
            router,
            store,
            tools,
        }
    }

    /// Creates an orchestrator with the default provider, preference store,
    /// and session database locations
    pub fn with_defaults(config: Config, tools: Arc<ToolRegistry>) -> Result<Self> {
        config.validate()?;
        let provider = crate::providers::create_provider()?;
        let router = ModelRouter::new(config, crate::router::PreferenceStore::new()?)?;
        let store = SessionStore::new()?;
        Ok(Self::new(provider, router, store, tools))
    }

    /// Model router backing this orchestrator
    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    /// Session store backing this orchestrator
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Tool registry advertised to the provider
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Runs one user turn and returns the final answer text
    ///
    /// The utterance is persisted, then the provider is called with the
    /// trimmed session history and the advertised tool set. Tool calls are
    /// dispatched per call, their outcomes persisted, and the provider
    /// re-invoked, up to [`MAX_ROUNDS`] rounds. A reply without tool calls
    /// ends the turn; exhaustion yields [`FALLBACK_ANSWER`].
    ///
    /// # Arguments
    ///
    /// * `utterance` - The user's message text
    /// * `identity` - Who is speaking
    /// * `model` - Explicit model name or alias, `None` for the default
    /// * `force_new` - Start a fresh session even when one is active
    ///
    /// # Errors
    ///
    /// Routing errors (`ModelNotFound`, `NoModelsConfigured`), provider
    /// transport failures, and storage failures propagate. Tool failures
    /// never do; they are reported back to the provider as structured
    /// results.
    pub async fn run_turn(
        &self,
        utterance: &str,
        identity: &UserIdentity,
        model: Option<&str>,
        force_new: bool,
    ) -> Result<String> {
        // Routing problems surface before the session is touched
        self.router.resolve(model)?;

        let session = self.resolve_session(utterance, identity, model, force_new).await?;
        info!(
            session_id = %session.session_id,
            user_id = %identity.id,
            "Starting conversation turn"
        );

        self.store.append(
            &session.session_id,
            &ContextEntry::user(utterance, identity.name.clone()),
        )?;

        let ctx = ToolContext {
            session_id: session.session_id.clone(),
            user_id: identity.id.clone(),
            user_name: identity.name.clone(),
        };

        for round in 1..=MAX_ROUNDS {
            let resolved = self.router.resolve(model)?;
            let request = CompletionRequest {
                model: resolved,
                messages: self.trimmed_history(&session.session_id)?,
                tools: self.tools.advertised()?,
                user: identity.name.clone(),
            };

            let provider = self.current_provider().await;
            let response = provider.complete(request).await?;

            let tokens = response.total_tokens();
            if tokens > 0 {
                self.store.add_token_usage(&session.session_id, tokens as i64)?;
            }

            let reply = response.message;
            let content = reply.content.unwrap_or_default();
            self.store.append(
                &session.session_id,
                &ContextEntry::assistant(
                    content.clone(),
                    reply.reasoning_content,
                    reply.tool_calls.clone(),
                ),
            )?;

            let calls = match reply.tool_calls {
                Some(calls) if !calls.is_empty() => calls,
                _ => {
                    debug!(round, "Turn finished without tool calls");
                    return Ok(content);
                }
            };

            debug!(round, count = calls.len(), "Dispatching tool calls");
            for call in &calls {
                let outcome = self.dispatch_call(call, &ctx).await;
                self.store.append(
                    &session.session_id,
                    &ContextEntry::tool(&call.id, outcome.to_string()),
                )?;
            }
        }

        warn!(
            session_id = %session.session_id,
            rounds = MAX_ROUNDS,
            "Round budget exhausted, returning fallback answer"
        );
        Ok(FALLBACK_ANSWER.to_string())
    }

    /// Adopts a new configuration
    ///
    /// The router swaps its model table and reconciles the default-model
    /// preference, then the provider handle is replaced. Turns already in
    /// flight finish on the old provider.
    pub async fn reload(&self, new_config: Config) -> Result<()> {
        new_config.validate()?;
        self.router.reload(new_config)?;
        let provider: Arc<dyn Provider> = Arc::new(OpenAiProvider::new()?);
        *self.provider.write().await = provider;
        info!("Configuration reloaded");
        Ok(())
    }

    async fn current_provider(&self) -> Arc<dyn Provider> {
        Arc::clone(&*self.provider.read().await)
    }

    /// Finds or creates the session this turn runs in
    async fn resolve_session(
        &self,
        utterance: &str,
        identity: &UserIdentity,
        model: Option<&str>,
        force_new: bool,
    ) -> Result<Session> {
        if !force_new {
            if let Some(session) = self.store.get_active(&identity.id)? {
                if session.topic == TOPIC_PLACEHOLDER {
                    self.spawn_topic_refresh(&session.session_id, utterance, model);
                }
                return Ok(session);
            }
        }

        let resolved = self.router.resolve(model)?;
        let provider = self.current_provider().await;
        let topic = summarize_topic(provider.as_ref(), resolved, utterance)
            .await
            .unwrap_or_else(|| TOPIC_PLACEHOLDER.to_string());

        let session = self.store.create(&identity.id, &topic)?;
        info!(
            session_id = %session.session_id,
            topic = %session.topic,
            "Created session"
        );
        Ok(session)
    }

    /// Retries topic summarization in the background for a session still
    /// carrying the placeholder; failures are logged and dropped
    fn spawn_topic_refresh(&self, session_id: &str, utterance: &str, model: Option<&str>) {
        let resolved = match self.router.resolve(model) {
            Ok(resolved) => resolved,
            Err(_) => return,
        };
        let store = self.store.clone();
        let provider = match self.provider.try_read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(_) => return,
        };
        let session_id = session_id.to_string();
        let utterance = utterance.to_string();

        tokio::spawn(async move {
            if let Some(topic) = summarize_topic(provider.as_ref(), resolved, &utterance).await {
                if let Err(e) = store.set_topic(&session_id, &topic) {
                    debug!(session_id = %session_id, error = %e, "Topic refresh not persisted");
                }
            }
        });
    }

    /// Session history as provider messages, trimmed to the configured
    /// context length (oldest entries dropped first)
    fn trimmed_history(&self, session_id: &str) -> Result<Vec<crate::providers::Message>> {
        let entries = self.store.load_ordered(session_id)?;
        let keep = self.router.context_length();
        let skip = entries.len().saturating_sub(keep);
        Ok(entries[skip..].iter().map(ContextEntry::to_message).collect())
    }

    /// Dispatches one tool call and folds the result into the outcome
    /// envelope the provider sees
    ///
    /// Success becomes `{"ok":true,"data":..}`; a null result and every
    /// failure become `{"ok":false,"error":..}`. One failing call never
    /// affects its siblings.
    async fn dispatch_call(&self, call: &ToolCall, ctx: &ToolContext) -> serde_json::Value {
        match self
            .tools
            .dispatch(&call.function.name, &call.function.arguments, ctx)
            .await
        {
            Ok(serde_json::Value::Null) => json!({"ok": false, "error": "No response"}),
            Ok(value) => json!({"ok": true, "data": value}),
            Err(e) => {
                warn!(tool = %call.function.name, error = %e, "Tool call failed");
                json!({"ok": false, "error": e.to_string()})
            }
        }
    }
}

/// Asks the provider for a short conversation title
///
/// Single attempt; any failure or empty reply yields `None`.
async fn summarize_topic(
    provider: &dyn Provider,
    model: ResolvedModel,
    utterance: &str,
) -> Option<String> {
    let prompt = format!(
        "Summarize the following message as a conversation title of at most \
         twelve words. Output only the title.\n\n{}",
        utterance
    );

    match provider.complete(CompletionRequest::single(model, prompt)).await {
        Ok(response) => {
            let topic = response
                .message
                .content
                .map(|c| c.trim().to_string())
                .unwrap_or_default();
            if topic.is_empty() {
                None
            } else {
                Some(topic)
            }
        }
        Err(e) => {
            debug!(error = %e, "Topic summarization failed");
            None
        }
    }
}
