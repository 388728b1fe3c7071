//! The pipeline coordinator.
//!
//! `summarize` drives validate → cache → fetch → filter → prompt → LLM →
//! parse → persist, with a single-flight guarantee per request fingerprint:
//! concurrent identical requests share one pipeline run and all receive its
//! result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{Duration, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use recap_core::config::{EngineConfig, RecapConfig};
use recap_core::types::{GuildConfig, NormalizedMessage, Participant, Summary};
use recap_core::{RecapError, Result, SummaryRequest};
use recap_source::MessageSource;
use recap_store::Store;

use crate::cache::SummaryCache;
use crate::filter::{filter_messages, FilterOptions};
use crate::llm::{CompletionRequest, LlmClient};
use crate::parser::parse_response;
use crate::prompt::{PromptBuilder, PromptContext};

/// Result slot for one request in a [`SummaryEngine::batch_summarize`] call.
pub type BatchOutcome = std::result::Result<Summary, RecapError>;

/// What a finished flight broadcasts to its waiters.
#[derive(Clone)]
enum FlightOutcome {
    Done(Summary),
    Failed(Arc<RecapError>),
}

/// Cost preview returned by [`SummaryEngine::estimate_cost`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct CostEstimate {
    pub estimated_prompt_tokens: usize,
    pub max_output_tokens: u32,
    pub estimated_cost_usd: f64,
    pub message_count: usize,
}

pub struct SummaryEngine {
    source: Arc<dyn MessageSource>,
    store: Arc<Store>,
    cache: SummaryCache,
    llm: Arc<LlmClient>,
    prompt: PromptBuilder,
    max_window: Duration,
    inflight: Mutex<HashMap<String, broadcast::Sender<FlightOutcome>>>,
}

impl SummaryEngine {
    pub fn new(
        source: Arc<dyn MessageSource>,
        store: Arc<Store>,
        llm: Arc<LlmClient>,
        config: &RecapConfig,
    ) -> Self {
        let engine_cfg: &EngineConfig = &config.engine;
        let cache = SummaryCache::new(
            Arc::clone(&store),
            Duration::seconds(engine_cfg.cache_memory_ttl_secs),
            engine_cfg.cache_memory_max,
            engine_cfg.cache_store_ttl_secs,
        );
        Self {
            source,
            store,
            cache,
            prompt: PromptBuilder::new(config.llm.max_prompt_tokens),
            llm,
            max_window: Duration::days(engine_cfg.max_window_days),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn llm(&self) -> &Arc<LlmClient> {
        &self.llm
    }

    /// Summarize one request. See module docs for the pipeline stages.
    pub async fn summarize(
        &self,
        request: SummaryRequest,
        cancel: &CancellationToken,
    ) -> Result<Summary> {
        self.summarize_inner(request, cancel, false).await
    }

    /// Like [`summarize`](Self::summarize), but on `PromptTooLarge` halves
    /// the window once (keeping the recent half) and retries.
    pub async fn summarize_adaptive(
        &self,
        request: SummaryRequest,
        cancel: &CancellationToken,
    ) -> Result<Summary> {
        self.summarize_inner(request, cancel, true).await
    }

    async fn summarize_inner(
        &self,
        request: SummaryRequest,
        cancel: &CancellationToken,
        adaptive: bool,
    ) -> Result<Summary> {
        debug!(channel = %request.channel_id, stage = "validating", "summarize");
        request.validate()?;
        if request.end - request.start > self.max_window {
            return Err(RecapError::UserInput(format!(
                "time window exceeds the {}-day maximum",
                self.max_window.num_days()
            )));
        }

        let fingerprint = request.fingerprint();
        if let Some(hit) = self.cache.get(&fingerprint)? {
            info!(%fingerprint, "summary served from cache");
            return Ok(hit);
        }

        // Single-flight: either become the dispatcher for this fingerprint
        // or wait on whoever already is.
        let mut rx = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(&fingerprint) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(4);
                    inflight.insert(fingerprint.clone(), tx);
                    None
                }
            }
        };

        if let Some(rx) = rx.as_mut() {
            debug!(%fingerprint, "awaiting in-flight identical request");
            return match rx.recv().await {
                Ok(FlightOutcome::Done(summary)) => Ok(summary),
                Ok(FlightOutcome::Failed(err)) => Err(clone_error(&err)),
                Err(_) => Err(RecapError::Internal(
                    "in-flight request dropped without a result".to_string(),
                )),
            };
        }

        // Dispatcher path: run the pipeline without holding any lock, then
        // release the slot and deliver to waiters.
        let result = self
            .run_pipeline(&request, &fingerprint, cancel, adaptive)
            .await;

        let tx = self.inflight.lock().unwrap().remove(&fingerprint);
        if let Some(tx) = tx {
            let outcome = match &result {
                Ok(summary) => FlightOutcome::Done(summary.clone()),
                Err(e) => FlightOutcome::Failed(Arc::new(clone_error(e))),
            };
            let _ = tx.send(outcome);
        }
        result
    }

    async fn run_pipeline(
        &self,
        request: &SummaryRequest,
        fingerprint: &str,
        cancel: &CancellationToken,
        adaptive: bool,
    ) -> Result<Summary> {
        let started = Instant::now();

        debug!(%fingerprint, stage = "fetching", "summarize");
        let raw = self
            .source
            .fetch_range(&request.channel_id, request.start, request.end, None)
            .await?;

        debug!(%fingerprint, stage = "filtering", count = raw.len(), "summarize");
        let messages = filter_messages(
            raw,
            &FilterOptions {
                include_bots: request.options.include_bots,
                excluded_users: request.options.excluded_users.clone(),
            },
        );
        if messages.len() < request.options.min_messages {
            return Err(RecapError::InsufficientContent {
                found: messages.len(),
                required: request.options.min_messages,
            });
        }

        debug!(%fingerprint, stage = "building", "summarize");
        let context = self.prompt_context(request, &messages).await;
        let built = match self.prompt.build(
            &messages,
            &context,
            request.options.length,
            request.options.max_output_tokens,
        ) {
            Ok(built) => built,
            Err(RecapError::PromptTooLarge { .. }) if adaptive => {
                // One-shot narrowing: keep the recent half of the window.
                let midpoint = request.start + (request.end - request.start) / 2;
                warn!(%fingerprint, "prompt too large, narrowing window to recent half");
                let mut narrowed = request.clone();
                narrowed.start = midpoint;
                return Box::pin(self.summarize_inner(narrowed, cancel, false)).await;
            }
            Err(e) => return Err(e),
        };

        debug!(%fingerprint, stage = "dispatching", tokens = built.estimated_tokens, "summarize");
        if cancel.is_cancelled() {
            return Err(RecapError::Aborted);
        }
        let completion = self
            .llm
            .complete(
                CompletionRequest {
                    model: self.llm.resolve_model(request.options.model.as_deref()),
                    system: built.system,
                    user: built.user,
                    temperature: request.options.temperature,
                    max_tokens: request.options.max_output_tokens,
                },
                cancel,
            )
            .await?;

        debug!(%fingerprint, stage = "parsing", "summarize");
        let parsed = parse_response(&completion.text);

        let mut warnings = parsed.warnings.clone();
        if built.elided > 0 {
            warnings.push(format!("{} messages elided to fit the prompt budget", built.elided));
        }

        let summary = Summary {
            id: Uuid::new_v4().to_string(),
            channel_id: request.channel_id.clone(),
            guild_id: request.guild_id.clone(),
            start: request.start,
            end: request.end,
            message_count: messages.len(),
            body: parsed.body,
            key_points: parsed.key_points,
            action_items: parsed.action_items,
            technical_terms: parsed.technical_terms,
            participants: assemble_participants(&messages, &parsed.participants),
            metadata: recap_core::types::GenerationMetadata {
                cost_usd: completion.cost_usd,
                model: completion.model,
                prompt_tokens: completion.prompt_tokens,
                completion_tokens: completion.completion_tokens,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            created_at: Utc::now(),
            warnings,
        };

        debug!(%fingerprint, stage = "persisting", summary_id = %summary.id, "summarize");
        self.store.save_summary(&summary)?;
        self.cache.put(fingerprint, &summary)?;

        info!(
            %fingerprint,
            summary_id = %summary.id,
            messages = summary.message_count,
            duration_ms = summary.metadata.duration_ms,
            "summary generated"
        );
        Ok(summary)
    }

    /// Deduplicate by fingerprint, run concurrently under the LLM semaphore,
    /// and return results in input order.
    pub async fn batch_summarize(
        self: &Arc<Self>,
        requests: Vec<SummaryRequest>,
        cancel: &CancellationToken,
    ) -> Vec<BatchOutcome> {
        let fingerprints: Vec<String> = requests.iter().map(|r| r.fingerprint()).collect();

        let mut unique: HashMap<String, SummaryRequest> = HashMap::new();
        for (fp, req) in fingerprints.iter().zip(requests.into_iter()) {
            unique.entry(fp.clone()).or_insert(req);
        }

        let mut set = JoinSet::new();
        for (fp, req) in unique {
            let engine = Arc::clone(self);
            let cancel = cancel.clone();
            set.spawn(async move { (fp, engine.summarize(req, &cancel).await) });
        }

        let mut by_fingerprint: HashMap<String, BatchOutcome> = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((fp, outcome)) => {
                    by_fingerprint.insert(fp, outcome);
                }
                Err(e) => warn!(error = %e, "batch summarize task panicked"),
            }
        }

        fingerprints
            .into_iter()
            .map(|fp| match by_fingerprint.get(&fp) {
                Some(Ok(summary)) => Ok(summary.clone()),
                Some(Err(e)) => Err(clone_error(e)),
                None => Err(RecapError::Internal("batch slot missing".to_string())),
            })
            .collect()
    }

    /// Token/cost preview. Runs fetch + filter + prompt but never the LLM.
    pub async fn estimate_cost(&self, request: SummaryRequest) -> Result<CostEstimate> {
        request.validate()?;
        let raw = self
            .source
            .fetch_range(&request.channel_id, request.start, request.end, None)
            .await?;
        let messages = filter_messages(
            raw,
            &FilterOptions {
                include_bots: request.options.include_bots,
                excluded_users: request.options.excluded_users.clone(),
            },
        );
        let context = self.prompt_context(&request, &messages).await;
        let built = self.prompt.build(
            &messages,
            &context,
            request.options.length,
            request.options.max_output_tokens,
        )?;

        let model = self.llm.resolve_model(request.options.model.as_deref());
        let cost = self.llm.estimate_cost(
            &model,
            built.estimated_tokens as u32,
            request.options.max_output_tokens,
        );
        Ok(CostEstimate {
            estimated_prompt_tokens: built.estimated_tokens,
            max_output_tokens: request.options.max_output_tokens,
            estimated_cost_usd: cost,
            message_count: messages.len(),
        })
    }

    /// Validate and persist a guild config, then drop the guild's cache
    /// entries so stale excluded-user or default-option state cannot be
    /// served.
    pub fn update_guild_config(&self, config: &GuildConfig) -> Result<()> {
        config.validate()?;
        self.store.save_guild_config(config)?;
        self.cache.invalidate_guild(&config.guild_id)?;
        Ok(())
    }

    /// Admin deletion. Clears the summary's channel from the cache since
    /// fingerprints cannot be recovered from the summary row.
    pub fn delete_summary(&self, id: &str) -> Result<()> {
        let summary = self.store.get_summary(id)?;
        self.store.delete_summary(id)?;
        self.cache.invalidate_channel(&summary.channel_id)?;
        Ok(())
    }

    pub fn invalidate_channel(&self, channel_id: &str) -> Result<()> {
        self.cache.invalidate_channel(channel_id)
    }

    async fn prompt_context(
        &self,
        request: &SummaryRequest,
        messages: &[NormalizedMessage],
    ) -> PromptContext {
        let channel_name = self
            .source
            .channel_name(&request.channel_id)
            .await
            .unwrap_or_else(|_| request.channel_id.clone());
        let participant_count = messages
            .iter()
            .map(|m| m.author_id.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        PromptContext {
            channel_name,
            guild_name: request.guild_id.clone(),
            participant_count,
            span_hours: (request.end - request.start).num_minutes() as f64 / 60.0,
        }
    }
}

/// Authoritative participant list from the normalized messages; the model's
/// list only contributes display enrichment.
fn assemble_participants(
    messages: &[NormalizedMessage],
    parsed: &[crate::parser::ParsedParticipant],
) -> Vec<Participant> {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, Participant> = HashMap::new();

    for msg in messages {
        let entry = by_id
            .entry(msg.author_id.clone())
            .or_insert_with(|| {
                order.push(msg.author_id.clone());
                Participant {
                    user_id: msg.author_id.clone(),
                    name: msg.author_name.clone(),
                    message_count: 0,
                    contributions: Vec::new(),
                }
            });
        entry.message_count += 1;
    }

    for p in by_id.values_mut() {
        if let Some(enriched) = parsed
            .iter()
            .find(|pp| pp.name.eq_ignore_ascii_case(&p.name))
        {
            p.contributions = enriched.contributions.clone();
        }
    }

    order.into_iter().filter_map(|id| by_id.remove(&id)).collect()
}

/// Field-preserving clone of the non-`Clone` error enum, used when one
/// pipeline result fans out to several waiters.
fn clone_error(e: &RecapError) -> RecapError {
    match e {
        RecapError::Config(m) => RecapError::Config(m.clone()),
        RecapError::UserInput(m) => RecapError::UserInput(m.clone()),
        RecapError::Permission { reason } => RecapError::Permission {
            reason: reason.clone(),
        },
        RecapError::InsufficientContent { found, required } => RecapError::InsufficientContent {
            found: *found,
            required: *required,
        },
        RecapError::ChannelAccess { channel_id } => RecapError::ChannelAccess {
            channel_id: channel_id.clone(),
        },
        RecapError::RateLimited { retry_after_secs } => RecapError::RateLimited {
            retry_after_secs: *retry_after_secs,
        },
        RecapError::SourceTransient(m) => RecapError::SourceTransient(m.clone()),
        RecapError::LlmTransient(m) => RecapError::LlmTransient(m.clone()),
        RecapError::LlmRefused(m) => RecapError::LlmRefused(m.clone()),
        RecapError::LlmInvalid(m) => RecapError::LlmInvalid(m.clone()),
        RecapError::PromptTooLarge { tokens, budget } => RecapError::PromptTooLarge {
            tokens: *tokens,
            budget: *budget,
        },
        RecapError::NotFound { entity, id } => RecapError::NotFound {
            entity,
            id: id.clone(),
        },
        RecapError::StoreTransient(m) => RecapError::StoreTransient(m.clone()),
        RecapError::StoreConstraint(m) => RecapError::StoreConstraint(m.clone()),
        RecapError::AuthFailed(m) => RecapError::AuthFailed(m.clone()),
        RecapError::Aborted => RecapError::Aborted,
        RecapError::Serialization(e) => RecapError::Internal(format!("serialization: {e}")),
        RecapError::Internal(m) => RecapError::Internal(m.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn participants_count_from_messages_not_model() {
        let base = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let mk = |id: &str, author: &str, name: &str| NormalizedMessage {
            id: id.into(),
            author_id: author.into(),
            author_name: name.into(),
            author_is_bot: false,
            timestamp: base,
            content: "hi".into(),
            code_blocks: Vec::new(),
            mentions: Vec::new(),
            attachments: Vec::new(),
            thread_id: None,
            reply_to: None,
        };
        let messages = vec![mk("m1", "u1", "Ana"), mk("m2", "u1", "Ana"), mk("m3", "u2", "Bo")];
        let parsed = vec![
            crate::parser::ParsedParticipant {
                name: "ana".into(),
                contributions: vec!["asked the questions".into()],
            },
            // The model hallucinated a participant; it must not appear.
            crate::parser::ParsedParticipant {
                name: "Ghost".into(),
                contributions: vec!["nothing".into()],
            },
        ];

        let out = assemble_participants(&messages, &parsed);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].user_id, "u1");
        assert_eq!(out[0].message_count, 2);
        assert_eq!(out[0].contributions, vec!["asked the questions".to_string()]);
        assert_eq!(out[1].user_id, "u2");
        assert_eq!(out[1].message_count, 1);
    }
}
