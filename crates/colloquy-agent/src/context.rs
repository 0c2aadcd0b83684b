use crate::backends::LlmBackend;
use crate::compaction::CompactionService;
use crate::config::ContextConfig;
use crate::tokens::TokenEstimator;
use colloquy_core::{ColloquyError, ColloquyResult, Message, Role, ToolCall, ToolResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Tool results at or below this size (bytes) are never pruned.
pub const PRUNE_MIN_BYTES: usize = 256;

/// Auto-compaction triggers at this share (percent) of the configured threshold.
const AUTO_COMPACT_TRIGGER_PERCENT: usize = 80;

/// Outcome of a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    pub messages_before: usize,
    pub messages_after: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
    /// `false` when there was nothing old enough to summarize.
    pub summarized: bool,
}

/// Outcome of [`MessageHistory::prune_tool_results_by_percentage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub pruned_count: usize,
    pub saved_bytes: usize,
    /// Tool results left alone because they were small enough.
    pub protected_count: usize,
}

/// Which compaction to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionRequest {
    /// Sliding window: summarize everything but the protected recent groups.
    Window,
    /// Summarize the first `n` rounds.
    Rounds(usize),
    /// Summarize the first `n` non-system, non-summary messages.
    Messages(usize),
}

impl CompactionRequest {
    async fn run(
        self,
        compactor: &CompactionService,
        messages: &[Message],
    ) -> ColloquyResult<Vec<Message>> {
        match self {
            Self::Window => compactor.compact(messages).await,
            Self::Rounds(n) => compactor.force_compact_rounds(messages, n).await,
            Self::Messages(n) => compactor.force_compact_messages(messages, n).await,
        }
    }
}

/// Snapshot taken when a compaction starts.
#[derive(Debug)]
struct CompactionTicket {
    snapshot: Vec<Message>,
    revision: u64,
    tokens_before: usize,
}

/// The live conversation log and its token accounting.
///
/// Appends never invalidate an in-flight compaction; any other change to the
/// sequence bumps an internal revision, and a compaction started against an
/// older revision is refused at commit time.
pub struct MessageHistory {
    messages: Vec<Message>,
    config: ContextConfig,
    compactor: Arc<CompactionService>,
    tokens: TokenEstimator,
    last_estimate: usize,
    compaction_count: u64,
    revision: u64,
}

impl MessageHistory {
    pub fn new(config: ContextConfig, backend: Arc<dyn LlmBackend>) -> Self {
        let compactor = Arc::new(CompactionService::new(
            backend,
            config.compact_protect_rounds,
        ));
        Self {
            messages: Vec::new(),
            config,
            compactor,
            tokens: TokenEstimator::new(),
            last_estimate: 0,
            compaction_count: 0,
            revision: 0,
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    // -- mutators ----------------------------------------------------------

    pub fn add_system_message(&mut self, content: impl Into<String>) {
        self.messages.push(Message::system(content));
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    /// Append an assistant turn; empty content and an empty call list are stored as absent.
    pub fn add_assistant_message(&mut self, content: Option<String>, tool_calls: Vec<ToolCall>) {
        self.messages
            .push(Message::assistant_with_tool_calls(content, tool_calls));
    }

    /// Append one `tool` message per result, in order.
    pub fn add_tool_results(&mut self, results: &[ToolResult]) {
        self.messages.extend(
            results
                .iter()
                .map(|r| Message::tool(r.tool_call_id.clone(), r.content.clone())),
        );
    }

    /// Append an already-built message (e.g. one reassembled from a stream).
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Replace the whole sequence, e.g. after loading a session.
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.tokens.clear_cache();
        self.last_estimate = 0;
        self.revision += 1;
    }

    /// Empty the sequence. The lifetime compaction count is kept.
    pub fn clear(&mut self) {
        self.set_messages(Vec::new());
    }

    /// Insert an out-of-band user message where it cannot split a tool exchange.
    ///
    /// Goes right after the later of the last assistant turn without tool calls
    /// and the last tool result; appended when neither exists. Returns the index.
    pub fn insert_user_message_after_last_appropriate_position(
        &mut self,
        content: impl Into<String>,
    ) -> usize {
        let index = self
            .messages
            .iter()
            .rposition(|m| match m.role {
                Role::Assistant => !m.has_tool_calls(),
                Role::Tool => true,
                _ => false,
            })
            .map_or(self.messages.len(), |i| i + 1);
        self.messages.insert(index, Message::user(content));
        self.revision += 1;
        index
    }

    // -- accessors ---------------------------------------------------------

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// User-initiated rounds; summaries do not count.
    pub fn round_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User && !m.is_summary())
            .count()
    }

    /// Compactions committed over the lifetime of this history.
    pub fn compaction_count(&self) -> u64 {
        self.compaction_count
    }

    /// Recompute the token estimate of the sequence (cached per message).
    pub fn estimate_context(&mut self) -> usize {
        self.last_estimate = self.tokens.estimate_messages(&self.messages);
        self.last_estimate
    }

    /// The estimate from the last [`Self::estimate_context`] call.
    pub fn last_estimate(&self) -> usize {
        self.last_estimate
    }

    /// Record the token cost of the tool schemas sent with each request.
    pub fn set_tool_definitions_tokens(&mut self, tokens: usize) {
        self.tokens.set_tool_definitions_tokens(tokens);
    }

    pub fn token_estimator(&self) -> &TokenEstimator {
        &self.tokens
    }

    pub fn compactor(&self) -> Arc<CompactionService> {
        Arc::clone(&self.compactor)
    }

    // -- compaction --------------------------------------------------------

    /// Whether the estimate has reached 80% of the auto-compact threshold.
    pub fn should_auto_compact(&mut self) -> bool {
        if !self.config.auto_compact_enabled() {
            return false;
        }
        let threshold = self.config.auto_compact_threshold();
        let estimate = self.estimate_context();
        estimate.saturating_mul(100) >= threshold.saturating_mul(AUTO_COMPACT_TRIGGER_PERCENT)
    }

    /// Sliding-window compaction. On error the sequence is left untouched.
    pub async fn compact_memory(&mut self) -> ColloquyResult<CompactionReport> {
        self.run_compaction(CompactionRequest::Window).await
    }

    pub async fn force_compact_rounds(&mut self, rounds: usize) -> ColloquyResult<CompactionReport> {
        self.run_compaction(CompactionRequest::Rounds(rounds)).await
    }

    pub async fn force_compact_messages(
        &mut self,
        count: usize,
    ) -> ColloquyResult<CompactionReport> {
        self.run_compaction(CompactionRequest::Messages(count)).await
    }

    async fn run_compaction(
        &mut self,
        request: CompactionRequest,
    ) -> ColloquyResult<CompactionReport> {
        let ticket = self.begin_compaction();
        let compactor = self.compactor();
        let compacted = request.run(&compactor, &ticket.snapshot).await?;
        self.finish_compaction(ticket, compacted)
    }

    fn begin_compaction(&mut self) -> CompactionTicket {
        let tokens_before = self.estimate_context();
        CompactionTicket {
            snapshot: self.messages.clone(),
            revision: self.revision,
            tokens_before,
        }
    }

    fn finish_compaction(
        &mut self,
        ticket: CompactionTicket,
        compacted: Vec<Message>,
    ) -> ColloquyResult<CompactionReport> {
        if ticket.revision != self.revision {
            return Err(ColloquyError::Compaction(
                "conversation changed while it was being compacted".into(),
            ));
        }
        let messages_before = self.messages.len();
        if compacted == ticket.snapshot {
            let tokens = self.estimate_context();
            debug!(messages = messages_before, tokens, "Compaction made no changes");
            return Ok(CompactionReport {
                messages_before,
                messages_after: messages_before,
                tokens_before: tokens,
                tokens_after: tokens,
                summarized: false,
            });
        }

        let appended = self
            .messages
            .split_off(ticket.snapshot.len().min(self.messages.len()));
        let mut next = compacted;
        next.extend(appended);
        self.messages = next;
        self.tokens.retain(&self.messages);
        self.revision += 1;
        self.compaction_count += 1;

        let tokens_after = self.estimate_context();
        let report = CompactionReport {
            messages_before,
            messages_after: self.messages.len(),
            tokens_before: ticket.tokens_before,
            tokens_after,
            summarized: true,
        };
        info!(
            messages_before = report.messages_before,
            messages_after = report.messages_after,
            tokens_before = report.tokens_before,
            tokens_after = report.tokens_after,
            count = self.compaction_count,
            "Context compacted"
        );
        Ok(report)
    }

    // -- pruning -----------------------------------------------------------

    /// Replace the content of the oldest `percentage`% of large tool results
    /// (over [`PRUNE_MIN_BYTES`]) with a short placeholder.
    pub fn prune_tool_results_by_percentage(&mut self, percentage: u32) -> PruneReport {
        let pct = percentage.min(100) as usize;
        let mut report = PruneReport::default();
        let mut eligible = Vec::new();
        for (i, message) in self.messages.iter().enumerate() {
            if message.role != Role::Tool {
                continue;
            }
            if message.text().len() > PRUNE_MIN_BYTES {
                eligible.push(i);
            } else {
                report.protected_count += 1;
            }
        }

        let prune = (eligible.len() * pct).div_ceil(100);
        for &i in eligible.iter().take(prune) {
            let message = &mut self.messages[i];
            let bytes = message.text().len();
            let placeholder = format!("[tool result pruned: {bytes} bytes]");
            report.saved_bytes += bytes.saturating_sub(placeholder.len());
            message.content = Some(placeholder);
            self.tokens.invalidate(&message.id);
            report.pruned_count += 1;
        }
        if report.pruned_count > 0 {
            self.revision += 1;
            info!(
                pruned = report.pruned_count,
                saved_bytes = report.saved_bytes,
                protected = report.protected_count,
                "Pruned tool results"
            );
        }
        report
    }
}

/// A [`MessageHistory`] shared between tasks.
///
/// Mutations go through a short-lived lock. Compactions are single-flight: the
/// sequence is snapshotted under the lock, summarized without holding it, and
/// committed only if nothing but appends happened in between.
#[derive(Clone)]
pub struct SharedHistory {
    inner: Arc<parking_lot::Mutex<MessageHistory>>,
    compaction: Arc<tokio::sync::Mutex<()>>,
}

impl SharedHistory {
    pub fn new(history: MessageHistory) -> Self {
        Self {
            inner: Arc::new(parking_lot::Mutex::new(history)),
            compaction: Arc::default(),
        }
    }

    /// Run `f` with exclusive access to the history.
    pub fn with<R>(&self, f: impl FnOnce(&mut MessageHistory) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Copy of the current sequence.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().messages().to_vec()
    }

    pub async fn compact_memory(&self) -> ColloquyResult<CompactionReport> {
        self.compact(CompactionRequest::Window).await
    }

    pub async fn compact(&self, request: CompactionRequest) -> ColloquyResult<CompactionReport> {
        let _flight = self.compaction.lock().await;
        self.compact_locked(request).await
    }

    /// Compact if the history is over its trigger; `None` when it was not.
    ///
    /// The check runs after the single-flight guard is taken, so a trigger that
    /// raced another compaction sees the compacted state.
    pub async fn compact_if_needed(&self) -> ColloquyResult<Option<CompactionReport>> {
        let _flight = self.compaction.lock().await;
        let due = self.inner.lock().should_auto_compact();
        if !due {
            return Ok(None);
        }
        self.compact_locked(CompactionRequest::Window).await.map(Some)
    }

    async fn compact_locked(&self, request: CompactionRequest) -> ColloquyResult<CompactionReport> {
        let (ticket, compactor) = {
            let mut history = self.inner.lock();
            (history.begin_compaction(), history.compactor())
        };
        let compacted = request.run(&compactor, &ticket.snapshot).await?;
        self.inner.lock().finish_compaction(ticket, compacted)
    }
}
