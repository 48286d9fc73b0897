//! Token-bounded conversation memory.
//!
//! [`MemoryWindow`] keeps an ordered history under a token budget, evicting
//! from the oldest end. One leading system message is pinned and never
//! evicted. [`MemoryLlm`] wraps a [`BaseLlm`] and feeds the window into every
//! request.
//!
//! ```text
//! ┌────────┬──────┬──────┬──────┬──────┐
//! │ system │ old  │  …   │  …   │ new  │   ◀── append
//! │ pinned │      │      │      │      │
//! └────────┴──────┴──────┴──────┴──────┘
//!            ▲ evicted first while total > budget
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{BaseLlm, Generator};
use crate::error::Result;
use crate::types::{GenerateOptions, Message, Prompt, Role};

/// Counts tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize;
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}

/// Estimates one token per four characters, rounding up.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// What an [`MemoryWindow::append`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Messages dropped from the front.
    pub evicted: usize,
    /// Token total after eviction.
    pub total_tokens: usize,
}

/// Ordered conversation history bounded by a token budget.
pub struct MemoryWindow {
    pinned: Option<(Message, usize)>,
    messages: VecDeque<(Message, usize)>,
    message_tokens: usize,
    max_tokens: usize,
    counter: Arc<dyn TokenCounter>,
}

impl MemoryWindow {
    /// Create an empty window.
    #[must_use]
    pub fn new(max_tokens: usize, counter: impl TokenCounter + 'static) -> Self {
        Self {
            pinned: None,
            messages: VecDeque::new(),
            message_tokens: 0,
            max_tokens,
            counter: Arc::new(counter),
        }
    }

    /// Add a message, then evict the oldest unpinned messages until the
    /// total fits the budget.
    ///
    /// A system message replaces the pinned slot rather than joining the
    /// queue.
    pub fn append(&mut self, message: Message) -> AppendOutcome {
        let tokens = self.counter.count(&message.content);
        if message.role == Role::System {
            if self.pinned.is_some() {
                debug!("replacing pinned system message");
            }
            self.pinned = Some((message, tokens));
        } else {
            self.messages.push_back((message, tokens));
            self.message_tokens += tokens;
        }

        let mut evicted = 0;
        while self.total_tokens() > self.max_tokens {
            let Some((_, tokens)) = self.messages.pop_front() else {
                break;
            };
            self.message_tokens -= tokens;
            evicted += 1;
        }

        if evicted > 0 {
            debug!(evicted, total_tokens = self.total_tokens(), "evicted oldest messages");
        }
        if self.total_tokens() > self.max_tokens {
            warn!(
                pinned_tokens = self.pinned_tokens(),
                max_tokens = self.max_tokens,
                "pinned system message alone exceeds the memory budget"
            );
        }

        AppendOutcome { evicted, total_tokens: self.total_tokens() }
    }

    /// Retained history, oldest first, pinned system message leading.
    #[must_use]
    pub fn build_context(&self) -> Vec<Message> {
        self.pinned
            .iter()
            .chain(self.messages.iter())
            .map(|(message, _)| message.clone())
            .collect()
    }

    /// Drop everything, the pinned message included.
    pub fn clear(&mut self) {
        self.pinned = None;
        self.messages.clear();
        self.message_tokens = 0;
    }

    /// Tokens currently retained.
    #[must_use]
    pub fn total_tokens(&self) -> usize {
        self.pinned_tokens() + self.message_tokens
    }

    /// Configured budget.
    #[must_use]
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Retained message count, pinned message included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len() + usize::from(self.pinned.is_some())
    }

    /// Whether nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The pinned system message, if any.
    #[must_use]
    pub fn pinned(&self) -> Option<&Message> {
        self.pinned.as_ref().map(|(message, _)| message)
    }

    fn pinned_tokens(&self) -> usize {
        self.pinned.as_ref().map_or(0, |(_, tokens)| *tokens)
    }
}

impl fmt::Debug for MemoryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryWindow")
            .field("messages", &self.len())
            .field("total_tokens", &self.total_tokens())
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Decorator that gives a [`BaseLlm`] conversation memory.
///
/// Only `generate`, `memory` and `clear_memory` differ from the wrapped
/// client; everything else is forwarded.
pub struct MemoryLlm {
    base: BaseLlm,
    window: Mutex<MemoryWindow>,
}

impl MemoryLlm {
    /// Wrap `base` with a window of `max_tokens`.
    #[must_use]
    pub fn new(base: BaseLlm, max_tokens: usize, counter: impl TokenCounter + 'static) -> Self {
        Self { base, window: Mutex::new(MemoryWindow::new(max_tokens, counter)) }
    }

    /// The wrapped client.
    #[must_use]
    pub fn base(&self) -> &BaseLlm {
        &self.base
    }

    /// Set (or replace) the pinned system message.
    pub fn set_system_prompt(&self, content: impl Into<String>) {
        self.window.lock().append(Message::system(content));
    }

    /// Tokens currently retained.
    #[must_use]
    pub fn memory_tokens(&self) -> usize {
        self.window.lock().total_tokens()
    }
}

#[async_trait]
impl Generator for MemoryLlm {
    async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if options.validate_prompt {
            prompt.validate()?;
        }

        let user = Message::user(prompt.render());
        let context = {
            let mut window = self.window.lock();
            window.append(user.clone());
            let mut context = window.build_context();
            // The current turn is always sent, even if it alone overflowed the budget.
            if context.last() != Some(&user) {
                warn!("user message exceeds the memory budget; sending it without retention");
                context.push(user);
            }
            context
        };

        let reply = self.base.generate_chat(&context, options, cancel).await?;
        self.window.lock().append(Message::assistant(reply.clone()));
        Ok(reply)
    }

    fn set_option(&mut self, key: &str, value: &Value) -> Result<()> {
        self.base.set_option(key, value)
    }

    fn provider_name(&self) -> &str {
        self.base.provider_name()
    }

    fn model(&self) -> &str {
        self.base.model()
    }

    fn has_memory(&self) -> bool {
        true
    }

    fn memory(&self) -> Vec<Message> {
        self.window.lock().build_context()
    }

    fn clear_memory(&self) {
        self.window.lock().clear();
    }
}

impl fmt::Debug for MemoryLlm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLlm")
            .field("base", &self.base)
            .field("window", &*self.window.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn contents(window: &MemoryWindow) -> Vec<String> {
        window.build_context().into_iter().map(|m| m.content).collect()
    }

    #[test]
    fn heuristic_rounds_up() {
        assert_eq!(HeuristicTokenCounter.count(""), 0);
        assert_eq!(HeuristicTokenCounter.count("abc"), 1);
        assert_eq!(HeuristicTokenCounter.count("abcdefgh"), 2);
        assert_eq!(HeuristicTokenCounter.count("abcdefghi"), 3);
    }

    #[test]
    fn evicts_oldest_first() {
        let mut window = MemoryWindow::new(5, words);
        window.append(Message::user("one two"));
        window.append(Message::assistant("three four"));
        let outcome = window.append(Message::user("five six"));

        assert_eq!(outcome, AppendOutcome { evicted: 1, total_tokens: 4 });
        assert_eq!(contents(&window), vec!["three four", "five six"]);
    }

    #[test]
    fn pinned_system_message_survives_eviction() {
        let mut window = MemoryWindow::new(6, words);
        window.append(Message::system("be brief"));
        window.append(Message::user("a b"));
        window.append(Message::assistant("c d"));
        window.append(Message::user("e f"));

        let context = window.build_context();
        assert_eq!(context[0].role, Role::System);
        assert_eq!(contents(&window), vec!["be brief", "c d", "e f"]);
        assert!(window.total_tokens() <= 6);
    }

    #[test]
    fn oversized_pinned_message_is_kept_alone() {
        let mut window = MemoryWindow::new(2, words);
        window.append(Message::user("hi"));
        let outcome = window.append(Message::system("a very long system prompt indeed"));

        assert_eq!(outcome.evicted, 1);
        assert_eq!(window.len(), 1);
        assert_eq!(window.pinned().map(|m| m.content.as_str()), Some("a very long system prompt indeed"));
    }

    #[test]
    fn later_system_message_replaces_pinned() {
        let mut window = MemoryWindow::new(100, words);
        window.append(Message::system("first"));
        window.append(Message::user("hello"));
        window.append(Message::system("second"));

        assert_eq!(contents(&window), vec!["second", "hello"]);
        assert_eq!(window.total_tokens(), 2);
    }

    #[test]
    fn clear_empties_everything() {
        let mut window = MemoryWindow::new(100, words);
        window.append(Message::system("sys"));
        window.append(Message::user("hello there"));
        window.clear();

        assert!(window.is_empty());
        assert_eq!(window.total_tokens(), 0);
    }
}
