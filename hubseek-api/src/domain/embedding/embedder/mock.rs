//! Mock embedder implementation for testing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::embedding::traits::{Embedder, EmbeddingError, Result};

const MOCK_MODEL: &str = "mock-embedding-v1";

/// Mock embedder with configurable responses and failure injection.
///
/// ```ignore
/// // Fixed response vector
/// let embedder = MockEmbedder::returning(vec![0.1, 0.2, 0.3]);
///
/// // Provider rejects batches above a size, like a "reduce your prompt"
/// // response for over-long input
/// let embedder = MockEmbedder::new().rejecting_batches_larger_than(10);
/// ```
#[derive(Clone)]
pub struct MockEmbedder {
    response: Arc<Vec<f32>>,
    call_count: Arc<AtomicUsize>,
    max_batch: Arc<AtomicUsize>,
    fail_remaining: Arc<AtomicUsize>,
    fail_on_text: Arc<Mutex<Option<String>>>,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::returning(vec![0.0; 1536])
    }

    /// Always return the given vector.
    pub fn returning(vector: Vec<f32>) -> Self {
        Self {
            response: Arc::new(vector),
            call_count: Arc::new(AtomicUsize::new(0)),
            max_batch: Arc::new(AtomicUsize::new(usize::MAX)),
            fail_remaining: Arc::new(AtomicUsize::new(0)),
            fail_on_text: Arc::new(Mutex::new(None)),
        }
    }

    /// Reject batches with more than `n` texts with a "please reduce your
    /// prompt" provider error.
    pub fn rejecting_batches_larger_than(self, n: usize) -> Self {
        self.max_batch.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the next `n` calls with a transient provider error.
    pub fn failing_times(self, n: usize) -> Self {
        self.fail_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Fail any call whose input contains `needle`.
    pub fn failing_on_text(self, needle: &str) -> Self {
        *self.fail_on_text.lock().unwrap() = Some(needle.to_string());
        self
    }

    /// How many times `embed` or `embed_batch` was called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn check_failures(&self, texts: &[&str]) -> Result<()> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EmbeddingError::Provider("injected transient error".into()));
        }

        let max_batch = self.max_batch.load(Ordering::SeqCst);
        if texts.len() > max_batch {
            return Err(EmbeddingError::from_provider_message(
                "please reduce your prompt; or completion length".into(),
            ));
        }

        if let Some(needle) = self.fail_on_text.lock().unwrap().as_deref() {
            if texts.iter().any(|t| t.contains(needle)) {
                return Err(EmbeddingError::Provider(format!(
                    "injected failure for input containing {needle:?}"
                )));
            }
        }

        Ok(())
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.check_failures(&[text])?;
        Ok(self.response.as_ref().clone())
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.check_failures(texts)?;
        Ok(texts.iter().map(|_| self.response.as_ref().clone()).collect())
    }

    fn model(&self) -> &str {
        MOCK_MODEL
    }

    fn dimensions(&self) -> usize {
        self.response.len()
    }
}
