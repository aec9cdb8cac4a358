use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::image::DecodedImage;
use super::ExtractionError;
use crate::models::{FieldMap, FieldSchema};
use crate::pipeline::reconcile::traits::ExtractionClient;

/// Scripted extraction client for tests and offline runs.
///
/// Queued outcomes are consumed in call order; once the queue is empty every
/// call returns the fallback fields.
pub struct MockExtractionClient {
    scripted: Mutex<VecDeque<Result<FieldMap, ExtractionError>>>,
    fallback: FieldMap,
    delay: Option<Duration>,
    calls: AtomicUsize,
    image_sizes: Mutex<Vec<usize>>,
}

impl MockExtractionClient {
    pub fn new(fallback: FieldMap) -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: AtomicUsize::new(0),
            image_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful extraction.
    pub fn then_return(self, fields: FieldMap) -> Self {
        self.push(Ok(fields));
        self
    }

    /// Queue a service failure.
    pub fn then_fail(self, reason: &str) -> Self {
        self.push(Err(ExtractionError::Api {
            status: 503,
            body: reason.to_string(),
        }));
        self
    }

    /// Sleep before answering, to simulate service latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Byte length of every image received, in call order.
    pub fn image_sizes(&self) -> Vec<usize> {
        self.image_sizes.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn push(&self, outcome: Result<FieldMap, ExtractionError>) {
        if let Ok(mut queue) = self.scripted.lock() {
            queue.push_back(outcome);
        }
    }
}

impl ExtractionClient for MockExtractionClient {
    fn extract(&self, image: &DecodedImage, _schema: &FieldSchema) -> Result<FieldMap, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sizes) = self.image_sizes.lock() {
            sizes.push(image.len());
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let next = self.scripted.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(outcome) => outcome,
            None => Ok(self.fallback.clone()),
        }
    }
}
