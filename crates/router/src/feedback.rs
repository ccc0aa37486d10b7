use parking_lot::Mutex;
use switchboard_core::{FeedbackRecord, Intent};

/// Buffers correction reports until `threshold` records have arrived.
///
/// The call that fills the buffer receives the whole batch and leaves it empty, so
/// concurrent reporters trigger at most one retrain per batch.
pub struct FeedbackLoop {
    buffer: Mutex<Vec<FeedbackRecord>>,
    threshold: usize,
}

impl FeedbackLoop {
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            buffer: Mutex::new(Vec::with_capacity(threshold)),
            threshold,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Appends `record`; returns the drained batch once the buffer is full.
    pub fn record(&self, record: FeedbackRecord) -> Option<Vec<FeedbackRecord>> {
        let mut buffer = self.buffer.lock();
        buffer.push(record);
        if buffer.len() < self.threshold {
            return None;
        }
        Some(std::mem::take(&mut *buffer))
    }

    /// Confirmed-correct records become training pairs; mistakes are dropped.
    pub fn training_samples(batch: &[FeedbackRecord]) -> Vec<(String, Intent)> {
        batch
            .iter()
            .filter(|record| record.was_correct)
            .map(|record| (record.query.clone(), record.actual_intent.clone()))
            .collect()
    }
}
