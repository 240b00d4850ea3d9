use std::sync::Arc;

use crate::error::AnalysisError;
use crate::services::pipeline::{AnalysisPipeline, CompletionOutcome};
use crate::services::queue::CompletionQueue;

pub const MAX_RETRIES: i32 = 3;

/// Drains the completion queue into the pipeline.
pub struct CompletionWorker {
    pipeline: Arc<AnalysisPipeline>,
    queue: Arc<dyn CompletionQueue>,
}

impl CompletionWorker {
    pub fn new(pipeline: Arc<AnalysisPipeline>, queue: Arc<dyn CompletionQueue>) -> Self {
        Self { pipeline, queue }
    }

    /// Process the next completion task.
    /// Returns Ok(true) if a task was handled, Ok(false) if the queue was empty.
    pub async fn process_next(&self) -> Result<bool, AnalysisError> {
        if let Ok(depth) = self.queue.depth().await {
            metrics::gauge!("analysis_queue_depth").set(depth as f64);
        }

        let task = match self.queue.dequeue().await? {
            Some(task) => task,
            None => return Ok(false),
        };

        tracing::info!(
            job_id = %task.job_id,
            message_id = %task.message_id,
            "Processing job completion"
        );

        match self.pipeline.apply_completion(&task).await {
            Ok(outcome) => {
                self.queue.complete(&task).await?;
                match outcome {
                    CompletionOutcome::Merged(merge) => {
                        tracing::info!(job_id = %task.job_id, outcome = ?merge, "Completion applied")
                    }
                    other => {
                        tracing::debug!(job_id = %task.job_id, outcome = ?other, "Completion handled")
                    }
                }
            }
            Err(e) => {
                tracing::error!(job_id = %task.job_id, error = %e, "Applying completion failed");

                let gave_up = self.pipeline.record_failure(&task, &e, MAX_RETRIES).await?;
                if !gave_up {
                    self.queue.enqueue(&task).await?;
                }
                self.queue.complete(&task).await?;
            }
        }

        Ok(true)
    }
}
