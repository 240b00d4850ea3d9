use std::sync::Arc;

use reqwest::Client;

use crate::services::{
    pipeline::AnalysisPipeline, queue::CompletionQueue, webhook::WebhookAuthenticator,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AnalysisPipeline>,
    pub authenticator: Arc<WebhookAuthenticator>,
    pub queue: Arc<dyn CompletionQueue>,
    /// Used to confirm SNS subscriptions.
    pub http: Client,
}

impl AppState {
    pub fn new(
        pipeline: AnalysisPipeline,
        authenticator: WebhookAuthenticator,
        queue: Arc<dyn CompletionQueue>,
        http: Client,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            authenticator: Arc::new(authenticator),
            queue,
            http,
        }
    }
}
