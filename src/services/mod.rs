pub mod certificates;
pub mod media_store;
pub mod merger;
pub mod pipeline;
pub mod provider;
pub mod queue;
pub mod registry;
pub mod rekognition;
pub mod submitter;
pub mod token;
pub mod webhook;
pub mod worker;
