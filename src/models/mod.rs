pub mod analysis;
pub mod job;
pub mod media;
pub mod notification;
pub mod requests;
