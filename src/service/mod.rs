pub mod command;
pub mod dispute_service;
pub mod gig_service;
pub mod notification_service;
pub mod settlement_watcher;
