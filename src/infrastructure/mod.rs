pub mod availability_repository;
pub mod calcom_adapter;
pub mod calcom_client;
pub mod calendar_adapter;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod event_mapper;
pub mod google_calendar_adapter;
pub mod google_calendar_client;
pub mod logging;
pub mod notification;
pub mod oauth_client;
pub mod pending_sync_repository;
pub mod session_repository;
pub mod storage;
