pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use services::BookingService;

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub service: BookingService,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(service: BookingService, request_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            service,
            request_timeout,
        })
    }
}
