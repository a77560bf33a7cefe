//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Instant;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Up,
    Down,
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }
}

/// Run the component checks and aggregate an overall state.
pub async fn check(pool: &PgPool) -> HealthStatus {
    let mut checks = HashMap::new();

    let started = Instant::now();
    match crate::database::health_check(pool).await {
        Ok(()) => {
            checks.insert(
                "database".to_string(),
                ComponentHealth::up(Some(started.elapsed().as_millis())),
            );
        }
        Err(e) => {
            checks.insert(
                "database".to_string(),
                ComponentHealth::down(Some(e.to_string())),
            );
        }
    }

    let status = if checks.values().all(|c| c.status == ComponentState::Up) {
        HealthState::Healthy
    } else {
        HealthState::Unhealthy
    };

    HealthStatus {
        status,
        checks,
        timestamp: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_health_constructors() {
        let up = ComponentHealth::up(Some(3));
        assert_eq!(up.status, ComponentState::Up);
        assert_eq!(up.response_time_ms, Some(3));

        let down = ComponentHealth::down(Some("connection refused".to_string()));
        assert_eq!(down.status, ComponentState::Down);
        assert!(down.details.is_some());
    }
}
