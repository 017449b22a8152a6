use crate::config::AppConfig;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let live_rooms = state.rooms.room_count();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(&metrics),
            "active_connections": metrics.active_connections,
            "live_rooms": live_rooms
        },
        "memory": get_memory_info(),
        "system": get_system_status(&config, live_rooms)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(&metrics),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "relay": {
            "active_connections": metrics.active_connections,
            "registered_connections": state.hub.len(),
            "live_rooms": state.rooms.room_count(),
            "frames_relayed": metrics.frames_relayed,
            "frames_dropped": metrics.frames_dropped,
            "transmissions_logged": metrics.transmissions_logged
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

#[cfg(target_os = "linux")]
fn get_memory_info() -> serde_json::Value {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return json!({ "available": false });
    };

    let field = |name: &str| {
        status
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
            .unwrap_or(0)
    };

    json!({
        "resident_memory_bytes": field("VmRSS:"),
        "virtual_memory_bytes": field("VmSize:"),
        "available": true
    })
}

#[cfg(not(target_os = "linux"))]
fn get_memory_info() -> serde_json::Value {
    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

/// Load is judged by how much of the room code space is in use.
fn get_system_status(config: &AppConfig, live_rooms: usize) -> serde_json::Value {
    let room_usage = if config.rooms.max_rooms > 0 {
        live_rooms as f64 / config.rooms.max_rooms as f64
    } else {
        0.0
    };

    let status = if room_usage > 0.9 {
        "high_load"
    } else if room_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "room_usage_percent": (room_usage * 100.0).round(),
        "max_rooms": config.rooms.max_rooms,
        "current_rooms": live_rooms,
        "load_warnings": if room_usage > 0.8 {
            vec!["High room usage - consider increasing rooms.max_rooms"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test as actix_test, App};

    #[actix_web::test]
    async fn test_health_reports_rooms() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        state.rooms.create_room("Boss", None, None, "c-admin").unwrap();

        let app = actix_test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["metrics"]["live_rooms"], 1);
        assert_eq!(body["system"]["status"], "normal");
    }

    #[test]
    fn test_load_levels() {
        let mut config = AppConfig::default();
        config.rooms.max_rooms = 10;
        assert_eq!(get_system_status(&config, 9)["status"], "moderate_load");
        assert_eq!(get_system_status(&config, 10)["status"], "high_load");
    }
}
