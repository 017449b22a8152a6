//! Archive access over HTTP: log summaries, single WAV download, tar export.

use crate::archive::exporter::{self, Perspective};
use crate::error::AppError;
use crate::room::code::RoomCode;
use crate::room::registry::lock_room;
use crate::state::AppState;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

/// Lists the indices of transmissions left out of a batch export.
pub const EXPORT_SKIPPED_HEADER: &str = "x-export-skipped";

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub perspective: Perspective,
}

fn attachment(file_name: String) -> ContentDisposition {
    ContentDisposition {
        disposition: DispositionType::Attachment,
        parameters: vec![DispositionParam::Filename(file_name)],
    }
}

/// `GET /rooms/{code}/logs`
pub async fn list_logs(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, AppError> {
    let code = RoomCode::parse(&path)?;
    let room = state.rooms.get(&code)?;
    let logs = lock_room(&room).summaries();

    Ok(HttpResponse::Ok().json(json!({
        "room_code": code,
        "count": logs.len(),
        "logs": logs
    })))
}

/// `GET /rooms/{code}/logs/{index}/wav`
pub async fn download_transmission(
    state: web::Data<AppState>,
    path: web::Path<(String, usize)>,
) -> Result<HttpResponse, AppError> {
    let (code, index) = path.into_inner();
    let code = RoomCode::parse(&code)?;
    let room = state.rooms.get(&code)?;

    let transmission = lock_room(&room)
        .transmission(index)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("Transmission {} in room {}", index, code)))?;

    let wav = exporter::export_single(&transmission)?;
    let file_name = exporter::file_name(&transmission)?;

    Ok(HttpResponse::Ok()
        .content_type("audio/wav")
        .insert_header(attachment(file_name))
        .body(wav))
}

/// `GET /rooms/{code}/export?perspective=admin|participant`
pub async fn export_logs(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ExportQuery>,
) -> Result<HttpResponse, AppError> {
    let code = RoomCode::parse(&path)?;
    let room = state.rooms.get(&code)?;
    let log = lock_room(&room).fetch_log();
    let limit = state.get_config().archive.export_timeout();

    let export = exporter::export_batch_within(log, query.perspective, limit).await?;

    let skipped: Vec<String> = export.failures.iter().map(|(index, _)| index.to_string()).collect();
    if !skipped.is_empty() {
        warn!(room = %code, skipped = %skipped.join(","), "Export finished with skipped transmissions");
    }
    info!(room = %code, entries = export.entries.len(), bytes = export.archive.len(), "Archive exported");

    Ok(HttpResponse::Ok()
        .content_type("application/x-tar")
        .insert_header(attachment(format!("room-{}.tar", code)))
        .insert_header((EXPORT_SKIPPED_HEADER, skipped.join(",")))
        .body(export.archive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::recorder::SessionRecorder;
    use crate::config::AppConfig;
    use crate::room::transmission::{ContainerType, Transmission};
    use actix_web::{http::StatusCode, test, App};

    const TS: i64 = 1_709_647_629_000;

    fn state_with_log() -> (web::Data<AppState>, RoomCode) {
        let state = AppState::new(AppConfig::default());
        let created = state.rooms.create_room("Boss", None, None, "c-admin").unwrap();
        {
            let room = state.rooms.get(&created.code).unwrap();
            let mut room = lock_room(&room);
            room.join("Alice", Some("alice".to_string()), "c-alice", 32).unwrap();
            room.join("Bob", Some("bob".to_string()), "c-bob", 32).unwrap();

            let mut recorder = SessionRecorder::new(16_000);
            recorder.append(&[0, 100, -100, 200]);
            let good = recorder.finish("Admin", "Alice", "alice", TS).unwrap();
            room.append_transmission("c-admin", good).unwrap();

            let broken = Transmission {
                sender_name: "Admin".to_string(),
                receiver_name: "Bob".to_string(),
                target_id: "bob".to_string(),
                timestamp: TS,
                sample_rate: 16_000,
                container_type: ContainerType::Wav,
                payload: b"not a wav".to_vec(),
            };
            room.append_transmission("c-admin", broken).unwrap();
        }
        (web::Data::new(state), created.code)
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data($state.clone())
                    .route("/rooms/{code}/logs", web::get().to(list_logs))
                    .route("/rooms/{code}/logs/{index}/wav", web::get().to(download_transmission))
                    .route("/rooms/{code}/export", web::get().to(export_logs)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_list_logs() {
        let (state, code) = state_with_log();
        let app = app!(state);

        let req = test::TestRequest::get().uri(&format!("/rooms/{}/logs", code)).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["logs"][0]["receiver_name"], "Alice");
    }

    #[actix_web::test]
    async fn test_single_wav_download() {
        let (state, code) = state_with_log();
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri(&format!("/rooms/{}/logs/0/wav", code))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("content-type").unwrap(), "audio/wav");
        let body = test::read_body(resp).await;
        assert_eq!(&body[..4], b"RIFF");

        let req = test::TestRequest::get()
            .uri(&format!("/rooms/{}/logs/9/wav", code))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_broken_payload_is_unprocessable() {
        let (state, code) = state_with_log();
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri(&format!("/rooms/{}/logs/1/wav", code))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[actix_web::test]
    async fn test_export_reports_skipped_entries() {
        let (state, code) = state_with_log();
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri(&format!("/rooms/{}/export?perspective=admin", code))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("content-type").unwrap(), "application/x-tar");
        assert_eq!(resp.headers().get(EXPORT_SKIPPED_HEADER).unwrap(), "1");

        let body = test::read_body(resp).await;
        let mut archive = tar::Archive::new(&body[..]);
        let paths: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(paths, vec!["2024-03-05/Admin/14-07-09_Admin_to_Alice.wav".to_string()]);
    }

    #[actix_web::test]
    async fn test_unknown_and_malformed_rooms() {
        let (state, _) = state_with_log();
        let app = app!(state);

        let req = test::TestRequest::get().uri("/rooms/12a4/logs").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let free = (0..10_000)
            .filter_map(RoomCode::from_index)
            .find(|c| state.rooms.get(c).is_err())
            .unwrap();
        let req = test::TestRequest::get()
            .uri(&format!("/rooms/{}/export", free))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}
