//! JSON capture boundary over HTTP.
//!
//! Thin wrapper: decode the `{ "image": "<data-url>" }` envelope, hand
//! the bytes to the engine, return `{ "message": ... }`. Semantic
//! failures (bad payload, no face, not recognized) ride in the message
//! with HTTP 200; only storage/engine faults become HTTP 500.

use crate::engine::EngineHandle;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
struct ScanRequest {
    image: Option<String>,
}

#[derive(Serialize)]
struct ScanResponse {
    message: String,
}

#[derive(Serialize)]
struct AttendanceEntry {
    student_id: String,
    name: String,
    date: String,
    status: String,
}

/// Decode a browser `canvas.toDataURL()` payload into raw image bytes.
///
/// Accepts both full data URLs (`data:image/jpeg;base64,...`) and bare
/// base64.
fn decode_data_url(payload: &str) -> Option<Vec<u8>> {
    let encoded = match payload.split_once(',') {
        Some((_, rest)) => rest,
        None => payload,
    };
    BASE64.decode(encoded.trim()).ok()
}

async fn index() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(include_str!("../static/index.html"))
}

async fn attendance(engine: web::Data<EngineHandle>) -> impl Responder {
    match engine.attendance().await {
        Ok(rows) => {
            let entries: Vec<AttendanceEntry> = rows
                .into_iter()
                .map(|r| AttendanceEntry {
                    student_id: r.student_id,
                    name: r.name,
                    date: r.date.format("%Y-%m-%d").to_string(),
                    status: r.status,
                })
                .collect();
            HttpResponse::Ok().json(entries)
        }
        Err(e) => {
            tracing::error!(error = %e, "attendance read failed");
            HttpResponse::InternalServerError().json(ScanResponse {
                message: format!("❌ Error reading attendance: {e}"),
            })
        }
    }
}

async fn scan(engine: web::Data<EngineHandle>, body: web::Json<ScanRequest>) -> impl Responder {
    let Some(payload) = body.image.as_deref() else {
        return HttpResponse::Ok().json(ScanResponse {
            message: "❌ No image data received".to_string(),
        });
    };

    let Some(image_bytes) = decode_data_url(payload) else {
        return HttpResponse::Ok().json(ScanResponse {
            message: "❌ Could not decode image".to_string(),
        });
    };

    match engine.scan(image_bytes).await {
        Ok(message) => HttpResponse::Ok().json(ScanResponse { message }),
        Err(e) => {
            tracing::error!(error = %e, "scan failed");
            HttpResponse::InternalServerError().json(ScanResponse {
                message: format!("❌ Error processing image: {e}"),
            })
        }
    }
}

/// Run the HTTP server until shutdown.
pub async fn serve(bind: &str, engine: EngineHandle) -> std::io::Result<()> {
    let engine = web::Data::new(engine);
    tracing::info!(bind, "capture endpoint listening");

    HttpServer::new(move || {
        App::new()
            .app_data(engine.clone())
            .route("/", web::get().to(index))
            .route("/attendance", web::get().to(attendance))
            .route("/scan", web::post().to(scan))
    })
    .bind(bind)?
    .run()
    .await
}
