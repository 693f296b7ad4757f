use axum::body::to_bytes;
use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::shared::format::format_number;

/// Middleware для логирования HTTP запросов
///
/// Пишет в лог метод, путь, статус, длительность и размер ответа.
/// Ответы с ошибкой (4xx/5xx) логируются как `warn`.
pub async fn request_logger(req: Request<Body>, next: Next) -> Response {
    let start = std::time::Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;
    let (parts, body) = response.into_parts();

    // Читаем тело ответа, чтобы узнать реальный размер
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(
                "{} {} -> {} | {}ms | body error: {}",
                method,
                path,
                parts.status.as_u16(),
                start.elapsed().as_millis(),
                e
            );
            return Response::from_parts(parts, Body::default());
        }
    };

    let status = parts.status;
    let elapsed = start.elapsed().as_millis();
    let size = format_number(bytes.len());
    if status.is_client_error() || status.is_server_error() {
        tracing::warn!("{} {} -> {} | {}ms | {} bytes", method, path, status.as_u16(), elapsed, size);
    } else {
        tracing::info!("{} {} -> {} | {}ms | {} bytes", method, path, status.as_u16(), elapsed, size);
    }

    Response::from_parts(parts, Body::from(bytes))
}
