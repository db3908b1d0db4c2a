//! Static web UIs compiled into the binary.

use axum::{
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use rust_embed::RustEmbed;

/// Project management panel.
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/assets/panel"]
pub struct PanelAssets;

/// First-run configuration wizard served by the control plane.
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/assets/setup"]
pub struct SetupAssets;

/// Serve `path` from `E`, falling back to its `index.html` for client-side
/// routes.
pub fn serve_embedded<E: RustEmbed>(path: &str) -> Response {
    let path = path.trim_start_matches('/');

    if !path.is_empty() {
        if let Some(content) = E::get(path) {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            return (
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                content.data.into_owned(),
            )
                .into_response();
        }
    }

    match E::get("index.html") {
        Some(index) => Html(index.data.into_owned()).into_response(),
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}
