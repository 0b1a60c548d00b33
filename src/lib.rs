pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod files;
pub mod handlers;
pub mod learning;
pub mod llm;
pub mod models;
pub mod preferences;
pub mod state;
pub mod system;
pub mod users;
pub mod voice;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::handlers::{
    audio, auth as auth_routes, chat, files as file_routes, settings, system as system_routes,
    training, users as user_routes, voice as voice_routes,
};
pub use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.settings.static_dir);
    let body_limit = DefaultBodyLimit::max(state.settings.max_upload_bytes);

    Router::new()
        .route("/", get(system_routes::root))
        .route("/api/auth/login", post(auth_routes::login_user))
        .route("/api/auth/logout", post(auth_routes::logout_user))
        .route("/api/auth/me", get(auth_routes::current_user))
        .route(
            "/api/users",
            get(user_routes::list_users).post(user_routes::create_user),
        )
        .route(
            "/api/users/:user_id",
            get(user_routes::get_user)
                .patch(user_routes::update_user)
                .delete(user_routes::delete_user),
        )
        .route(
            "/api/files",
            get(file_routes::get_files).post(file_routes::upload_file),
        )
        .route("/api/files/folders", post(file_routes::create_folder))
        .route("/api/files/stats", get(file_routes::get_file_stats))
        .route(
            "/api/files/:file_id",
            get(file_routes::get_file)
                .patch(file_routes::rename_file)
                .delete(file_routes::delete_file),
        )
        .route("/api/files/:file_id/download", get(file_routes::download_file))
        .route("/api/files/:file_id/make_public", post(file_routes::make_file_public))
        .route("/public/:file_id", get(file_routes::serve_public_file))
        .route("/ws/files", get(file_routes::file_events))
        .route(
            "/api/training",
            get(training::list_examples).post(training::create_example),
        )
        .route(
            "/api/training/:id",
            put(training::update_example).delete(training::delete_example),
        )
        .route("/api/chat/", post(chat::chat))
        .route("/api/chat/history", get(chat::chat_history))
        .route("/api/chat/learn", post(chat::learn))
        .route("/api/voice/listen", post(voice_routes::listen))
        .route("/api/voice/speak", post(voice_routes::speak))
        .route("/api/voice/audio/:filename", get(voice_routes::audio_file))
        .route("/api/voice/activate", post(voice_routes::activate))
        .route("/api/voice/deactivate", post(voice_routes::deactivate))
        .route("/api/voice/status", get(voice_routes::status))
        .route("/ws/voice", get(voice_routes::voice_socket))
        .route("/api/audio/transcribe", post(audio::transcribe))
        .route("/api/audio/synthesize", post(audio::synthesize))
        .route("/api/system/status", get(system_routes::system_status))
        .route("/api/system/health", get(system_routes::health_check))
        .route("/api/system/learning/stats", get(system_routes::learning_stats))
        .route("/api/system/reset", post(system_routes::reset_system))
        .route("/api/system/stats", get(system_routes::host_stats))
        .route(
            "/api/preferences",
            get(settings::get_preferences).put(settings::update_preferences),
        )
        .route(
            "/api/settings",
            get(settings::get_settings).patch(settings::patch_settings),
        )
        .nest_service("/static", static_files)
        .layer(body_limit)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
