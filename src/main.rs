// src/main.rs

mod ai;
mod app_state;
mod auth;
mod config;
mod error;
mod group_chat;
mod memory_store;
mod models;
mod mongo_store;
mod session;
mod store;
mod tasks;

use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{info, warn};

use crate::ai::GeminiClient;
use crate::app_state::AppState;
use crate::memory_store::MemoryStore;
use crate::mongo_store::MongoStore;
use crate::session::{Authentication, SessionEvent, SessionEvents};
use crate::store::DocumentStore;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // AUTH
        .service(
            web::scope("/auth")
                .route("/signup", web::post().to(auth::signup))
                .route("/login", web::post().to(auth::login))
                .route("/logout", web::post().to(auth::logout))
                .route("/account", web::delete().to(auth::remove_account))
                .route("/me", web::get().to(auth::me)),
        )
        // TASKS
        .service(
            web::scope("/tasks")
                .route("", web::get().to(tasks::get_tasks))
                .route("", web::post().to(tasks::post_task))
                .route("/{task_id}", web::put().to(tasks::put_task))
                .route("/{task_id}", web::delete().to(tasks::remove_task)),
        )
        // GROUPS AND MESSAGES
        .service(
            web::scope("/groups")
                .route("", web::get().to(group_chat::get_groups))
                .route("", web::post().to(group_chat::post_group))
                .route("/mine", web::get().to(group_chat::get_my_groups))
                .route("/{group_id}", web::delete().to(group_chat::remove_group))
                .route("/{group_id}/join", web::post().to(group_chat::join_group))
                .route("/{group_id}/messages", web::get().to(group_chat::get_messages))
                .route("/{group_id}/messages", web::post().to(group_chat::post_message)),
        )
        // AI
        .service(web::scope("/ai").route("/generate", web::post().to(ai::generate)));
}

async fn open_store(config: &config::Config) -> io::Result<Arc<dyn DocumentStore>> {
    match &config.mongo_uri {
        Some(uri) => {
            let mongo = MongoStore::init(uri, &config.database_name)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            info!("Using MongoDB database {}", config.database_name);
            Ok(Arc::new(mongo))
        }
        None => {
            warn!("MONGO_URI not set; data lives in memory and is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = config::Config::from_env()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    let store = open_store(&config).await?;
    let generator = Arc::new(GeminiClient::from_config(&config));
    let sessions = Arc::new(SessionEvents::new());

    // Lives until the server stops.
    let _session_log = sessions.subscribe(|event| match event {
        SessionEvent::SignedIn(identity) => info!("User {} signed in", identity.uid),
        SessionEvent::SignedOut(identity) => info!("User {} signed out", identity.uid),
    });
    info!("Session listeners registered: {}", sessions.listener_count());

    let state = AppState {
        store,
        generator,
        sessions,
        config: config.clone(),
    };

    info!("Server running at http://{}", config.bind_address);
    info!("Allowed CORS Origin: {}", config.frontend_origin);

    let frontend_origin = config.frontend_origin.clone();
    let jwt_secret = config.jwt_secret.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Authentication::new(jwt_secret.clone()))
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    })
    .bind(&config.bind_address)?
    .run()
    .await
}
