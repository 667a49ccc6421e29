use actix_cors::Cors;
use actix_csrf::CsrfMiddleware;
use actix_session::{storage::CookieSessionStore, SessionExt, SessionMiddleware};
use actix_web::http::header;
use actix_web::{
    cookie::Key,
    middleware::{DefaultHeaders, Logger},
    web, App, HttpResponse, HttpServer, Responder,
};
use clap::Parser;
use desa_backend::{
    config::Config,
    helper::{admin_helpers, asset_store::LocalAssetStore},
    middleware::admin_guard,
    routes, AppState,
};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rand::prelude::StdRng;
use redb::Database;
use std::convert::TryFrom;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tera::Tera;

async fn root_handler() -> impl Responder {
    HttpResponse::Ok().content_type("text/plain").body("OK")
}

#[derive(Parser, Debug)]
#[command(name = "desa_server", author, version, about = "Starts the village website backend.")]
struct Cli {
    /// Path to the .env configuration file.
    #[arg(long, required = true, value_name = "FILE")]
    env_file: PathBuf,
}

fn build_cors(allowed_origins: &str) -> Cors {
    let cors = if allowed_origins.trim() == "*" {
        Cors::default().allow_any_origin()
    } else {
        allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };
    cors.allowed_methods(vec!["GET", "POST"])
        .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
        .supports_credentials()
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env(&cli.env_file).expect("FATAL: Failed to load or parse configuration.");

    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&config.log_level));

    let tera = Tera::new("templates/**/*.html").expect("Tera initialization failed");

    fs::create_dir_all(&config.media_path).expect("Failed to create media directory");

    let activity_db = web::Data::new(Database::open(config.activity_db_path()).expect(
        "FATAL: activity.db not found. Run 'cargo run --bin setup_cli -- --env-file <path> db setup'",
    ));

    let content_db_path = config.content_db_path();
    if !content_db_path.exists() {
        panic!(
            "FATAL: '{}' not found. Run 'cargo run --bin setup_cli -- --env-file <path> db setup'",
            content_db_path.display()
        );
    }
    // Cascading deletes depend on foreign keys, which SQLite enables per connection.
    let manager = SqliteConnectionManager::file(content_db_path)
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::builder().build(manager).expect("FATAL: Failed to create Rusqlite connection pool.");

    let initial_village_name = {
        let conn = pool.get().expect("Failed to get DB connection for initial setup.");
        admin_helpers::get_settings(&conn).village_name
    };

    let app_state = web::Data::new(AppState {
        village_name: Arc::new(RwLock::new(initial_village_name)),
        assets: Arc::new(LocalAssetStore::new(&config.media_path, "/media")),
    });

    let session_key_bytes =
        hex::decode(&config.session_secret_key).expect("FATAL: SESSION_SECRET_KEY in .env is not a valid hex string.");
    let session_key = Key::try_from(session_key_bytes.as_slice())
        .expect("FATAL: The decoded SESSION_SECRET_KEY is not long enough (minimum 64 bytes required).");

    let server_address = format!("{}:{}", config.web.host, config.web.port);
    log::info!("Server starting at http://{}", server_address);

    HttpServer::new(move || {
        let session_mw = SessionMiddleware::builder(CookieSessionStore::default(), session_key.clone())
            .cookie_secure(config.use_secure_cookies)
            .cookie_http_only(true)
            .cookie_same_site(actix_web::cookie::SameSite::Lax)
            .build();

        let admin_url_prefix = config.admin_url_prefix.clone();

        App::new()
            .wrap(build_cors(&config.allowed_origins))
            .wrap(Logger::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
                    .add(("X-XSS-Protection", "1; mode=block")),
            )
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(tera.clone()))
            .app_data(activity_db.clone())
            .app_data(web::Data::new(pool.clone()))
            .app_data(app_state.clone())
            .configure(routes::public::config_api)
            .service(actix_files::Files::new("/media", &config.media_path))
            .route("/", web::get().to(root_handler))
            .service(
                web::scope("")
                    .wrap(session_mw)
                    .service(
                        web::scope("/management").service(
                            web::scope(&admin_url_prefix)
                                .wrap(CsrfMiddleware::<StdRng>::new().set_cookie(
                                    actix_web::http::Method::GET,
                                    format!("/management/{}/login", admin_url_prefix),
                                ))
                                .configure(routes::admin::config_login)
                                .service(
                                    web::scope("")
                                        .guard(actix_web::guard::fn_guard(|ctx| admin_guard(&ctx.get_session())))
                                        .configure(routes::admin::config_api),
                                ),
                        ),
                    ),
            )
    })
    .bind(server_address)?
    .run()
    .await
}
