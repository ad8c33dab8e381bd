use actix_cors::Cors;
use actix_web::http::header;
use actix_web::{middleware, web, App, HttpServer};
use extforge::config::Config;
use extforge::expansion::ExpansionState;
use extforge::gateway::{CredentialProvider, GeminiGateway, GenerationGateway, StaticCredential};
use extforge::handlers::{self, AppState};
use log::{info, warn};
use rustls::ServerConfig;
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::env;
use std::fs::File as FsFile;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

fn load_tls_config(cert_path: &str, key_path: &str) -> io::Result<ServerConfig> {
    // reqwest links a second rustls provider, so pick one explicitly.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let cert_file = &mut BufReader::new(FsFile::open(cert_path)?);
    let key_file = &mut BufReader::new(FsFile::open(key_path)?);
    let cert_chain = certs(cert_file).collect::<Result<Vec<_>, _>>()?;
    let mut keys = pkcs8_private_keys(key_file).collect::<Result<Vec<_>, _>>()?;

    if keys.is_empty() {
        return Err(io::Error::new(io::ErrorKind::Other, "No private keys found in key file"));
    }

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, keys.remove(0).into())
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    // Override the log level with RUST_LOG, e.g. `RUST_LOG=debug`.
    env::set_var("RUST_LOG", env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()));
    env_logger::init();

    let config = Config::from_env();
    let credentials: Arc<dyn CredentialProvider> = Arc::new(StaticCredential::new(config.api_key.clone()));
    if !credentials.has_active_credential() {
        warn!("No GEMINI_API_KEY configured; set one from the UI before generating.");
    }
    let gateway: Arc<dyn GenerationGateway> = Arc::new(
        GeminiGateway::new(&config, credentials.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?,
    );
    let state = web::Data::new(
        AppState::new(gateway, credentials, config.chat_history_window)
            .with_default_expansion(ExpansionState::with_expanded(config.default_expanded.clone())),
    );

    let addr = config.addr();
    info!("Server running at http://{}", addr);

    let mut http_server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .configure(handlers::configure)
            .default_service(web::to(handlers::static_handler))
    });

    match (&config.cert_path, &config.key_path) {
        (Some(cert_path), Some(key_path)) => {
            if !Path::new(cert_path).exists() || !Path::new(key_path).exists() {
                warn!("CERT_PATH or KEY_PATH points to a non-existent file. Starting without HTTPS.");
                http_server = http_server.bind(&addr)?;
            } else {
                info!("Attempting to start HTTPS server...");
                let tls_config = load_tls_config(cert_path, key_path)?;
                info!("Successfully configured TLS. Binding to https://{}", addr);
                http_server = http_server.bind_rustls_0_23(&addr, tls_config)?;
            }
        }
        _ => {
            info!("No CERT_PATH or KEY_PATH found in env. Starting plain HTTP server.");
            http_server = http_server.bind(&addr)?;
        }
    }

    http_server.run().await
}
