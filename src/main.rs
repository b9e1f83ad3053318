use std::net::SocketAddr;
use std::time::Duration;

use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use url::Url;

pub use crdb_dbaas_operator::{self, cloud::credentials::CloudSettings, telemetry, State};
use crdb_dbaas_operator::cloud::client::DEFAULT_ENDPOINT;

#[derive(Debug, clap::Parser)]
struct Arguments {
    /// CockroachDB Cloud API base URL
    #[arg(long = "api-endpoint", env = "CRDB_CLOUD_API_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    api_endpoint: Url,

    /// Timeout applied to every CockroachDB Cloud request
    #[arg(
        long = "request-timeout-seconds",
        env = "CRDB_CLOUD_REQUEST_TIMEOUT_SECONDS",
        default_value_t = 30
    )]
    request_timeout_seconds: u64,

    /// How often a synced inventory is refreshed
    #[arg(
        long = "inventory-resync-seconds",
        env = "INVENTORY_RESYNC_SECONDS",
        default_value_t = 300
    )]
    inventory_resync_seconds: u64,

    /// Address of the metrics and diagnostics server
    #[arg(long = "bind-address", env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind_address: SocketAddr,

    #[arg(long = "log-format", env = "LOG_FORMAT", value_enum, default_value_t)]
    log_format: telemetry::LogFormat,
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok()
            .content_type(encoder.format_type())
            .body(buffer),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Arguments = Arguments::parse();
    telemetry::init(args.log_format)?;

    let state = State::new(
        CloudSettings {
            endpoint: args.api_endpoint,
            timeout: Duration::from_secs(args.request_timeout_seconds),
        },
        Duration::from_secs(args.inventory_resync_seconds),
    );
    let controller = crdb_dbaas_operator::run(state.clone());
    tokio::pin!(controller);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(args.bind_address)?
    .shutdown_timeout(5)
    .run();

    tokio::pin!(server);

    // Both runtimes implements graceful shutdown, so poll until both are done
    tokio::join!(controller, server).1?;
    Ok(())
}
