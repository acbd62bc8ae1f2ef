use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use tokio::sync::watch;
use warp::filters::BoxedFilter;
use warp::http::{StatusCode, Uri};
use warp::path::FullPath;
use warp::reply::Response;
use warp::{reply, Filter, Rejection, Reply};

use crate::config::{ServerConfig, TlsConfig};
use crate::error::ServerError;
use crate::image_index::ImageIndex;
use crate::scanner::is_hidden_path;

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: String,
}

impl<T> ApiResponse<T> {
    fn success(data: T, message: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Body of `/api/index/:index`. `image` is null when the index is out of range.
#[derive(Debug, Serialize)]
struct IndexReply {
    image: Option<String>,
    index: usize,
}

#[derive(Clone)]
pub struct ServerState {
    pub index: ImageIndex,
    pub started_at: DateTime<Utc>,
    pub frontend_dir: Option<PathBuf>,
}

impl ServerState {
    pub fn new(index: ImageIndex, frontend_dir: Option<PathBuf>) -> Self {
        Self {
            index,
            started_at: Utc::now(),
            frontend_dir,
        }
    }
}

fn with_index(index: ImageIndex) -> impl Filter<Extract = (ImageIndex,), Error = Infallible> + Clone {
    warp::any().map(move || index.clone())
}

pub fn api_routes(state: ServerState) -> BoxedFilter<(Response,)> {
    let health = warp::path!("api" / "health").and(warp::get()).map(|| {
        reply::json(&ApiResponse::success(
            serde_json::json!({ "status": "healthy" }),
            "Slideshow server is running",
        ))
        .into_response()
    });

    let version = warp::path!("api" / "version").and(warp::get()).map(|| {
        let version_info = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "commit_hash": env!("GIT_COMMIT_HASH"),
            "commit_short": env!("GIT_COMMIT_SHORT"),
            "branch": env!("GIT_BRANCH"),
            "build_time": env!("BUILD_TIME")
        });
        reply::json(&ApiResponse::success(version_info, "Version information")).into_response()
    });

    let status_state = state.clone();
    let status = warp::path!("api" / "status")
        .and(warp::get())
        .and_then(move || {
            let state = status_state.clone();
            async move { Ok::<_, Infallible>(status_handler(&state).await) }
        });

    let random = warp::path!("api" / "random-image")
        .and(warp::get())
        .and(with_index(state.index.clone()))
        .and_then(random_image_handler);

    let by_index = warp::path!("api" / "index" / usize)
        .and(warp::get())
        .and(with_index(state.index.clone()))
        .and_then(index_handler);

    health
        .or(version)
        .unify()
        .or(status)
        .unify()
        .or(random)
        .unify()
        .or(by_index)
        .unify()
        .boxed()
}

async fn status_handler(state: &ServerState) -> Response {
    let status = serde_json::json!({
        "image_count": state.index.len().await,
        "root": state.index.root().to_string_lossy(),
        "started_at": state.started_at,
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
    });
    reply::json(&ApiResponse::success(status, "Status retrieved")).into_response()
}

async fn random_image_handler(index: ImageIndex) -> Result<Response, Infallible> {
    Ok(match index.pick_random().await {
        Ok(entry) => reply::json(&entry).into_response(),
        Err(e) => reply::with_status(
            reply::json(&ErrorBody { error: e.to_string() }),
            StatusCode::NOT_FOUND,
        )
        .into_response(),
    })
}

async fn index_handler(index: usize, images: ImageIndex) -> Result<Response, Infallible> {
    let image = images.pick_by_index(index).await.map(|entry| entry.image);
    Ok(reply::json(&IndexReply { image, index }).into_response())
}

/// Every route served by the slideshow: the JSON API, the images under the
/// index root, and the front-end build when one is configured.
pub fn routes(state: ServerState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    // fs::dir refuses `..` segments, so requests cannot leave the root
    let root = state.index.root().to_path_buf();
    let images = warp::path("images")
        .and(warp::get())
        .and(warp::fs::dir(root.clone()))
        .and_then(move |file: warp::fs::File| {
            let hidden = is_hidden_path(&root, file.path());
            async move {
                match hidden {
                    true => Err(warp::reject::not_found()),
                    false => Ok(file.into_response()),
                }
            }
        });

    let app = api_routes(state.clone()).or(images).unify().boxed();
    let app = match state.frontend_dir.clone() {
        Some(dir) => app
            .or(warp::get()
                .and(warp::fs::dir(dir))
                .map(|file: warp::fs::File| file.into_response()))
            .unify()
            .boxed(),
        None => app,
    };

    app.with(
        warp::cors()
            .allow_any_origin()
            .allow_headers(vec!["content-type"])
            .allow_methods(vec!["GET"]),
    )
}

/// Location on the HTTPS listener for a request that arrived as plaintext.
pub fn https_redirect_target(host: &str, path_and_query: &str, https_port: u16) -> Option<Uri> {
    let hostname = if host.starts_with('[') {
        // IPv6 literal, keep the brackets
        &host[..=host.find(']')?]
    } else {
        host.split(':').next()?
    };
    if hostname.is_empty() {
        return None;
    }
    let authority = match https_port {
        443 => hostname.to_string(),
        port => format!("{}:{}", hostname, port),
    };
    format!("https://{}{}", authority, path_and_query).parse().ok()
}

pub fn https_redirect(https_port: u16) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let query = warp::query::raw().or(warp::any().map(String::new)).unify();
    warp::header::optional::<String>("host")
        .and(warp::path::full())
        .and(query)
        .map(move |host: Option<String>, path: FullPath, query: String| {
            let path_and_query = match query.is_empty() {
                true => path.as_str().to_string(),
                false => format!("{}?{}", path.as_str(), query),
            };
            match host.and_then(|host| https_redirect_target(&host, &path_and_query, https_port)) {
                Some(location) => warp::redirect::permanent(location).into_response(),
                None => reply::with_status("missing host header", StatusCode::BAD_REQUEST).into_response(),
            }
        })
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Serves until `shutdown` flips to true. With TLS configured the API moves
/// to the HTTPS port and the plain port only redirects.
pub async fn run_http_server(
    config: &ServerConfig,
    state: ServerState,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();

    match &config.tls {
        None => {
            let (bound, server) = warp::serve(routes(state))
                .try_bind_with_graceful_shutdown(addr, wait_for_shutdown(shutdown))
                .map_err(|source| ServerError::Bind { addr, source })?;
            log_listening("http", bound.port());
            server.await;
        }
        Some(TlsConfig { key, cert, https_port }) => {
            for file in [key, cert] {
                if !file.exists() {
                    return Err(ServerError::MissingTlsFile(file.clone()));
                }
            }
            let https_addr: SocketAddr = ([0, 0, 0, 0], *https_port).into();
            let (bound, https_server) = warp::serve(routes(state))
                .tls()
                .cert_path(cert)
                .key_path(key)
                .try_bind_with_graceful_shutdown(https_addr, wait_for_shutdown(shutdown.clone()))
                .map_err(|source| ServerError::Bind {
                    addr: https_addr,
                    source,
                })?;
            log_listening("https", bound.port());

            let (redirect_bound, redirect_server) = warp::serve(https_redirect(*https_port))
                .try_bind_with_graceful_shutdown(addr, wait_for_shutdown(shutdown))
                .map_err(|source| ServerError::Bind { addr, source })?;
            info!(
                "Redirecting http://0.0.0.0:{} to https port {}",
                redirect_bound.port(),
                https_port
            );

            tokio::join!(https_server, redirect_server);
        }
    }

    info!("HTTP server stopped");
    Ok(())
}

fn log_listening(scheme: &str, port: u16) {
    info!("Slideshow server running on {}://localhost:{}", scheme, port);
    match local_ip() {
        Some(ip) => info!("Accessible on your network at: {}://{}:{}", scheme, ip, port),
        None => info!("Could not determine the LAN address"),
    }
}

/// Address of the interface that routes outward. Connecting a UDP socket
/// sends no packets.
fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_unspecified() {
        None
    } else {
        Some(ip)
    }
}
