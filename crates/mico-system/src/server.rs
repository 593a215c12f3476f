use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Json, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;

use mico::config::{ConfigState, EasyLinkBypass};
use mico::message::{ConfigReport, ConfigUpdate};
use mico::wlan::{Interface, JoinParams};

use serde_json::json;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tower::Service;

use tracing::{debug, error, info, warn};

use crate::config::{MAX_CONFIG_CLIENTS, SOFT_AP_JOIN_DELAY};
use crate::error::{Error, ErrorKind, Result};
use crate::flash::Partition;
use crate::ota;
use crate::power::PowerState;
use crate::system::Context;

/// Path of the configuration report.
pub const CONFIG_READ_PATH: &str = "/config-read";
/// Path of a configuration update.
pub const CONFIG_WRITE_PATH: &str = "/config-write";
/// Path of a configuration update sent through the soft access point.
pub const CONFIG_WRITE_UAP_PATH: &str = "/config-write-uap";
/// Path of a firmware upload.
pub const OTA_PATH: &str = "/OTA";
/// Content type of a firmware upload.
pub const OTA_CONTENT_TYPE: &str = "application/ota-stream";

/// A response describing a failed request.
struct ErrorResponse(Response);

type HandlerResult<T> = std::result::Result<T, ErrorResponse>;

impl ErrorResponse {
    fn new(status: StatusCode, error: &Error) -> Self {
        let value = json!({
            "ERROR": error.kind().to_string(),
            "INFO": error.info(),
        });
        Self((status, Json(value)).into_response())
    }

    fn status(status: StatusCode, kind: ErrorKind, info: &'static str) -> Self {
        Self::new(status, &Error::new(kind, info))
    }
}

impl From<Error> for ErrorResponse {
    fn from(error: Error) -> Self {
        let status = match error.kind() {
            ErrorKind::Param | ErrorKind::Serialization | ErrorKind::Connection => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, &error)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        self.0
    }
}

/// A running configuration server.
pub struct ServerHandle {
    address: SocketAddr,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Returns the address the server listens on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Whether the listener stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the listener and every client handler, then waits for the
    /// listener.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            error!("Configuration server task failed: {e}");
        }
    }
}

fn router(context: Arc<Context>) -> Router {
    Router::new()
        .route(CONFIG_READ_PATH, get(config_read))
        .route(CONFIG_WRITE_PATH, post(config_write))
        .route(CONFIG_WRITE_UAP_PATH, post(config_write_uap))
        .route(OTA_PATH, post(ota_upload))
        .with_state(context)
}

/// Binds the configuration server and starts accepting clients.
pub(crate) async fn start(context: &Arc<Context>) -> Result<ServerHandle> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, context.options.port))
        .await
        .map_err(|e| {
            Error::new(
                ErrorKind::Server,
                format!("Impossible to bind port {}: {e}", context.options.port),
            )
        })?;
    let address = listener.local_addr()?;

    let token = context.shutdown.child_token();
    let task = tokio::spawn(listen(
        listener,
        router(Arc::clone(context)),
        token.clone(),
    ));

    info!("Configuration server listening on {address}");

    Ok(ServerHandle {
        address,
        token,
        task,
    })
}

// Accepts clients until cancelled. A listener failure ends the server.
async fn listen(listener: TcpListener, router: Router, token: CancellationToken) {
    let clients = Arc::new(Semaphore::new(MAX_CONFIG_CLIENTS));

    loop {
        let permit = tokio::select! {
            () = token.cancelled() => break,
            permit = Arc::clone(&clients).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Client slots closed: {e}");
                    break;
                }
            },
        };

        let (stream, peer) = tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Configuration server listener failed: {e}");
                    break;
                }
            },
        };

        debug!("Client {peer} connected");
        let router = router.clone();
        let client_token = token.child_token();
        let _ = tokio::spawn(async move {
            serve_client(stream, router, client_token).await;
            debug!("Client {peer} disconnected");
            drop(permit);
        });
    }

    info!("Configuration server stopped");
}

async fn serve_client(stream: TcpStream, router: Router, token: CancellationToken) {
    let service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
        let mut router = router.clone();
        router.call(request)
    });

    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    let mut connection = std::pin::pin!(connection);
    let mut closing = false;

    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    debug!("Client connection closed: {e}");
                }
                break;
            }
            () = token.cancelled(), if !closing => {
                closing = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    }
}

async fn config_read(State(context): State<Arc<Context>>) -> HandlerResult<Response> {
    let body = {
        let guard = context.store.lock()?;
        ConfigReport::new(&context.device, guard.system(), guard.status())
            .to_json()
            .map_err(Error::from)?
    };

    debug!("Configuration report sent");

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

fn parse_update(body: &[u8]) -> Result<ConfigUpdate> {
    if body.is_empty() {
        return Err(Error::new(ErrorKind::Param, "Empty configuration"));
    }
    ConfigUpdate::from_json(body).map_err(|e| {
        warn!("Malformed configuration: {e}");
        Error::from(e)
    })
}

async fn config_write(
    State(context): State<Arc<Context>>,
    body: Bytes,
) -> HandlerResult<StatusCode> {
    let update = parse_update(&body)?;
    info!("New configuration received");

    let applied = {
        let mut guard = context.store.lock()?;
        let applied = update.apply(guard.system_mut());
        let _ = guard.system_mut().advance(ConfigState::AllConfigured);
        guard.commit()?;
        applied
    };

    if let Some(identifier) = applied.identifier {
        context.set_identifier(identifier);
        context.update_advertisement(Interface::Station);
    }

    if applied.need_reboot {
        context.power.request_transition(PowerState::SoftwareReset);
    }

    Ok(StatusCode::OK)
}

async fn config_write_uap(
    State(context): State<Arc<Context>>,
    body: Bytes,
) -> HandlerResult<StatusCode> {
    let update = parse_update(&body)?;
    info!("New configuration received through the soft access point");

    let params = {
        let mut guard = context.store.lock()?;
        guard.system_mut().easylink_bypass = EasyLinkBypass::No;
        let applied = update.apply(guard.system_mut());
        if let Some(identifier) = applied.identifier {
            context.set_identifier(identifier);
        }
        guard.commit()?;
        JoinParams::normal(guard.system())
    };

    let _ = tokio::spawn(async move {
        tokio::select! {
            () = context.shutdown.cancelled() => return,
            () = tokio::time::sleep(SOFT_AP_JOIN_DELAY) => {}
        }
        if let Err(e) = context.wifi.suspend_soft_ap() {
            error!("Soft access point not suspended: {e}");
        }
        context.connect(&params);
    });

    Ok(StatusCode::OK)
}

async fn ota_upload(
    State(context): State<Arc<Context>>,
    headers: HeaderMap,
    request: Request,
) -> HandlerResult<StatusCode> {
    if context.flash.partition(Partition::OtaTemp).is_none() {
        return Err(ErrorResponse::status(
            StatusCode::NOT_FOUND,
            ErrorKind::NotInitialized,
            "The device has no OTA partition",
        ));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    if !content_type.is_some_and(|value| value.eq_ignore_ascii_case(OTA_CONTENT_TYPE)) {
        return Err(ErrorResponse::status(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::Param,
            "Firmware images are sent as `application/ota-stream`",
        ));
    }

    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());

    info!("Receiving an OTA image");
    let stream = request.into_body().into_data_stream();
    let _ = ota::receive(&context, stream, content_length).await?;

    Ok(StatusCode::OK)
}
