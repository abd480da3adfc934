use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE, LOCATION,
};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::json;
use tokio::net::TcpListener;

use crate::GraphQLRequest;
use crate::context::RequestContext;
use crate::error::{GatewayError, Result};
use crate::federation_gateway::FederationGateway;

pub type ResponseBody = BoxBody<Bytes, hyper::Error>;

pub const GRAPHQL_PATH: &str = "/graphql";
pub const HEALTH_PATH: &str = "/.well-known/apollo/server-health";

fn full<T: Into<Bytes>>(value: T) -> ResponseBody {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

const GRAPHIQL_HTML: &str = r#"
<!DOCTYPE html>
<html>
<head>
  <title>GraphiQL - Library Gateway</title>
  <link href="https://unpkg.com/graphiql@1.5.0/graphiql.min.css" rel="stylesheet" />
  <style>
    body { margin: 0; padding: 0; height: 100vh; }
    #graphiql { height: 100vh; }
  </style>
</head>
<body>
  <div id="graphiql"></div>

  <script src="https://unpkg.com/react@17.0.2/umd/react.production.min.js"></script>
  <script src="https://unpkg.com/react-dom@17.0.2/umd/react-dom.production.min.js"></script>
  <script src="https://unpkg.com/graphiql@1.5.0/graphiql.min.js"></script>
  <script>
    const token = localStorage.getItem('auth_token') || '';

    function graphQLFetcher(graphQLParams) {
      const headers = { 'Content-Type': 'application/json' };
      if (token) {
        headers['Authorization'] = `Bearer ${token}`;
      }
      return fetch('/graphql', {
        method: 'post',
        headers,
        body: JSON.stringify(graphQLParams),
      }).then(response => response.json());
    }

    ReactDOM.render(
      React.createElement(GraphiQL, { fetcher: graphQLFetcher }),
      document.getElementById('graphiql')
    );
  </script>
</body>
</html>
"#;

/// Binds the listening socket once; a failure is final.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| GatewayError::Bind { addr, source })
}

/// Accepts connections until the listener fails, one task per connection.
pub async fn serve(listener: TcpListener, gateway: Arc<FederationGateway>) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let gateway = Arc::clone(&gateway);

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, Arc::clone(&gateway)));

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                tracing::warn!(%peer, "error processing connection: {}", e);
            }
        });
    }
}

pub async fn handle_request<B>(
    req: Request<B>,
    gateway: Arc<FederationGateway>,
) -> std::result::Result<Response<ResponseBody>, Infallible>
where
    B: Body,
    B::Error: fmt::Display,
{
    // Built before the body is consumed; lives for this request only.
    let context = RequestContext::from_headers(req.headers());

    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, GRAPHQL_PATH) => {
            let body_bytes = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    tracing::debug!("failed to read request body: {}", e);
                    return Ok(respond(
                        StatusCode::BAD_REQUEST,
                        "text/plain",
                        "Failed to read request body",
                    ));
                }
            };

            match serde_json::from_slice::<GraphQLRequest>(&body_bytes) {
                Ok(graphql_req) => {
                    let body = match gateway.process_request(graphql_req, &context).await {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::info!("request failed: {}", e);
                            json!({
                                "errors": [{
                                    "message": e.to_string()
                                }]
                            })
                        }
                    };
                    respond(StatusCode::OK, "application/json", body.to_string())
                }
                Err(e) => respond(
                    StatusCode::BAD_REQUEST,
                    "text/plain",
                    format!("Invalid JSON request: {}", e),
                ),
            }
        }

        (&Method::GET, HEALTH_PATH) => respond(
            StatusCode::OK,
            "application/json",
            json!({ "status": "pass" }).to_string(),
        ),

        (&Method::GET, "/graphiql") => respond(StatusCode::OK, "text/html", GRAPHIQL_HTML),

        (&Method::GET, "/") => Response::builder()
            .status(StatusCode::FOUND)
            .header(LOCATION, "/graphiql")
            .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::OPTIONS, _) => Response::builder()
            .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .header(ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS")
            .header(ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };

    Ok(response)
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<ResponseBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(full(body))
        .unwrap_or_else(|_| internal_server_error())
}

fn internal_server_error() -> Response<ResponseBody> {
    let mut response = Response::new(full("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
