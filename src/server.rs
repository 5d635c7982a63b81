use crate::capture;
use crate::error::Error;
use crate::profiler::{Format, Profiler};
use crate::search::{Search, SharedRng, Source};
use hyper::header::CONTENT_TYPE;
use hyper::http::request::Parts;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{error, info, trace};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tokio::sync::watch;
use tokio::task;

const INDEX: &str = r#"
		<a href="/compute1">/compute1</a> <br>
		<a href="/compute2">/compute2</a>
	"#;

const PPROF_INDEX: &str = r#"<!doctype html>
<html>
    <head>
        <title>/debug/pprof/</title>
    </head>
    <body>
        <h3>/debug/pprof/</h3>
        <a href="/debug/pprof/profile?seconds=30">profile</a>: CPU profile in protobuf format<br>
        <a href="/debug/pprof/flamegraph?seconds=30">flamegraph</a>: CPU profile as an SVG flame graph<br>
        Add <code>?seconds=N</code> to change the capture duration (at most 3600).
    </body>
</html>
"#;

const ROUTES: &[&str] = &[
    "/",
    "/compute1",
    "/compute2",
    "/customprofile",
    "/debug/pprof",
    "/debug/pprof/",
    "/debug/pprof/profile",
    "/debug/pprof/flamegraph",
];

/// Everything the handlers share.
#[derive(Clone)]
pub struct State {
    profiler: Profiler,
    shared: SharedRng,
    search: Search,
    shutdown: watch::Receiver<bool>,
}

impl State {
    pub fn new(profiler: Profiler) -> Self {
        State {
            profiler,
            shared: SharedRng::from_entropy(),
            search: Search::default(),
            shutdown: watch::channel(false).1,
        }
    }

    pub fn with_search(mut self, search: Search) -> Self {
        self.search = search;
        self
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }
}

/// Binds `addr` and returns the bound address with the server future, which
/// resolves once `shutdown` fires and open connections have drained. Running
/// profile captures are cut short when `shutdown` fires.
pub fn bind<F>(
    addr: &SocketAddr,
    state: State,
    shutdown: F,
) -> Result<(SocketAddr, impl Future<Output = Result<(), Error>>), Error>
where
    F: Future<Output = ()>,
{
    let builder = Server::try_bind(addr)?;
    let (notify, receiver) = watch::channel(false);
    let state = State {
        shutdown: receiver,
        ..state
    };
    let make_service = make_service_fn(move |_: &AddrStream| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| microservice_handler(req, state.clone())))
        }
    });
    let server = builder.serve(make_service);
    let local_addr = server.local_addr();
    let server = server.with_graceful_shutdown(async move {
        shutdown.await;
        let _ = notify.send(true);
    });
    Ok((local_addr, async move { server.await.map_err(Error::from) }))
}

async fn microservice_handler(req: Request<Body>, state: State) -> Result<Response<Body>, Infallible> {
    trace!("Incoming request is: {:?}", req);
    let (parts, _) = req.into_parts();
    let response = match route(&parts, &state).await {
        Ok(response) => response,
        Err(err) => {
            error!("Request to {} failed: {}", parts.uri.path(), err);
            response_with_code(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    };
    Ok(response)
}

async fn route(req: &Parts, state: &State) -> Result<Response<Body>, Error> {
    match (&req.method, req.uri.path()) {
        (&Method::GET, "/") => html(INDEX),
        (&Method::GET, "/compute1") => {
            let source = Source::Shared(state.shared.clone());
            compute("compute1", state.search, source).await
        }
        (&Method::GET, "/compute2") => compute("compute2", state.search, Source::Seeded).await,
        (&Method::GET, "/customprofile") | (&Method::GET, "/debug/pprof/profile") => {
            profile(req, state, Format::Protobuf)
        }
        (&Method::GET, "/debug/pprof/flamegraph") => {
            profile(req, state, Format::Flamegraph)
        }
        (&Method::GET, "/debug/pprof") | (&Method::GET, "/debug/pprof/") => html(PPROF_INDEX),
        (_, path) if ROUTES.contains(&path) => {
            Ok(response_with_code(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"))
        }
        _ => Ok(response_with_code(StatusCode::NOT_FOUND, "Not Found")),
    }
}

async fn compute(name: &'static str, search: Search, source: Source) -> Result<Response<Body>, Error> {
    info!("{}: starting computation", name);
    let outcome = task::spawn_blocking(move || search.run(&source)).await?;
    match outcome.found {
        Some(n) => info!("{}: found {}", name, n),
        None => info!("{}: no multiple found", name),
    }
    let response = Response::builder()
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(outcome.to_string().into())?;
    Ok(response)
}

fn profile(req: &Parts, state: &State, format: Format) -> Result<Response<Body>, Error> {
    let shutdown = state.shutdown.clone();
    capture::handle_profile_request(req.uri.query(), &state.profiler, format, shutdown)
}

fn html(body: &'static str) -> Result<Response<Body>, Error> {
    let response = Response::builder()
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .body(body.into())?;
    Ok(response)
}

fn response_with_code(status_code: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status_code;
    response
}
