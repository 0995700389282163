use crate::http::request::Request;
use crate::http::response::Response;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Something that turns a request into a response.
///
/// Any `async` closure or function taking a [`Request`] implements this
/// directly. Such handlers own the request and read its body lazily through
/// [`Request::body_mut`]. Use [`sync`] for plain functions that want the
/// whole body up front.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Request) -> BoxFuture<Response>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, request: Request) -> BoxFuture<Response> {
        Box::pin((self)(request))
    }
}

/// Wraps a synchronous function as a [`Handler`].
///
/// ```
/// # use localbackend::routing::handler;
/// # use localbackend::http::response::Response;
/// let pong = handler::sync(|_req| Response::ok("pong"));
/// # let _ = pong;
/// ```
pub fn sync<F>(f: F) -> SyncHandler<F>
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    SyncHandler { f: Arc::new(f) }
}

/// A synchronous handler. The request body is read into memory before the
/// function runs, so [`Request::body_bytes`] holds the full body.
pub struct SyncHandler<F> {
    f: Arc<F>,
}

impl<F> Handler for SyncHandler<F>
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    fn call(&self, mut request: Request) -> BoxFuture<Response> {
        let f = Arc::clone(&self.f);
        Box::pin(async move {
            if let Err(err) = request.body_mut().materialize().await {
                tracing::debug!(error = %err, "failed to read request body");
                return Response::from_body_error(&err);
            }
            f(&request)
        })
    }
}
