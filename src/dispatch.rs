//! Call dispatch
//!
//! A [`Dispatcher`] runs one call end to end: build the request from the
//! descriptor and arguments, send it through the pipeline, validate the
//! status and decode the body into the declared shape. Each typed entry
//! point checks the declared shape before anything is sent.

use crate::decode::{Decoded, ErrorTypes, Page, Response, ResponseDecoder};
use crate::error::{DecodeError, Error, Result};
use crate::http::{HttpResponse, ResponseStream};
use crate::operation::{
    ArgValue, Args, OperationDescriptor, ParamKind, RequestBuilder, ReturnShape, NEXT_LINK_ARG,
};
use crate::pipeline::Pipeline;
use crate::serializer::{SerdeAdapter, SerializerAdapter};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::{instrument, Span};

/// Host placeholder the embedded catalogue uses for the service URL
pub const ENDPOINT_ARG: &str = "endpoint";

/// Ties request building, the pipeline and decoding together
#[derive(Clone)]
pub struct Dispatcher {
    pipeline: Pipeline,
    serializer: Arc<dyn SerializerAdapter>,
    decoder: ResponseDecoder,
    defaults: Args,
}

impl Dispatcher {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            serializer: Arc::new(SerdeAdapter),
            decoder: ResponseDecoder::default(),
            defaults: Args::new(),
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn SerializerAdapter>) -> Self {
        self.decoder = ResponseDecoder::new(serializer.clone(), self.decoder.error_types().clone());
        self.serializer = serializer;
        self
    }

    pub fn with_error_types(mut self, error_types: ErrorTypes) -> Self {
        self.decoder = ResponseDecoder::new(self.serializer.clone(), error_types);
        self
    }

    /// Bind the `endpoint` host placeholder for every call
    pub fn with_endpoint(self, endpoint: impl Into<String>) -> Self {
        self.with_default(ENDPOINT_ARG, endpoint.into())
    }

    /// Argument used by every call unless the call supplies its own
    pub fn with_default(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.defaults.set(name, value);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn decoder(&self) -> &ResponseDecoder {
        &self.decoder
    }

    /// Build, send and status-check one request
    #[instrument(
        name = "rest_call",
        skip_all,
        fields(
            operation = descriptor.name(),
            http.method = %descriptor.verb(),
            http.url = tracing::field::Empty,
            http.status_code = tracing::field::Empty,
        )
    )]
    async fn send(&self, descriptor: &OperationDescriptor, args: &Args) -> Result<HttpResponse> {
        let args = args.merged_over(&self.defaults);
        let request = RequestBuilder::new(self.serializer.as_ref()).build(descriptor, &args)?;
        Span::current().record("http.url", request.url.as_str());

        let response = self.pipeline.send(request).await?;
        Span::current().record("http.status_code", response.status.as_u16());

        self.decoder
            .validate(descriptor, response, args.allowed_statuses())
            .await
    }

    /// Call an operation declared to return a value; `None` for an empty body
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        descriptor: &OperationDescriptor,
        args: &Args,
    ) -> Result<Option<T>> {
        expect_shape(descriptor, "value", |shape| {
            matches!(shape, ReturnShape::Value | ReturnShape::Void)
        })?;
        let response = self.send(descriptor, args).await?;
        match self.decoder.decode::<T>(descriptor, response).await? {
            Decoded::Value(value) => Ok(value),
            _ => Ok(None),
        }
    }

    /// Call an operation and keep its status and headers alongside the body
    pub async fn invoke_response<T, H>(
        &self,
        descriptor: &OperationDescriptor,
        args: &Args,
    ) -> Result<Response<T, H>>
    where
        T: DeserializeOwned,
        H: DeserializeOwned,
    {
        expect_shape(descriptor, "response", |shape| {
            !matches!(shape, ReturnShape::Stream | ReturnShape::Paged(_))
        })?;
        let response = self.send(descriptor, args).await?;
        self.decoder.decode_envelope(descriptor, response).await
    }

    /// Call an operation for its status only; the body is discarded
    pub async fn invoke_void(
        &self,
        descriptor: &OperationDescriptor,
        args: &Args,
    ) -> Result<StatusCode> {
        let response = self.send(descriptor, args).await?;
        Ok(response.status)
    }

    /// Call a HEAD operation declared to return existence
    pub async fn exists(&self, descriptor: &OperationDescriptor, args: &Args) -> Result<bool> {
        expect_shape(descriptor, "exists", |shape| matches!(shape, ReturnShape::Exists))?;
        let response = self.send(descriptor, args).await?;
        match self.decoder.decode::<()>(descriptor, response).await? {
            Decoded::Exists(exists) => Ok(exists),
            _ => Ok(false),
        }
    }

    /// Call an operation declared to return raw bytes
    pub async fn download(&self, descriptor: &OperationDescriptor, args: &Args) -> Result<Bytes> {
        expect_shape(descriptor, "bytes", |shape| matches!(shape, ReturnShape::Bytes))?;
        let response = self.send(descriptor, args).await?;
        match self.decoder.decode::<()>(descriptor, response).await? {
            Decoded::Bytes(bytes) => Ok(bytes),
            _ => Ok(Bytes::new()),
        }
    }

    /// Call an operation declared to return a stream
    ///
    /// The body is handed over unread; dropping the stream releases the
    /// connection.
    pub async fn open_stream(
        &self,
        descriptor: &OperationDescriptor,
        args: &Args,
    ) -> Result<ResponseStream> {
        expect_shape(descriptor, "stream", |shape| matches!(shape, ReturnShape::Stream))?;
        let response = self.send(descriptor, args).await?;
        Ok(response.into_stream())
    }

    /// Fetch a single page of a paged operation
    pub async fn page<T: DeserializeOwned>(
        &self,
        descriptor: &OperationDescriptor,
        args: &Args,
    ) -> Result<Page<T>> {
        expect_shape(descriptor, "page", |shape| matches!(shape, ReturnShape::Paged(_)))?;
        let response = self.send(descriptor, args).await?;
        match self.decoder.decode::<T>(descriptor, response).await? {
            Decoded::Page(page) => Ok(page),
            _ => Ok(Page {
                items: Vec::new(),
                continuation: None,
            }),
        }
    }

    /// Every page of a paged operation, following next links
    ///
    /// Follow-up requests use the operation's continuation descriptor and
    /// carry the header arguments of the first call.
    pub fn pages<T>(
        &self,
        descriptor: &OperationDescriptor,
        args: &Args,
    ) -> BoxStream<'static, Result<Page<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let this = self.clone();
        let first = Arc::new(descriptor.clone());
        let next = Arc::new(descriptor.continuation());

        let mut carried = Args::new();
        for binding in descriptor.params_of(ParamKind::Header) {
            if let Some(value) = args.get(&binding.name) {
                carried.set(binding.name.clone(), value.clone());
            }
        }

        futures::stream::try_unfold(Cursor::First(args.clone()), move |cursor| {
            let this = this.clone();
            let first = first.clone();
            let next = next.clone();
            let carried = carried.clone();
            async move {
                let page: Page<T> = match cursor {
                    Cursor::Done => return Ok(None),
                    Cursor::First(args) => this.page(&first, &args).await?,
                    Cursor::Next(link) => {
                        tracing::debug!("Following next link {}", link);
                        this.page(&next, &carried.with(NEXT_LINK_ARG, link)).await?
                    }
                };
                let cursor = match &page.continuation {
                    Some(link) => Cursor::Next(link.clone()),
                    None => Cursor::Done,
                };
                Ok::<_, Error>(Some((page, cursor)))
            }
        })
        .boxed()
    }

    /// Every item of a paged operation
    pub fn items<T>(
        &self,
        descriptor: &OperationDescriptor,
        args: &Args,
    ) -> BoxStream<'static, Result<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.pages::<T>(descriptor, args)
            .map_ok(|page| futures::stream::iter(page.items.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    /// Run a call on the runtime and get a cancellable handle to it
    pub fn spawn<T, F, Fut>(&self, call: F) -> CallHandle<T>
    where
        F: FnOnce(Dispatcher) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        CallHandle::new(tokio::spawn(call(self.clone())))
    }

    /// Spawn a value call
    pub fn spawn_invoke<T>(
        &self,
        descriptor: Arc<OperationDescriptor>,
        args: Args,
    ) -> CallHandle<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.spawn(move |dispatcher| async move {
            dispatcher.invoke::<T>(&descriptor, &args).await
        })
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pipeline", &self.pipeline)
            .field("decoder", &self.decoder)
            .field("defaults", &self.defaults.names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

enum Cursor {
    First(Args),
    Next(String),
    Done,
}

fn expect_shape(
    descriptor: &OperationDescriptor,
    requested: &'static str,
    accepts: impl Fn(&ReturnShape) -> bool,
) -> Result<()> {
    if accepts(descriptor.returns()) {
        return Ok(());
    }
    Err(DecodeError::ShapeMismatch {
        operation: descriptor.name().to_string(),
        declared: descriptor.returns().name(),
        requested,
    }
    .into())
}

/// A spawned call
///
/// [`cancel`](CallHandle::cancel) aborts the task, which drops the transport
/// future and closes its connection. Awaiting a cancelled handle always
/// yields [`Error::Cancelled`]. Dropping the handle without cancelling
/// leaves the call running.
pub struct CallHandle<T> {
    task: JoinHandle<Result<T>>,
    cancelled: Arc<AtomicBool>,
}

impl<T> CallHandle<T> {
    fn new(task: JoinHandle<Result<T>>) -> Self {
        Self {
            task,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.task.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Future for CallHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.is_cancelled() {
            return Poll::Ready(Err(Error::Cancelled));
        }
        match Pin::new(&mut this.task).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(err)) if err.is_cancelled() => Poll::Ready(Err(Error::Cancelled)),
            Poll::Ready(Err(err)) => Poll::Ready(Err(Error::Io {
                message: "call task panicked".to_string(),
                source: Box::new(err),
            })),
        }
    }
}

impl<T> fmt::Debug for CallHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Catalog, OperationDeclaration, registry_error_types};
    use crate::pipeline::testing::MockTransport;
    use crate::pipeline::DecodingPolicy;
    use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, LINK};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Record {
        a: u32,
    }

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn dispatcher(transport: Arc<MockTransport>) -> Dispatcher {
        let pipeline = Pipeline::builder()
            .policy(DecodingPolicy)
            .transport_arc(transport)
            .build();
        Dispatcher::new(pipeline)
            .with_endpoint("https://reg.io")
            .with_error_types(registry_error_types())
    }

    #[tokio::test]
    async fn test_invoke_decodes_value() {
        let transport =
            Arc::new(MockTransport::new().respond_with(200, json_headers(), r#"{"a":1}"#));
        let descriptor = OperationDeclaration::new("getRecord", "GET", "/records/{id}")
            .param(ParamKind::Path, "id")
            .expect(&[200])
            .build()
            .unwrap();

        let record: Option<Record> = dispatcher(transport.clone())
            .invoke(&descriptor, &Args::new().with("id", "r 1"))
            .await
            .unwrap();
        assert_eq!(record, Some(Record { a: 1 }));
        assert_eq!(transport.requests()[0].url.as_str(), "https://reg.io/records/r%201");
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_reported_before_sending() {
        let transport = Arc::new(MockTransport::new());
        let descriptor = Catalog::builtin().require("getBlob").unwrap();
        let err = dispatcher(transport.clone())
            .invoke::<Record>(&descriptor, &Args::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeError::ShapeMismatch { declared: "stream", requested: "value", .. })
        ));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_per_call_allowed_status() {
        let transport = Arc::new(MockTransport::new().respond(409, "").respond(409, ""));
        let descriptor = Catalog::builtin().require("deleteTag").unwrap();
        let dispatcher = dispatcher(transport);
        let args = Args::new().with("name", "library/hello").with("reference", "v1");

        let err = dispatcher.invoke_void(&descriptor, &args).await.unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert_eq!(err.as_http().unwrap().error_type(), "acr_error");

        let status = dispatcher
            .invoke_void(&descriptor, &args.clone().allow_status(409))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_pages_follow_link_header() {
        let mut first = json_headers();
        first.insert(
            LINK,
            HeaderValue::from_static(r#"</acr/v1/_catalog?last=b&n=2>; rel="next""#),
        );
        let transport = Arc::new(
            MockTransport::new()
                .respond_with(200, first, r#"{"repositories":["a","b"]}"#)
                .respond_with(200, json_headers(), r#"{"repositories":["c"]}"#),
        );
        let descriptor = Catalog::builtin().require("listRepositories").unwrap();
        let names: Vec<String> = dispatcher(transport.clone())
            .items(&descriptor, &Args::new().with("n", 2u32))
            .try_collect()
            .await
            .unwrap();

        assert_eq!(names, vec!["a", "b", "c"]);
        let seen = transport.requests();
        assert_eq!(seen[0].url.as_str(), "https://reg.io/acr/v1/_catalog?n=2");
        assert_eq!(seen[1].url.as_str(), "https://reg.io/acr/v1/_catalog?last=b&n=2");
    }

    #[tokio::test]
    async fn test_cancelled_handle_reports_cancelled() {
        let transport =
            Arc::new(MockTransport::new().respond_with(200, json_headers(), r#"{"a":1}"#));
        let dispatcher = dispatcher(transport);
        let handle = dispatcher.spawn(|_| async move {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(1u32)
        });
        handle.cancel();
        assert!(matches!(handle.await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_finished_handle_yields_result() {
        let transport =
            Arc::new(MockTransport::new().respond_with(200, json_headers(), r#"{"a":5}"#));
        let descriptor = Arc::new(
            OperationDeclaration::new("getRecord", "GET", "/record")
                .build()
                .unwrap(),
        );
        let value = dispatcher(transport)
            .spawn_invoke::<Record>(descriptor, Args::new())
            .await
            .unwrap();
        assert_eq!(value, Some(Record { a: 5 }));
    }
}
