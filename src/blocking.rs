//! Blocking call boundary
//!
//! [`BlockingDispatcher`] owns a current-thread runtime and drives the async
//! [`Dispatcher`] to completion for synchronous callers. Do not use it from
//! inside an async context.

use crate::decode::{Page, Response};
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::operation::{Args, OperationDescriptor};
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::runtime::Runtime;

/// Synchronous wrapper around a [`Dispatcher`]
#[derive(Debug)]
pub struct BlockingDispatcher {
    inner: Dispatcher,
    runtime: Runtime,
}

impl BlockingDispatcher {
    pub fn new(inner: Dispatcher) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Io {
                message: "failed to start runtime".to_string(),
                source: Box::new(e),
            })?;
        Ok(Self { inner, runtime })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner
    }

    pub fn invoke<T: DeserializeOwned>(
        &self,
        descriptor: &OperationDescriptor,
        args: &Args,
    ) -> Result<Option<T>> {
        self.runtime.block_on(self.inner.invoke(descriptor, args))
    }

    pub fn invoke_response<T, H>(
        &self,
        descriptor: &OperationDescriptor,
        args: &Args,
    ) -> Result<Response<T, H>>
    where
        T: DeserializeOwned,
        H: DeserializeOwned,
    {
        self.runtime.block_on(self.inner.invoke_response(descriptor, args))
    }

    pub fn invoke_void(&self, descriptor: &OperationDescriptor, args: &Args) -> Result<StatusCode> {
        self.runtime.block_on(self.inner.invoke_void(descriptor, args))
    }

    pub fn exists(&self, descriptor: &OperationDescriptor, args: &Args) -> Result<bool> {
        self.runtime.block_on(self.inner.exists(descriptor, args))
    }

    pub fn download(&self, descriptor: &OperationDescriptor, args: &Args) -> Result<Bytes> {
        self.runtime.block_on(self.inner.download(descriptor, args))
    }

    /// The whole stream body, read into memory
    pub fn download_stream(&self, descriptor: &OperationDescriptor, args: &Args) -> Result<Bytes> {
        self.runtime.block_on(async {
            let chunks: Vec<Bytes> = self
                .inner
                .open_stream(descriptor, args)
                .await?
                .try_collect()
                .await?;
            Ok::<_, Error>(Bytes::from(chunks.concat()))
        })
    }

    pub fn page<T: DeserializeOwned>(
        &self,
        descriptor: &OperationDescriptor,
        args: &Args,
    ) -> Result<Page<T>> {
        self.runtime.block_on(self.inner.page(descriptor, args))
    }

    /// Every item across all pages
    pub fn items<T>(&self, descriptor: &OperationDescriptor, args: &Args) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.runtime
            .block_on(self.inner.items::<T>(descriptor, args).try_collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationDeclaration, ParamKind};
    use crate::pipeline::testing::MockTransport;
    use crate::pipeline::{DecodingPolicy, Pipeline};
    use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
    use std::sync::Arc;

    #[test]
    fn test_blocking_invoke() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let transport =
            Arc::new(MockTransport::new().respond_with(200, headers, r#"{"name":"hello"}"#));
        let pipeline = Pipeline::builder()
            .policy(DecodingPolicy)
            .transport_arc(transport)
            .build();
        let client =
            BlockingDispatcher::new(Dispatcher::new(pipeline).with_endpoint("https://reg.io"))
                .unwrap();

        let descriptor =
            OperationDeclaration::new("getRepositoryProperties", "GET", "/acr/v1/{name}")
                .param(ParamKind::Path, "name")
                .build()
                .unwrap();
        let value: Option<serde_json::Value> = client
            .invoke(&descriptor, &Args::new().with("name", "hello"))
            .unwrap();
        assert_eq!(value.unwrap()["name"], "hello");
    }
}
