//! Declarative REST invocation engine
//!
//! A call flows one way: [`Dispatcher`] → [`RequestBuilder`] → [`Pipeline`]
//! (policies around a [`Transport`]) → [`ResponseDecoder`] → caller. The
//! authentication policy inside the pipeline gets its tokens from a shared
//! [`TokenCache`].
//!
//! ```no_run
//! use cloudrest::{Args, Catalog, Dispatcher, Pipeline, PipelineConfig};
//!
//! # async fn run() -> cloudrest::Result<()> {
//! let pipeline = Pipeline::from_config(&PipelineConfig::default(), None)?;
//! let dispatcher = Dispatcher::new(pipeline).with_endpoint("https://myregistry.azurecr.io");
//! let op = Catalog::builtin().require("checkDockerV2Support")?;
//! let supported = dispatcher.exists(&op, &Args::new()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`RequestBuilder`]: operation::RequestBuilder
//! [`Transport`]: http::Transport
//! [`ResponseDecoder`]: decode::ResponseDecoder
//! [`TokenCache`]: credential::TokenCache

pub mod blocking;
pub mod config;
pub mod credential;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod operation;
pub mod pipeline;
pub mod serializer;

/// Version injected at compile time via CLOUDREST_VERSION env var (set by CI/CD),
/// or the crate version for local builds.
pub const VERSION: &str = match option_env!("CLOUDREST_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

pub use blocking::BlockingDispatcher;
pub use config::PipelineConfig;
pub use decode::{Decoded, Page, Response};
pub use dispatch::{CallHandle, Dispatcher};
pub use error::{Error, Result};
pub use operation::{Args, Catalog, OperationDeclaration, OperationDescriptor};
pub use pipeline::Pipeline;
