//! Declarative operations
//!
//! - [`template`] - `{name}` host and path templates
//! - [`descriptor`] - declarations and validated [`OperationDescriptor`]s
//! - [`builder`] - [`RequestBuilder`] and call [`Args`]
//! - [`catalog`] - named collections of descriptors

pub mod builder;
pub mod catalog;
pub mod descriptor;
pub mod template;

pub use builder::{ArgValue, Args, RequestBuilder};
pub use catalog::{registry_error_types, Catalog, RegistryErrorInfo, RegistryErrors};
pub use descriptor::{
    EnvelopeShape, ErrorMapping, NextLink, OperationDeclaration, OperationDescriptor, PageShape,
    ParamKind, ParameterBinding, ReturnShape, WireType, NEXT_LINK_ARG,
};
pub use template::Template;
