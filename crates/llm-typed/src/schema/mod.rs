//! Type descriptors and the schema compiler.
//!
//! A [`TypeDescriptor`] describes the shape a typed call must return.
//! [`compile`] turns it into a [`SchemaSpec`] for the provider plus the
//! plan the decoder walks. [`SchemaCache`] shares compiled schemas across
//! calls.

mod cache;
mod compile;
#[cfg(feature = "schema")]
mod convert;
mod descriptor;

pub use cache::SchemaCache;
pub use compile::{
    CompileOptions, CompiledSchema, SchemaSpec, VARIANT_TAG, WRAPPED_FIELD, compile,
};
pub(crate) use compile::variant_labels;
#[cfg(feature = "schema")]
pub use convert::descriptor_for;
pub use descriptor::{DescriptorRegistry, Field, Record, Scalar, ScalarKind, TypeDescriptor};
