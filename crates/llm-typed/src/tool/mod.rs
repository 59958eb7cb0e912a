//! Tool calling: typed handlers, dispatch, and the multi-round loop.
//!
//! A tool declares its arguments as a
//! [`TypeDescriptor`](crate::schema::TypeDescriptor). The model sees
//! the compiled schema, and handlers only ever receive arguments that
//! decoded and validated against it.
//!
//! # Pieces
//!
//! - [`ToolHandler`]: one executable tool, usually built with [`tool_fn`]
//! - [`ToolRegistry`]: the set of tools offered to the model
//! - [`Dispatcher`]: runs the calls of a single streamed turn
//! - [`run_tool_loop`]: repeats turns until the model answers in text
//!
//! Calls in one turn are isolated from each other. A call with bad
//! arguments or an unknown name is answered with corrective feedback
//! while its siblings still run, and results are reported in the order
//! the model announced the calls.
//!
//! ```rust,no_run
//! use llm_typed::schema::{Record, TypeDescriptor};
//! use llm_typed::tool::{ToolError, ToolLoopConfig, ToolRegistry, ToolSpec, run_tool_loop, tool_fn};
//! use llm_typed::{ChatMessage, DynProvider};
//!
//! # async fn demo(provider: &dyn DynProvider) -> Result<(), llm_typed::LlmError> {
//! let mut registry = ToolRegistry::new();
//! registry.register(tool_fn(
//!     ToolSpec::new(
//!         "weather",
//!         "Current weather for a city",
//!         Record::new("WeatherArgs").field("city", TypeDescriptor::string()),
//!     ),
//!     |args| async move {
//!         let city = args.as_value()["city"].as_str().unwrap_or_default().to_owned();
//!         Ok::<_, ToolError>(format!("18C in {city}"))
//!     },
//! ));
//!
//! let result = run_tool_loop(
//!     provider,
//!     &registry,
//!     vec![ChatMessage::user("Weather in Oslo?")],
//!     &ToolLoopConfig::default(),
//!     &(),
//! )
//! .await?;
//! println!("{}", result.text);
//! # Ok(())
//! # }
//! ```

mod dispatch;
mod handler;
mod registry;
mod tool_loop;

pub use dispatch::{DispatchOutcome, DispatchStatus, Dispatcher, ToolCallRecord};
pub use handler::{
    FnToolHandler, NoCtxToolHandler, ToolError, ToolHandler, ToolOutput, ToolSpec, tool_fn,
    tool_fn_with_ctx,
};
pub use registry::ToolRegistry;
pub use tool_loop::{TerminationReason, ToolLoopConfig, ToolLoopResult, run_tool_loop};
