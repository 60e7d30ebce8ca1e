//! A minimal unary RPC core.
//!
//! A contract is declared with [`message!`] and [`service!`]; a [`Server`]
//! binds handlers for it and dispatches calls on a bounded worker pool; a
//! generated client (or a raw [`Stub`]) calls it over a [`Channel`].
//!
//! ```no_run
//! use calcrpc::{calculator::{CalculatorClient, Number}, Channel};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = Channel::open("localhost:50051").await?;
//! let calculator = CalculatorClient::new(channel);
//! let response = calculator.square_root(Number { value: 10.0 }).await?;
//! println!("{}", response.value);
//! # Ok(())
//! # }
//! ```

mod dispatcher;
mod macros;
mod status;

pub mod calculator;
pub mod codec;
pub mod config;
pub mod net;
pub mod schema;
pub mod types;

pub use codec::{CodecError, SchemaViolation};
pub use config::{ChannelConfig, ConfigError, ServerConfig};
pub use dispatcher::{BindingError, ServiceBinding};
pub use net::{
    client::{Channel, RpcError, Stub},
    server::{BindError, Server, ServerState},
    CallOutcome, TransportError,
};
pub use schema::{
    FieldDescriptor, FieldSet, Label, Message, MessageDescriptor, MethodDescriptor, MethodInfo,
    ServiceDescriptor, ServiceInfo,
};
pub use status::{Code, Status};
pub use types::{FieldValue, Type, Value};
