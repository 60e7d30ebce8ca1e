use crate::{
    codec,
    schema::{Message, MessageDescriptor, ServiceDescriptor, ServiceInfo},
    status::Status,
};
use std::{collections::BTreeMap, marker::PhantomData, sync::Arc};
use thiserror::Error;

/// The handlers bound to one [`ServiceDescriptor`].
///
/// Methods are attached with [`unary`](ServiceBinding::unary); the binding is
/// checked against its descriptor when it is handed to
/// [`Server::add_service`](crate::Server::add_service).
pub struct ServiceBinding {
    descriptor: &'static ServiceDescriptor,
    methods: BTreeMap<String, BoundMethod>,
}

struct BoundMethod {
    input: &'static MessageDescriptor,
    output: &'static MessageDescriptor,
    handler: Arc<dyn DynamicMethod + Send + Sync + 'static>,
}

impl ServiceBinding {
    pub fn new(descriptor: &'static ServiceDescriptor) -> Self {
        Self {
            descriptor,
            methods: BTreeMap::new(),
        }
    }

    pub fn descriptor(&self) -> &'static ServiceDescriptor {
        self.descriptor
    }

    pub fn unary<Req, Resp, F>(mut self, method: &str, handler: F) -> Self
    where
        Req: Message,
        Resp: Message,
        F: Fn(Req) -> Result<Resp, Status> + Send + Sync + 'static,
    {
        let typed = TypedMethod {
            handler,
            _marker: PhantomData,
        };
        let bound = BoundMethod {
            input: Req::DESCRIPTOR,
            output: Resp::DESCRIPTOR,
            handler: Arc::new(typed),
        };
        self.methods.insert(method.to_owned(), bound);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), BindingError> {
        let service = self.descriptor.name;
        for declared in self.descriptor.methods {
            let bound = self
                .methods
                .get(declared.name)
                .ok_or(BindingError::MissingMethod {
                    service,
                    method: declared.name,
                })?;
            if bound.input != declared.input || bound.output != declared.output {
                return Err(BindingError::SignatureMismatch {
                    service,
                    method: declared.name,
                });
            }
        }
        if let Some(extra) = self
            .methods
            .keys()
            .find(|name| self.descriptor.method(name).is_none())
        {
            return Err(BindingError::UndeclaredMethod {
                service,
                method: extra.clone(),
            });
        }
        Ok(())
    }
}

/// Routes calls by service and method name. Read-only once the server binds.
#[derive(Default)]
pub(crate) struct Dispatcher {
    services: BTreeMap<&'static str, ServiceBinding>,
}

impl Dispatcher {
    pub(crate) fn add(&mut self, binding: ServiceBinding) -> Result<(), BindingError> {
        binding.validate()?;
        let name = binding.descriptor.name;
        if self.services.contains_key(name) {
            return Err(BindingError::DuplicateService(name));
        }
        self.services.insert(name, binding);
        Ok(())
    }

    pub(crate) fn lookup(&self, service: &str, method: &str) -> Result<MethodHandle, Status> {
        let binding = self
            .services
            .get(service)
            .ok_or_else(|| Status::unimplemented(format!("unknown service `{service}`")))?;
        let bound = binding.methods.get(method).ok_or_else(|| {
            Status::unimplemented(format!("unknown method `{method}` on service `{service}`"))
        })?;
        Ok(MethodHandle(Arc::clone(&bound.handler)))
    }

    pub(crate) fn services(&self) -> Vec<ServiceInfo> {
        self.services
            .values()
            .map(|binding| ServiceInfo::from(binding.descriptor))
            .collect()
    }
}

/// A resolved method that can be moved onto a worker.
pub(crate) struct MethodHandle(Arc<dyn DynamicMethod + Send + Sync + 'static>);

impl MethodHandle {
    pub(crate) fn call(&self, payload: &[u8]) -> Result<Vec<u8>, Status> {
        self.0.call(payload)
    }
}

#[derive(Debug, Error)]
pub enum BindingError {
    #[error("service `{service}` does not bind declared method `{method}`")]
    MissingMethod {
        service: &'static str,
        method: &'static str,
    },

    #[error("service `{service}` binds `{method}`, which it does not declare")]
    UndeclaredMethod {
        service: &'static str,
        method: String,
    },

    #[error("`{service}.{method}` is bound with request/response types other than declared")]
    SignatureMismatch {
        service: &'static str,
        method: &'static str,
    },

    #[error("service `{0}` is already bound")]
    DuplicateService(&'static str),

    #[error("services can only be added before the server binds")]
    AlreadyStarted,
}

struct TypedMethod<Req, Resp, F> {
    handler: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

/// A type-erased version of a bound unary handler.
trait DynamicMethod {
    fn call(&self, payload: &[u8]) -> Result<Vec<u8>, Status>;
}

impl<Req, Resp, F> DynamicMethod for TypedMethod<Req, Resp, F>
where
    Req: Message,
    Resp: Message,
    F: Fn(Req) -> Result<Resp, Status>,
{
    fn call(&self, payload: &[u8]) -> Result<Vec<u8>, Status> {
        let request: Req =
            codec::decode(payload).map_err(|e| Status::invalid_argument(e.to_string()))?;
        let response = (self.handler)(request)?;
        codec::encode(&response).map_err(|e| {
            tracing::error!(error = %e, "(BUG in handler) response violates its schema");
            Status::internal("internal error")
        })
    }
}
