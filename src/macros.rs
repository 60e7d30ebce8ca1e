/// Declares a message struct together with its [`Message`](crate::Message)
/// implementation.
///
/// ```
/// calcrpc::message! {
///     pub struct Point {
///         pub optional x: f64 = 1,
///         pub optional y: f64 = 2,
///         pub required tag: Option<String> = 3,
///     }
/// }
/// ```
///
/// Field ids must be unique within a message; reusing one fails to compile:
///
/// ```compile_fail
/// calcrpc::message! {
///     pub struct Clash {
///         pub optional a: f32 = 1,
///         pub optional b: f32 = 1,
///     }
/// }
/// ```
#[macro_export]
macro_rules! message {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $label:ident $field:ident : $field_ty:ty = $id:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $field_ty,
            )*
        }

        impl $crate::Message for $name {
            const DESCRIPTOR: &'static $crate::MessageDescriptor = &$crate::MessageDescriptor {
                name: stringify!($name),
                fields: &[
                    $(
                        $crate::FieldDescriptor {
                            name: stringify!($field),
                            id: $id,
                            ty: <$field_ty as $crate::FieldValue>::TYPE,
                            label: $crate::__label!($label),
                        },
                    )*
                ],
            };

            fn to_fields(&self) -> ::std::vec::Vec<(u32, ::std::option::Option<$crate::Value>)> {
                ::std::vec![
                    $( ($id, $crate::FieldValue::to_value(&self.$field)), )*
                ]
            }

            fn from_fields(
                fields: &mut $crate::FieldSet,
            ) -> ::std::result::Result<Self, $crate::CodecError> {
                ::std::result::Result::Ok(Self {
                    $( $field: fields.take($id)?, )*
                })
            }
        }

        const _: () = ::std::assert!(
            <$name as $crate::Message>::DESCRIPTOR.duplicate_id().is_none(),
            ::std::concat!("duplicate field id in message ", ::std::stringify!($name))
        );
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __label {
    (optional) => {
        $crate::Label::Optional
    };
    (required) => {
        $crate::Label::Required
    };
}

/// Declares a service contract and generates its server and client glue.
///
/// For each `rpc Method(Req) returns (Resp) as method_fn;` line this emits:
/// a method on the handler trait, a binding entry in the `server` wrapper and
/// an `async fn` on the `client` stub.
///
/// ```
/// # calcrpc::message! { pub struct Text { pub optional body: String = 1 } }
/// calcrpc::service! {
///     pub service Echo {
///         descriptor: ECHO_SERVICE;
///         server: EchoServer;
///         client: EchoClient;
///
///         rpc Say(Text) returns (Text) as say;
///     }
/// }
/// ```
#[macro_export]
macro_rules! service {
    (
        $(#[$meta:meta])*
        $vis:vis service $name:ident {
            descriptor: $descriptor:ident;
            server: $server:ident;
            client: $client:ident;

            $(
                $(#[$rpc_meta:meta])*
                rpc $method:ident ( $req:ty ) returns ( $resp:ty ) as $method_fn:ident;
            )+
        }
    ) => {
        $vis static $descriptor: $crate::ServiceDescriptor = $crate::ServiceDescriptor {
            name: stringify!($name),
            methods: &[
                $(
                    $crate::MethodDescriptor {
                        name: stringify!($method),
                        input: <$req as $crate::Message>::DESCRIPTOR,
                        output: <$resp as $crate::Message>::DESCRIPTOR,
                    },
                )+
            ],
        };

        $(#[$meta])*
        $vis trait $name: Send + Sync + 'static {
            $(
                $(#[$rpc_meta])*
                fn $method_fn(&self, request: $req) -> ::std::result::Result<$resp, $crate::Status>;
            )+
        }

        /// Binds a handler to the service; pass it to `Server::add_service`.
        $vis struct $server<T> {
            handler: ::std::sync::Arc<T>,
        }

        impl<T: $name> $server<T> {
            $vis fn new(handler: T) -> Self {
                Self {
                    handler: ::std::sync::Arc::new(handler),
                }
            }
        }

        impl<T: $name> ::std::convert::From<$server<T>> for $crate::ServiceBinding {
            fn from(server: $server<T>) -> Self {
                let binding = $crate::ServiceBinding::new(&$descriptor);
                $(
                    let binding = {
                        let handler = ::std::sync::Arc::clone(&server.handler);
                        binding.unary(stringify!($method), move |request: $req| {
                            handler.$method_fn(request)
                        })
                    };
                )+
                binding
            }
        }

        #[derive(Clone)]
        $vis struct $client {
            stub: $crate::Stub,
        }

        impl $client {
            $vis fn new(channel: $crate::Channel) -> Self {
                Self {
                    stub: $crate::Stub::new(channel, &$descriptor),
                }
            }

            $vis fn channel(&self) -> &$crate::Channel {
                self.stub.channel()
            }

            $(
                $(#[$rpc_meta])*
                $vis async fn $method_fn(
                    &self,
                    request: $req,
                ) -> ::std::result::Result<$resp, $crate::RpcError> {
                    self.stub.unary(stringify!($method), &request).await
                }
            )+
        }
    };
}
