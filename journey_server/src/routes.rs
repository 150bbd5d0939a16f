//! Request handler definitions
//!
//! Define each route and its handler here. Handlers that are more than a line or two MUST go into a separate
//! module. Keep this module neat and tidy 🙏
//!
//! Handlers are generic over the storage backend, and actix-web cannot register generic handlers directly, so
//! routes are declared through the `route!` macro which generates a concrete `HttpServiceFactory` per
//! instantiation.

use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use journey_engine::traits::EventManagement;
use log::*;

use crate::{
    config::ServerOptions,
    helpers::get_remote_ip,
    receiver::{RequestMeta, WebhookReceiver},
};

#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

// ----------------------------------------------   Webhook  ---------------------------------------------------
route!(webhook_event => Post "/webhook/events" impl EventManagement);
pub async fn webhook_event<B: EventManagement>(
    req: HttpRequest,
    body: web::Bytes,
    receiver: web::Data<WebhookReceiver<B>>,
    options: web::Data<ServerOptions>,
) -> HttpResponse {
    trace!("📨️ Received webhook request: {}", req.uri());
    let meta = RequestMeta {
        source_ip: get_remote_ip(&req, options.use_x_forwarded_for, options.use_forwarded).map(|ip| ip.to_string()),
        signature: req
            .headers()
            .get(options.signature_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
    };
    let ack = receiver.handle_webhook(body.as_ref(), meta).await;
    HttpResponse::Ok().json(ack)
}
