//! A `demo.Shop` server implemented with dynamic messages, so tests need no generated code.
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor, Value};
use rpcurl_core::grpc::codec::DynamicCodec;
use std::convert::Infallible;
use std::task::{Context, Poll};
use tokio_stream::Stream;
use tonic::{
    Request, Response, Status,
    body::Body,
    codegen::{BoxFuture, Service, http},
    server::{Grpc, NamedService, ServerStreamingService, UnaryService},
};

#[derive(Clone)]
pub struct ShopServer {
    place: MethodDescriptor,
    track: MethodDescriptor,
}

impl ShopServer {
    pub fn new() -> Self {
        let service = super::shop_pool()
            .get_service_by_name("demo.Shop")
            .expect("demo.Shop is defined");

        let method = |name: &str| {
            service
                .methods()
                .find(|m| m.name() == name)
                .expect("method is defined")
        };

        Self {
            place: method("Place"),
            track: method("Track"),
        }
    }
}

impl NamedService for ShopServer {
    const NAME: &'static str = "demo.Shop";
}

fn receipt(descriptor: &MessageDescriptor, order: &DynamicMessage, status: &str) -> DynamicMessage {
    let mut receipt = DynamicMessage::new(descriptor.clone());
    let id = order.get_field_by_name("id").and_then(|v| v.as_str().map(str::to_string));
    receipt.set_field_by_name("order_id", Value::String(id.unwrap_or_default()));
    receipt.set_field_by_name("status", Value::String(status.to_string()));
    receipt
}

/// Answers with a `placed` receipt, or `INVALID_ARGUMENT` for an order without items.
struct Place(MessageDescriptor);

impl UnaryService<DynamicMessage> for Place {
    type Response = DynamicMessage;
    type Future = BoxFuture<Response<DynamicMessage>, Status>;

    fn call(&mut self, request: Request<DynamicMessage>) -> Self::Future {
        let descriptor = self.0.clone();

        Box::pin(async move {
            let order = request.into_inner();
            let empty = order
                .get_field_by_name("items")
                .and_then(|v| v.as_list().map(|l| l.is_empty()))
                .unwrap_or(true);

            if empty {
                return Err(Status::invalid_argument("an order needs items"));
            }

            Ok(Response::new(receipt(&descriptor, &order, "placed")))
        })
    }
}

/// Streams one receipt per shipping stage.
struct Track(MessageDescriptor);

type ReceiptStream = std::pin::Pin<Box<dyn Stream<Item = Result<DynamicMessage, Status>> + Send>>;

impl ServerStreamingService<DynamicMessage> for Track {
    type Response = DynamicMessage;
    type ResponseStream = ReceiptStream;
    type Future = BoxFuture<Response<ReceiptStream>, Status>;

    fn call(&mut self, request: Request<DynamicMessage>) -> Self::Future {
        let descriptor = self.0.clone();

        Box::pin(async move {
            let order = request.into_inner();
            let receipts: Vec<_> = ["packed", "shipped", "delivered"]
                .into_iter()
                .map(|stage| Ok(receipt(&descriptor, &order, stage)))
                .collect();

            let stream: ReceiptStream = Box::pin(tokio_stream::iter(receipts));
            Ok(Response::new(stream))
        })
    }
}

impl Service<http::Request<Body>> for ShopServer {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        let place = self.place.clone();
        let track = self.track.clone();

        Box::pin(async move {
            let response = match req.uri().path() {
                "/demo.Shop/Place" => {
                    let codec = DynamicCodec::new(place.output(), place.input());
                    Grpc::new(codec).unary(Place(place.output()), req).await
                }
                "/demo.Shop/Track" => {
                    let codec = DynamicCodec::new(track.output(), track.input());
                    Grpc::new(codec)
                        .server_streaming(Track(track.output()), req)
                        .await
                }
                _ => Status::unimplemented("unknown method").into_http(),
            };

            Ok(response)
        })
    }
}
