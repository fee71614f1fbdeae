use common::shop::ShopServer;
use prost_reflect::ReflectMessage;
use rpcurl_core::client::{DynamicRequest, DynamicResponse, InvokeError, RpcClient};
use rpcurl_core::reflection::{Descriptor, ReflectDialect, ResolveError};
use serde_json::json;
use tonic::Code;
use tonic::service::Routes;

mod common;

fn setup_client(dialect: ReflectDialect) -> RpcClient<Routes> {
    let service = Routes::new(common::reflection_v1()).add_service(ShopServer::new());
    RpcClient::from_service(service, dialect)
}

fn request(method: &str, body: serde_json::Value) -> DynamicRequest {
    DynamicRequest {
        service: "demo.Shop".to_string(),
        method: method.to_string(),
        body,
        headers: vec![("x-request-id".to_string(), "7".to_string())],
    }
}

#[tokio::test]
async fn test_unary_call_builds_request_from_json() {
    let client = setup_client(ReflectDialect::Unknown);

    let body = json!({
        "id": "order-1",
        "total": { "units": "12", "currency": "EUR" },
        "items": ["book"]
    });

    let DynamicResponse::Unary(result) = client.call(request("Place", body)).await.unwrap() else {
        panic!("Expected a unary response");
    };

    let receipt = result.unwrap();
    assert_eq!(receipt.descriptor().full_name(), "demo.Receipt");

    let json = serde_json::to_value(&receipt).unwrap();
    assert_eq!(json, json!({ "orderId": "order-1", "status": "placed" }));
}

#[tokio::test]
async fn test_unary_call_surfaces_server_status() {
    let client = setup_client(ReflectDialect::V1);

    let DynamicResponse::Unary(result) = client
        .call(request("Place", json!({ "id": "empty" })))
        .await
        .unwrap()
    else {
        panic!("Expected a unary response");
    };

    let status = result.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_server_streaming_call_collects_every_message() {
    let client = setup_client(ReflectDialect::Unknown);

    let DynamicResponse::Streaming(result) = client
        .call(request("Track", json!({ "id": "order-2" })))
        .await
        .unwrap()
    else {
        panic!("Expected a streaming response");
    };

    let stages: Vec<String> = result
        .unwrap()
        .into_iter()
        .map(|msg| {
            let msg = msg.unwrap();
            msg.get_field_by_name("status")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap()
        })
        .collect();

    assert_eq!(stages, vec!["packed", "shipped", "delivered"]);
}

#[tokio::test]
async fn test_json_not_matching_the_input_type_is_rejected() {
    let client = setup_client(ReflectDialect::Unknown);

    let err = client
        .call(request("Place", json!({ "no_such_field": true })))
        .await
        .unwrap_err();

    assert!(matches!(err, InvokeError::InvalidInput(_)));
}

#[tokio::test]
async fn test_unknown_method_and_service() {
    let client = setup_client(ReflectDialect::Unknown);

    let err = client.call(request("Refund", json!({}))).await.unwrap_err();
    assert!(matches!(
        err,
        InvokeError::MethodNotFound { ref service, ref method } if service == "demo.Shop" && method == "Refund"
    ));

    let mut missing = request("Place", json!({}));
    missing.service = "demo.Warehouse".to_string();
    let err = client.call(missing).await.unwrap_err();
    assert!(matches!(
        err,
        InvokeError::Resolve(_, ResolveError::DescriptorNotFound { .. })
    ));

    let mut message = request("Place", json!({}));
    message.service = "demo.Order".to_string();
    let err = client.call(message).await.unwrap_err();
    assert!(matches!(err, InvokeError::NotAService(_)));
}

#[tokio::test]
async fn test_reserved_headers_are_refused() {
    let client = setup_client(ReflectDialect::Unknown);

    let mut call = request("Place", json!({ "items": ["pen"] }));
    call.headers.push(("grpc-timeout".to_string(), "1S".to_string()));

    let err = client.call(call).await.unwrap_err();
    assert!(matches!(err, InvokeError::GrpcRequestError(_)));
}

#[tokio::test]
async fn test_list_and_describe() {
    let client = setup_client(ReflectDialect::Unknown);

    assert_eq!(client.list_services().await.unwrap(), vec!["demo.Shop"]);

    let Descriptor::MessageDescriptor(money) = client.describe("demo.Money").await.unwrap() else {
        panic!("Expected a message descriptor");
    };
    assert!(money.get_field_by_name("currency").is_some());
}
