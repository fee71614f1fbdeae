#![allow(dead_code)]

use prost_reflect::DescriptorPool;
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
    field_descriptor_proto::{Label, Type},
};

pub mod shop;

pub const MONEY_FILE: &str = "demo/money.proto";
pub const SHOP_FILE: &str = "demo/shop.proto";

fn json_name(name: &str) -> String {
    let mut parts = name.split('_');
    let mut out = parts.next().unwrap_or_default().to_string();
    for part in parts {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        json_name: Some(json_name(name)),
        ..Default::default()
    }
}

fn message_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(type_name.to_string()),
        ..field(name, number, Type::Message)
    }
}

fn method(name: &str, input: &str, output: &str, server_streaming: bool) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(input.to_string()),
        output_type: Some(output.to_string()),
        server_streaming: Some(server_streaming),
        ..Default::default()
    }
}

/// `demo.Money`, a leaf file with no imports.
pub fn money_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(MONEY_FILE.to_string()),
        package: Some("demo".to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![DescriptorProto {
            name: Some("Money".to_string()),
            field: vec![
                field("units", 1, Type::Int64),
                field("currency", 2, Type::String),
            ],
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// `demo.Shop` with `Order` and `Receipt`, importing `demo/money.proto`.
pub fn shop_file() -> FileDescriptorProto {
    let mut items = field("items", 3, Type::String);
    items.label = Some(Label::Repeated as i32);

    FileDescriptorProto {
        name: Some(SHOP_FILE.to_string()),
        package: Some("demo".to_string()),
        syntax: Some("proto3".to_string()),
        dependency: vec![MONEY_FILE.to_string()],
        message_type: vec![
            DescriptorProto {
                name: Some("Order".to_string()),
                field: vec![
                    field("id", 1, Type::String),
                    message_field("total", 2, ".demo.Money"),
                    items,
                ],
                ..Default::default()
            },
            DescriptorProto {
                name: Some("Receipt".to_string()),
                field: vec![
                    field("order_id", 1, Type::String),
                    field("status", 2, Type::String),
                ],
                ..Default::default()
            },
        ],
        service: vec![ServiceDescriptorProto {
            name: Some("Shop".to_string()),
            method: vec![
                method("Place", ".demo.Order", ".demo.Receipt", false),
                method("Track", ".demo.Order", ".demo.Receipt", true),
            ],
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub fn shop_file_set() -> FileDescriptorSet {
    FileDescriptorSet {
        file: vec![money_file(), shop_file()],
    }
}

pub fn shop_pool() -> DescriptorPool {
    DescriptorPool::from_file_descriptor_set(shop_file_set()).expect("demo descriptors link")
}

fn reflection_builder() -> tonic_reflection::server::Builder<'static> {
    tonic_reflection::server::Builder::configure()
        .register_file_descriptor_set(shop_file_set())
        .include_reflection_service(false)
}

/// A reflection server that only speaks `grpc.reflection.v1`.
pub fn reflection_v1() -> tonic_reflection::server::v1::ServerReflectionServer<
    impl tonic_reflection::server::v1::ServerReflection,
> {
    reflection_builder()
        .build_v1()
        .expect("Failed to setup Reflection Service")
}

/// A reflection server that only speaks `grpc.reflection.v1alpha`.
pub fn reflection_v1alpha() -> tonic_reflection::server::v1alpha::ServerReflectionServer<
    impl tonic_reflection::server::v1alpha::ServerReflection,
> {
    reflection_builder()
        .build_v1alpha()
        .expect("Failed to setup Reflection Service")
}
