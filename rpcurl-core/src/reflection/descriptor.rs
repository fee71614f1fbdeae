use prost_reflect::{EnumDescriptor, ExtensionDescriptor, MessageDescriptor, ServiceDescriptor};

/// A generic wrapper for the Protobuf descriptors a symbol can resolve to.
///
/// This enum allows the resolver to return a single type when resolving symbols,
/// regardless of whether the symbol points to a Service, a Message, an Enum or an Extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    MessageDescriptor(MessageDescriptor),
    ServiceDescriptor(ServiceDescriptor),
    EnumDescriptor(EnumDescriptor),
    ExtensionDescriptor(ExtensionDescriptor),
}

impl Descriptor {
    /// Returns the name (e.g.,`MyMessage`) of the inner descriptor
    pub fn name(&self) -> &str {
        match self {
            Descriptor::MessageDescriptor(v) => v.name(),
            Descriptor::ServiceDescriptor(v) => v.name(),
            Descriptor::EnumDescriptor(v) => v.name(),
            Descriptor::ExtensionDescriptor(v) => v.name(),
        }
    }

    /// Returns the full_name (e.g.,`my.package.v1.MyMessage`) of the inner descriptor
    pub fn full_name(&self) -> &str {
        match self {
            Descriptor::MessageDescriptor(v) => v.full_name(),
            Descriptor::ServiceDescriptor(v) => v.full_name(),
            Descriptor::EnumDescriptor(v) => v.full_name(),
            Descriptor::ExtensionDescriptor(v) => v.full_name(),
        }
    }

    /// A lowercase label for the kind of schema element, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Descriptor::MessageDescriptor(_) => "message",
            Descriptor::ServiceDescriptor(_) => "service",
            Descriptor::EnumDescriptor(_) => "enum",
            Descriptor::ExtensionDescriptor(_) => "extension",
        }
    }

    /// Returns the inner [`MessageDescriptor`] if this variant is `MessageDescriptor`.
    pub fn message_descriptor(&self) -> Option<&MessageDescriptor> {
        match self {
            Descriptor::MessageDescriptor(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the inner [`ServiceDescriptor`] if this variant is `ServiceDescriptor`.
    pub fn service_descriptor(&self) -> Option<&ServiceDescriptor> {
        match self {
            Descriptor::ServiceDescriptor(d) => Some(d),
            _ => None,
        }
    }
}
