use colored::*;
use rpcurl_core::{
    prost_reflect::{
        DynamicMessage, EnumDescriptor, ExtensionDescriptor, FieldDescriptor, Kind,
        MessageDescriptor, MethodDescriptor, ReflectMessage, ServiceDescriptor,
    },
    reflection::Descriptor,
    tonic::Status,
};
use std::fmt::{self, Display, Write};

/// A wrapper struct for a formatted, colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

pub struct ServiceList(pub Vec<String>);

/// An error with a short bold headline.
pub struct GenericError<T: Display>(pub &'static str, pub T);

impl Display for FormattedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.0)
    }
}

impl From<DynamicMessage> for FormattedString {
    fn from(message: DynamicMessage) -> Self {
        let text = serde_json::to_string_pretty(&message)
            .unwrap_or_else(|e| format!("<unprintable {}: {e}>", message.descriptor().full_name()));
        FormattedString(text)
    }
}

impl From<Status> for FormattedString {
    fn from(status: Status) -> Self {
        FormattedString(format!(
            "{} code={:?} message={:?}",
            "gRPC Failed:".red().bold(),
            status.code(),
            status.message()
        ))
    }
}

impl<T: Display> From<GenericError<T>> for FormattedString {
    fn from(GenericError(msg, err): GenericError<T>) -> Self {
        FormattedString(format!("{} {}", msg.red().bold(), err))
    }
}

impl From<ServiceList> for FormattedString {
    fn from(ServiceList(services): ServiceList) -> Self {
        if services.is_empty() {
            return FormattedString("No services found.".yellow().to_string());
        }

        let lines: Vec<String> = services
            .iter()
            .map(|svc| format!("  - {}", svc.green()))
            .collect();

        FormattedString(format!("Available Services:\n{}", lines.join("\n")))
    }
}

impl From<Descriptor> for FormattedString {
    fn from(descriptor: Descriptor) -> Self {
        let mut out = String::new();

        // Writing into a String cannot fail.
        let _ = match &descriptor {
            Descriptor::ServiceDescriptor(s) => write_service(&mut out, s),
            Descriptor::MessageDescriptor(m) => write_message(&mut out, m, ""),
            Descriptor::EnumDescriptor(e) => write_enum(&mut out, e, ""),
            Descriptor::ExtensionDescriptor(x) => write_extension(&mut out, x),
        };

        FormattedString(out.trim_end().to_string())
    }
}

fn write_service(out: &mut String, service: &ServiceDescriptor) -> fmt::Result {
    writeln!(out, "{} {} {{", "service".cyan(), service.name().green())?;
    for method in service.methods() {
        writeln!(out, "  {}", method_signature(&method))?;
    }
    writeln!(out, "}}")
}

fn method_signature(method: &MethodDescriptor) -> String {
    let stream = |on: bool| if on { format!("{} ", "stream".cyan()) } else { String::new() };

    format!(
        "{} {}({}{}) {} ({}{});",
        "rpc".cyan(),
        method.name().green(),
        stream(method.is_client_streaming()),
        method.input().full_name().yellow(),
        "returns".cyan(),
        stream(method.is_server_streaming()),
        method.output().full_name().yellow()
    )
}

fn write_message(out: &mut String, message: &MessageDescriptor, indent: &str) -> fmt::Result {
    writeln!(out, "{indent}{} {} {{", "message".cyan(), message.name().green())?;

    let inner = format!("{indent}  ");
    for field in message.fields() {
        writeln!(out, "{inner}{}", field_line(&field))?;
    }
    for nested in message.child_messages().filter(|m| !m.is_map_entry()) {
        write_message(out, &nested, &inner)?;
    }
    for nested in message.child_enums() {
        write_enum(out, &nested, &inner)?;
    }

    writeln!(out, "{indent}}}")
}

fn field_line(field: &FieldDescriptor) -> String {
    let type_name = if let Kind::Message(entry) = field.kind()
        && field.is_map()
    {
        let key = entry.map_entry_key_field().kind();
        let value = entry.map_entry_value_field().kind();
        format!("map<{}, {}>", kind_name(&key), kind_name(&value))
    } else {
        kind_name(&field.kind())
    };

    let label = if field.is_list() {
        format!("{} ", "repeated".cyan())
    } else {
        String::new()
    };

    format!("{label}{} {} = {};", type_name.yellow(), field.name(), field.number())
}

fn kind_name(kind: &Kind) -> String {
    match kind {
        Kind::Message(m) => m.full_name().to_string(),
        Kind::Enum(e) => e.full_name().to_string(),
        scalar => format!("{scalar:?}").to_lowercase(),
    }
}

fn write_enum(out: &mut String, enum_desc: &EnumDescriptor, indent: &str) -> fmt::Result {
    writeln!(out, "{indent}{} {} {{", "enum".cyan(), enum_desc.name().green())?;
    for value in enum_desc.values() {
        writeln!(
            out,
            "{indent}  {} = {};",
            value.name(),
            value.number().to_string().purple()
        )?;
    }
    writeln!(out, "{indent}}}")
}

fn write_extension(out: &mut String, extension: &ExtensionDescriptor) -> fmt::Result {
    writeln!(
        out,
        "{} {} {{",
        "extend".cyan(),
        extension.containing_message().full_name().green()
    )?;
    writeln!(
        out,
        "  {} {} = {};",
        kind_name(&extension.kind()).yellow(),
        extension.name(),
        extension.number()
    )?;
    writeln!(out, "}}")
}
