//! ROS 2 message definition parsing.
//!
//! MCAP schemas with the `ros2msg` encoding carry the `.msg` text of the
//! root type followed by every dependency, each introduced by a separator
//! line of `=` characters and a `MSG: package/Type` line. [`MessageDefinition`]
//! parses that text into field lists the [`cdr`](crate::cdr) decoder walks.
//!
//! Constants and default values are ignored; they do not occupy space in a
//! serialized message.

use std::collections::HashMap;

use crate::error::ConvertError;

/// A fixed-size CDR primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Bool,
    Byte,
    Char,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
}

impl Primitive {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => Primitive::Bool,
            "byte" => Primitive::Byte,
            "char" => Primitive::Char,
            "int8" => Primitive::Int8,
            "uint8" => Primitive::UInt8,
            "int16" => Primitive::Int16,
            "uint16" => Primitive::UInt16,
            "int32" => Primitive::Int32,
            "uint32" => Primitive::UInt32,
            "int64" => Primitive::Int64,
            "uint64" => Primitive::UInt64,
            "float32" => Primitive::Float32,
            "float64" => Primitive::Float64,
            _ => return None,
        })
    }

    /// Serialized size in bytes, which is also the CDR alignment.
    pub fn size(self) -> usize {
        match self {
            Primitive::Bool
            | Primitive::Byte
            | Primitive::Char
            | Primitive::Int8
            | Primitive::UInt8 => 1,
            Primitive::Int16 | Primitive::UInt16 => 2,
            Primitive::Int32 | Primitive::UInt32 | Primitive::Float32 => 4,
            Primitive::Int64 | Primitive::UInt64 | Primitive::Float64 => 8,
        }
    }

    /// Whether arrays of this type are surfaced as raw bytes.
    pub fn is_octet(self) -> bool {
        matches!(self, Primitive::Byte | Primitive::Char | Primitive::UInt8)
    }
}

/// Element type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Primitive(Primitive),
    String,
    /// A nested message, by normalized `package/Type` name.
    Complex(String),
}

/// Whether a field holds one value, a fixed array, or a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Single,
    Fixed(usize),
    /// Unbounded or bounded (`[<=N]`) sequence; both carry a length prefix.
    Sequence,
}

/// One field of a message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub arity: Arity,
}

/// A message type and its fields, in serialization order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageType {
    pub name: String,
    pub fields: Vec<Field>,
}

/// A parsed root message type together with all of its dependencies.
#[derive(Debug, Clone)]
pub struct MessageDefinition {
    root: MessageType,
    types: HashMap<String, MessageType>,
}

impl MessageDefinition {
    /// Parse the schema text of `root_name` (e.g. `sensor_msgs/msg/Image`).
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::MessageDefinition`] for malformed field lines,
    /// unsupported types (`wstring`), or a dependency section without a
    /// `MSG:` header.
    pub fn parse(root_name: &str, text: &str) -> Result<Self, ConvertError> {
        let root_name = normalize_type_name(root_name);
        let mut root = None;
        let mut types = HashMap::new();

        for (index, section) in split_sections(text).into_iter().enumerate() {
            if index == 0 {
                root = Some(parse_type(&root_name, &section)?);
                continue;
            }

            let mut lines = section.iter().copied();
            let header = lines
                .by_ref()
                .map(str::trim)
                .find(|line| !line.is_empty() && !line.starts_with('#'))
                .ok_or_else(|| {
                    ConvertError::MessageDefinition("empty dependency section".to_string())
                })?;
            let name = header.strip_prefix("MSG:").ok_or_else(|| {
                ConvertError::MessageDefinition(format!(
                    "expected `MSG:` header, found `{header}`"
                ))
            })?;
            let name = normalize_type_name(name.trim());
            let body: Vec<&str> = lines.collect();
            let message_type = parse_type(&name, &body)?;
            types.insert(name, message_type);
        }

        let root = root.unwrap_or(MessageType {
            name: root_name,
            fields: Vec::new(),
        });
        Ok(Self { root, types })
    }

    /// The root message type.
    pub fn root(&self) -> &MessageType {
        &self.root
    }

    /// Look up a nested type by normalized name.
    ///
    /// `builtin_interfaces/Time` and `builtin_interfaces/Duration` resolve
    /// even when the schema omits them.
    pub fn resolve(&self, name: &str) -> Option<&MessageType> {
        self.types.get(name).or_else(|| match name {
            "builtin_interfaces/Time" => Some(&*BUILTIN_TIME),
            "builtin_interfaces/Duration" => Some(&*BUILTIN_DURATION),
            _ => None,
        })
    }
}

static BUILTIN_TIME: std::sync::LazyLock<MessageType> =
    std::sync::LazyLock::new(|| builtin_stamp("builtin_interfaces/Time"));
static BUILTIN_DURATION: std::sync::LazyLock<MessageType> =
    std::sync::LazyLock::new(|| builtin_stamp("builtin_interfaces/Duration"));

fn builtin_stamp(name: &str) -> MessageType {
    MessageType {
        name: name.to_string(),
        fields: vec![
            Field {
                name: "sec".to_string(),
                field_type: FieldType::Primitive(Primitive::Int32),
                arity: Arity::Single,
            },
            Field {
                name: "nanosec".to_string(),
                field_type: FieldType::Primitive(Primitive::UInt32),
                arity: Arity::Single,
            },
        ],
    }
}

/// `pkg/msg/Type` → `pkg/Type`.
pub fn normalize_type_name(name: &str) -> String {
    let parts: Vec<&str> = name.split('/').collect();
    match parts.as_slice() {
        [package, "msg", type_name] => format!("{package}/{type_name}"),
        _ => name.to_string(),
    }
}

fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 3 && trimmed.chars().all(|c| c == '=')
}

fn split_sections(text: &str) -> Vec<Vec<&str>> {
    let mut sections = vec![Vec::new()];
    for line in text.lines() {
        if is_separator(line) {
            sections.push(Vec::new());
        } else if let Some(current) = sections.last_mut() {
            current.push(line);
        }
    }
    sections
}

fn parse_type(name: &str, lines: &[&str]) -> Result<MessageType, ConvertError> {
    let package = name.split('/').next().unwrap_or_default();
    let mut fields = Vec::new();

    for line in lines {
        let content = line.split('#').next().unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }

        let tokens: Vec<&str> = content.split_whitespace().collect();
        let [type_token, field_name, rest @ ..] = tokens.as_slice() else {
            return Err(ConvertError::MessageDefinition(format!(
                "malformed field line `{content}` in {name}"
            )));
        };

        // Constants: `int32 FOO=1` or `int32 FOO = 1`.
        if field_name.contains('=') || rest.first().is_some_and(|t| t.starts_with('=')) {
            continue;
        }

        let (base, arity) = parse_arity(type_token).ok_or_else(|| {
            ConvertError::MessageDefinition(format!("invalid array type `{type_token}`"))
        })?;
        let field_type = parse_field_type(base, package)?;

        fields.push(Field {
            name: (*field_name).to_string(),
            field_type,
            arity,
        });
    }

    Ok(MessageType {
        name: name.to_string(),
        fields,
    })
}

fn parse_arity(type_token: &str) -> Option<(&str, Arity)> {
    let Some(open) = type_token.find('[') else {
        return Some((type_token, Arity::Single));
    };
    let inner = type_token[open + 1..].strip_suffix(']')?;
    let arity = if inner.is_empty() || inner.starts_with("<=") {
        Arity::Sequence
    } else {
        Arity::Fixed(inner.parse().ok()?)
    };
    Some((&type_token[..open], arity))
}

fn parse_field_type(base: &str, package: &str) -> Result<FieldType, ConvertError> {
    // Bounded strings (`string<=10`) serialize like plain strings.
    let base = base.split("<=").next().unwrap_or(base);

    if let Some(primitive) = Primitive::parse(base) {
        return Ok(FieldType::Primitive(primitive));
    }

    Ok(match base {
        "string" => FieldType::String,
        "wstring" => {
            return Err(ConvertError::MessageDefinition(
                "wstring fields are not supported".to_string(),
            ));
        }
        "time" => FieldType::Complex("builtin_interfaces/Time".to_string()),
        "duration" => FieldType::Complex("builtin_interfaces/Duration".to_string()),
        "Header" => FieldType::Complex("std_msgs/Header".to_string()),
        qualified if qualified.contains('/') => FieldType::Complex(normalize_type_name(qualified)),
        local => FieldType::Complex(format!("{package}/{local}")),
    })
}
