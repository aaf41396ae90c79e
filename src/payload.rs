//! Image-bearing ROS 2 message kinds and their decoded payloads.
//!
//! Only the schema names listed in [`ImageSchema`] qualify a channel as
//! image-bearing. A decoded CDR [`Value`] of either kind is narrowed into an
//! [`ImagePayload`] that borrows the pixel bytes from the log.

use crate::cdr::Value;
use crate::error::ConvertError;
use crate::timing::NANOSECONDS_PER_SECOND;

/// Recognized image message schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageSchema {
    /// `sensor_msgs/msg/Image`: an uncompressed raster.
    Raw,
    /// `sensor_msgs/msg/CompressedImage`: JPEG/PNG bytes plus a format tag.
    Compressed,
}

impl ImageSchema {
    /// Map a schema name to an image kind; `None` for anything else.
    pub fn from_schema_name(name: &str) -> Option<Self> {
        match name {
            "sensor_msgs/msg/Image" => Some(ImageSchema::Raw),
            "sensor_msgs/msg/CompressedImage" => Some(ImageSchema::Compressed),
            _ => None,
        }
    }

    pub fn schema_name(self) -> &'static str {
        match self {
            ImageSchema::Raw => "sensor_msgs/msg/Image",
            ImageSchema::Compressed => "sensor_msgs/msg/CompressedImage",
        }
    }
}

/// An uncompressed raster as recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage<'a> {
    pub height: u32,
    pub width: u32,
    /// Pixel encoding label, lower-cased (`rgb8`, `bgr8`, `mono8`, ...).
    pub encoding: String,
    pub data: &'a [u8],
}

/// Compressed image bytes as recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedImage<'a> {
    /// Format label, lower-cased (`jpeg`, `png`, ...).
    pub format: String,
    pub data: &'a [u8],
}

/// The image content of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePayload<'a> {
    Raw(RawImage<'a>),
    Compressed(CompressedImage<'a>),
}

impl<'a> ImagePayload<'a> {
    /// Narrow a decoded message of kind `schema` to its image fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::FrameDecode`] if a required field is missing
    /// or has the wrong type.
    pub fn from_value(schema: ImageSchema, value: &Value<'a>) -> Result<Self, ConvertError> {
        let data = value
            .field("data")
            .and_then(Value::as_bytes)
            .ok_or_else(|| missing_field("data"))?;

        match schema {
            ImageSchema::Raw => {
                let height = dimension(value, "height")?;
                let width = dimension(value, "width")?;
                let encoding = value
                    .field("encoding")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                Ok(ImagePayload::Raw(RawImage {
                    height,
                    width,
                    encoding,
                    data,
                }))
            }
            ImageSchema::Compressed => {
                let format = value
                    .field("format")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                Ok(ImagePayload::Compressed(CompressedImage { format, data }))
            }
        }
    }

    /// The encoding (raw) or format (compressed) label.
    pub fn label(&self) -> &str {
        match self {
            ImagePayload::Raw(raw) => &raw.encoding,
            ImagePayload::Compressed(compressed) => &compressed.format,
        }
    }
}

fn missing_field(name: &str) -> ConvertError {
    ConvertError::FrameDecode(format!("message has no usable `{name}` field"))
}

fn dimension(value: &Value<'_>, name: &str) -> Result<u32, ConvertError> {
    value
        .field(name)
        .and_then(Value::as_i64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| missing_field(name))
}

/// The embedded capture time `header.stamp` in nanoseconds.
///
/// Both `sec` and `nanosec` (ROS 2) or `nsec` (ROS 1 style) must be present
/// and integer-coercible; otherwise the stamp is treated as absent.
pub fn header_stamp_ns(value: &Value<'_>) -> Option<i64> {
    let stamp = value.path("header.stamp")?;
    let seconds = stamp.field("sec")?.as_i64()?;
    let nanoseconds = stamp
        .field("nanosec")
        .or_else(|| stamp.field("nsec"))?
        .as_i64()?;
    seconds
        .checked_mul(NANOSECONDS_PER_SECOND)?
        .checked_add(nanoseconds)
}
