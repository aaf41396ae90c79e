//! Shared fixtures: a little-endian CDR writer and MCAP log builders.

#![allow(dead_code)]

use std::{collections::BTreeMap, fs::File, io::BufWriter, path::Path};

use mcap::records::MessageHeader;

pub const IMAGE_SCHEMA: &str = "sensor_msgs/msg/Image";
pub const COMPRESSED_SCHEMA: &str = "sensor_msgs/msg/CompressedImage";
pub const STRING_SCHEMA: &str = "std_msgs/msg/String";

pub const IMAGE_DEFINITION: &str =
    "uint32 height\nuint32 width\nstring encoding\nuint8 is_bigendian\nuint32 step\nuint8[] data\n";

pub const STAMPED_IMAGE_DEFINITION: &str = "std_msgs/Header header\n\
uint32 height\n\
uint32 width\n\
string encoding\n\
uint8 is_bigendian\n\
uint32 step\n\
uint8[] data\n\
================================================================================\n\
MSG: std_msgs/Header\n\
builtin_interfaces/Time stamp\n\
string frame_id\n\
================================================================================\n\
MSG: builtin_interfaces/Time\n\
int32 sec\n\
uint32 nanosec\n";

pub const COMPRESSED_DEFINITION: &str = "string format\nuint8[] data\n";

pub const STRING_DEFINITION: &str = "string data\n";

pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

/// Builds a little-endian CDR payload.
pub struct CdrWriter {
    buffer: Vec<u8>,
}

impl CdrWriter {
    pub fn new() -> Self {
        Self {
            buffer: vec![0x00, 0x01, 0x00, 0x00],
        }
    }

    fn align(&mut self, size: usize) {
        while (self.buffer.len() - 4) % size != 0 {
            self.buffer.push(0);
        }
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.align(4);
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.align(4);
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn string(&mut self, value: &str) -> &mut Self {
        self.u32(value.len() as u32 + 1);
        self.buffer.extend_from_slice(value.as_bytes());
        self.buffer.push(0);
        self
    }

    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.u32(value.len() as u32);
        self.buffer.extend_from_slice(value);
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

/// `sensor_msgs/msg/Image`, with a header when `stamp` is given.
pub fn raw_image(
    stamp: Option<(i32, u32)>,
    width: u32,
    height: u32,
    encoding: &str,
    data: &[u8],
) -> Vec<u8> {
    let mut writer = CdrWriter::new();
    if let Some((sec, nanosec)) = stamp {
        writer.i32(sec).u32(nanosec).string("camera");
    }
    let channels = if width * height == 0 {
        0
    } else {
        data.len() as u32 / (width * height)
    };
    writer
        .u32(height)
        .u32(width)
        .string(encoding)
        .u8(0)
        .u32(width * channels)
        .bytes(data);
    writer.finish()
}

pub fn compressed_image(format: &str, data: &[u8]) -> Vec<u8> {
    CdrWriter::new().string(format).bytes(data).finish()
}

pub fn string_message(text: &str) -> Vec<u8> {
    CdrWriter::new().string(text).finish()
}

/// Pixel bytes of a solid frame in `rgb8` or `bgr8` order.
pub fn solid_pixels(color: [u8; 3], encoding: &str, width: u32, height: u32) -> Vec<u8> {
    let pixel = if encoding == "bgr8" {
        [color[2], color[1], color[0]]
    } else {
        color
    };
    pixel.repeat((width * height) as usize)
}

/// JPEG bytes of a solid frame.
pub fn solid_jpeg(color: [u8; 3], width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb(color));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Jpeg)
        .expect("encode jpeg");
    bytes.into_inner()
}

/// One channel of a fixture log.
pub struct ChannelSpec<'a> {
    pub topic: &'a str,
    pub schema_name: &'a str,
    pub definition: &'a str,
}

/// A message on the channel at `channel` (index into the channel list).
pub struct MessageSpec {
    pub channel: usize,
    pub log_time: u64,
    pub data: Vec<u8>,
}

/// Write an MCAP log with the given channels and messages, in order.
pub fn write_mcap(path: &Path, channels: &[ChannelSpec<'_>], messages: &[MessageSpec]) {
    write_mcap_with(mcap::WriteOptions::new(), path, channels, messages);
}

/// Same as [`write_mcap`] with explicit writer options.
pub fn write_mcap_with(
    options: mcap::WriteOptions,
    path: &Path,
    channels: &[ChannelSpec<'_>],
    messages: &[MessageSpec],
) {
    let file = BufWriter::new(File::create(path).expect("create mcap"));
    let mut writer = options.create(file).expect("mcap writer");

    let channel_ids: Vec<u16> = channels
        .iter()
        .map(|channel| {
            let schema_id = writer
                .add_schema(channel.schema_name, "ros2msg", channel.definition.as_bytes())
                .expect("add schema");
            writer
                .add_channel(schema_id, channel.topic, "cdr", &BTreeMap::new())
                .expect("add channel")
        })
        .collect();

    for (sequence, message) in messages.iter().enumerate() {
        let header = MessageHeader {
            channel_id: channel_ids[message.channel],
            sequence: sequence as u32,
            log_time: message.log_time,
            publish_time: message.log_time,
        };
        writer
            .write_to_known_channel(&header, &message.data)
            .expect("write message");
    }
    writer.finish().expect("finish mcap");
}

/// A log with one raw image topic `/camera/image_raw` cycling through
/// `colors`, one frame every `interval_ns` starting at one second.
pub fn write_color_log(
    path: &Path,
    colors: &[[u8; 3]],
    interval_ns: u64,
    encoding: &str,
    stamped: bool,
) {
    let definition = if stamped {
        STAMPED_IMAGE_DEFINITION
    } else {
        IMAGE_DEFINITION
    };
    let messages: Vec<MessageSpec> = colors
        .iter()
        .enumerate()
        .map(|(index, &color)| {
            let log_time = 1_000_000_000 + index as u64 * interval_ns;
            let stamp = stamped.then(|| {
                (
                    (log_time / 1_000_000_000) as i32,
                    (log_time % 1_000_000_000) as u32,
                )
            });
            MessageSpec {
                channel: 0,
                log_time,
                data: raw_image(
                    stamp,
                    WIDTH,
                    HEIGHT,
                    encoding,
                    &solid_pixels(color, encoding, WIDTH, HEIGHT),
                ),
            }
        })
        .collect();
    write_mcap(
        path,
        &[ChannelSpec {
            topic: "/camera/image_raw",
            schema_name: IMAGE_SCHEMA,
            definition,
        }],
        &messages,
    );
}

/// Whether every channel of `actual` is within `tolerance` of `expected`.
pub fn color_close(actual: [u8; 3], expected: [u8; 3], tolerance: u8) -> bool {
    actual
        .iter()
        .zip(expected)
        .all(|(&a, e)| a.abs_diff(e) <= tolerance)
}

/// Whether the `ffmpeg` executable is on `PATH`.
pub fn ffmpeg_binary_available() -> bool {
    which::which("ffmpeg").is_ok()
}

/// Whether an error means no usable encoder is installed.
pub fn is_encoder_unavailable(error: &mcap_video::ConvertError) -> bool {
    let message = error.to_string();
    matches!(error, mcap_video::ConvertError::EncoderUnavailable(_))
        || message.contains("not available")
        || message.contains("cannot open encoder")
        || message.contains("Unknown encoder")
}

/// Write an executable shell script standing in for the `ffmpeg` binary.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("make script executable");
    path
}
