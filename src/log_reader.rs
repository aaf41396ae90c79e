//! Forward-only access to an MCAP message log.
//!
//! [`McapLog`] memory-maps the file so that iterating a multi-gigabyte log
//! keeps only the chunk being decompressed resident. Iteration is
//! forward-only; a second pass opens the log again rather than rewinding.
//!
//! # Example
//!
//! ```no_run
//! use mcap_video::McapLog;
//!
//! let log = McapLog::open("recording.mcap")?;
//! for (topic, schema) in log.channels_with_schema()? {
//!     println!("{topic}: {schema}");
//! }
//! for header in log.image_headers("/camera/image")? {
//!     let header = header?;
//!     println!("{} at {} ns", header.topic, header.log_time);
//! }
//! # Ok::<(), mcap_video::ConvertError>(())
//! ```

use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    fmt::{Debug, Formatter, Result as FmtResult},
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use mcap::{Message, MessageStream, Summary};
use memmap2::Mmap;

use crate::cdr::{self, Value};
use crate::error::ConvertError;
use crate::message_definition::MessageDefinition;
use crate::payload::ImageSchema;

/// An opened, memory-mapped MCAP file.
pub struct McapLog {
    mapped: Mmap,
    path: PathBuf,
}

impl Debug for McapLog {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("McapLog")
            .field("path", &self.path)
            .field("size", &self.mapped.len())
            .finish()
    }
}

/// One channel as described by the summary section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSummary {
    pub topic: String,
    pub schema_name: String,
    /// Messages recorded on the channel, when the log carries statistics.
    pub message_count: Option<u64>,
    /// Whether at least one message was recorded on the channel.
    pub has_messages: bool,
}

/// Header-only view of an image message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub schema: ImageSchema,
    pub topic: String,
    /// Log receipt time in nanoseconds.
    pub log_time: u64,
}

/// An image message with its still-encoded payload.
pub struct ImageMessage<'a> {
    pub schema: ImageSchema,
    pub topic: String,
    pub log_time: u64,
    data: Cow<'a, [u8]>,
    definition: Arc<MessageDefinition>,
}

impl Debug for ImageMessage<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ImageMessage")
            .field("schema", &self.schema)
            .field("topic", &self.topic)
            .field("log_time", &self.log_time)
            .field("payload_len", &self.data.len())
            .finish_non_exhaustive()
    }
}

impl ImageMessage<'_> {
    /// Decode the CDR payload against the channel's message definition.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::Cdr`] if the payload does not match.
    pub fn decode(&self) -> Result<Value<'_>, ConvertError> {
        cdr::decode(&self.definition, &self.data)
    }
}

impl McapLog {
    /// Open and memory-map an MCAP file.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::FileOpen`] if the file cannot be opened or
    /// mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConvertError> {
        let path = path.as_ref().to_path_buf();
        log::debug!("Opening MCAP log {}", path.display());
        let file = File::open(&path).map_err(|error| ConvertError::FileOpen {
            path: path.clone(),
            reason: error.to_string(),
        })?;
        // SAFETY: the mapping is read-only and the crate never writes to a
        // log it is converting.
        let mapped = unsafe { Mmap::map(&file) }.map_err(|error| ConvertError::FileOpen {
            path: path.clone(),
            reason: error.to_string(),
        })?;
        Ok(Self { mapped, path })
    }

    /// Path this log was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Channels listed in the summary section, sorted by topic.
    ///
    /// Reads only the summary; returns an empty list when the log has none.
    /// Channels without a schema are omitted. Whether a channel carries
    /// messages comes from the statistics record, else from the chunk
    /// indexes, else from a record-level pass over the data section.
    pub fn channel_summaries(&self) -> Result<Vec<ChannelSummary>, ConvertError> {
        let Some(summary) = Summary::read(&self.mapped)? else {
            log::debug!("{} has no summary section", self.path.display());
            return Ok(Vec::new());
        };

        let counts = summary
            .stats
            .as_ref()
            .map(|stats| &stats.channel_message_counts);
        let populated: HashSet<u16> = match counts {
            Some(counts) => counts
                .iter()
                .filter(|&(_, &count)| count > 0)
                .map(|(&id, _)| id)
                .collect(),
            None => self.populated_channels(&summary)?,
        };

        let mut channels: Vec<ChannelSummary> = summary
            .channels
            .values()
            .filter_map(|channel| {
                let schema = channel.schema.as_ref()?;
                Some(ChannelSummary {
                    topic: channel.topic.clone(),
                    schema_name: schema.name.clone(),
                    message_count: counts.map(|counts| {
                        counts.get(&channel.id).copied().unwrap_or_default()
                    }),
                    has_messages: populated.contains(&channel.id),
                })
            })
            .collect();
        channels.sort_by(|a, b| a.topic.cmp(&b.topic));
        Ok(channels)
    }

    /// Ids of channels with at least one message, for logs without statistics.
    fn populated_channels(&self, summary: &Summary) -> Result<HashSet<u16>, ConvertError> {
        let indexed = summary
            .chunk_indexes
            .iter()
            .any(|index| !index.message_index_offsets.is_empty());
        if indexed {
            return Ok(summary
                .chunk_indexes
                .iter()
                .flat_map(|index| index.message_index_offsets.keys().copied())
                .collect());
        }

        log::debug!(
            "{} has neither statistics nor message indexes, scanning records",
            self.path.display()
        );
        let mut seen = HashSet::new();
        for message in MessageStream::new(&self.mapped)? {
            seen.insert(message?.channel.id);
            if seen.len() == summary.channels.len() {
                break;
            }
        }
        Ok(seen)
    }

    /// Every `(topic, schema_name)` pair listed in the summary section.
    pub fn channels_with_schema(&self) -> Result<Vec<(String, String)>, ConvertError> {
        Ok(self
            .channel_summaries()?
            .into_iter()
            .map(|channel| (channel.topic, channel.schema_name))
            .collect())
    }

    /// Iterate the headers of image messages on `topic`, without decoding.
    pub fn image_headers<'a>(
        &'a self,
        topic: &'a str,
    ) -> Result<impl Iterator<Item = Result<FrameHeader, ConvertError>> + 'a, ConvertError> {
        let stream = MessageStream::new(&self.mapped)?;
        Ok(stream.filter_map(move |message| match message {
            Ok(message) => image_schema_on_topic(&message, topic).map(|schema| {
                Ok(FrameHeader {
                    schema,
                    topic: message.channel.topic.clone(),
                    log_time: message.log_time,
                })
            }),
            Err(error) => Some(Err(ConvertError::from(error))),
        }))
    }

    /// Iterate image messages on `topic` together with their definitions.
    pub fn image_messages<'a>(&'a self, topic: &'a str) -> Result<ImageMessages<'a>, ConvertError> {
        Ok(ImageMessages {
            stream: MessageStream::new(&self.mapped)?,
            topic,
            definitions: HashMap::new(),
        })
    }
}

fn image_schema_on_topic(message: &Message<'_>, topic: &str) -> Option<ImageSchema> {
    if message.channel.topic != topic {
        return None;
    }
    let schema = message.channel.schema.as_ref()?;
    ImageSchema::from_schema_name(&schema.name)
}

/// Iterator returned by [`McapLog::image_messages`].
pub struct ImageMessages<'a> {
    stream: MessageStream<'a>,
    topic: &'a str,
    /// Parsed definitions, keyed by channel id.
    definitions: HashMap<u16, Arc<MessageDefinition>>,
}

impl ImageMessages<'_> {
    fn definition_for(&mut self, message: &Message<'_>) -> Result<Arc<MessageDefinition>, ConvertError> {
        let channel = &message.channel;
        if let Some(definition) = self.definitions.get(&channel.id) {
            return Ok(Arc::clone(definition));
        }

        let schema = channel.schema.as_ref().ok_or_else(|| {
            ConvertError::MessageDefinition(format!("channel {} has no schema", channel.topic))
        })?;
        if schema.encoding != "ros2msg" || channel.message_encoding != "cdr" {
            return Err(ConvertError::MessageDefinition(format!(
                "channel {} uses {}/{} encoding, only ros2msg/cdr is supported",
                channel.topic, schema.encoding, channel.message_encoding
            )));
        }

        let text = String::from_utf8_lossy(&schema.data);
        let definition = Arc::new(MessageDefinition::parse(&schema.name, &text)?);
        self.definitions.insert(channel.id, Arc::clone(&definition));
        Ok(definition)
    }
}

impl<'a> Iterator for ImageMessages<'a> {
    type Item = Result<ImageMessage<'a>, ConvertError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let message = match self.stream.next()? {
                Ok(message) => message,
                Err(error) => return Some(Err(ConvertError::from(error))),
            };
            let Some(schema) = image_schema_on_topic(&message, self.topic) else {
                continue;
            };
            let definition = match self.definition_for(&message) {
                Ok(definition) => definition,
                Err(error) => return Some(Err(error)),
            };
            return Some(Ok(ImageMessage {
                schema,
                topic: message.channel.topic.clone(),
                log_time: message.log_time,
                data: message.data,
                definition,
            }));
        }
    }
}
