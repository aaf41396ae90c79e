//! Image topic discovery.
//!
//! Lists the channels of a log whose schema is a recognized image kind,
//! reading only the summary section (no message payload is touched).
//!
//! # Example
//!
//! ```no_run
//! let topics = mcap_video::list_image_topics("recording.mcap")?;
//! for topic in &topics {
//!     println!("{topic}");
//! }
//! # Ok::<(), mcap_video::ConvertError>(())
//! ```

use std::{collections::BTreeSet, path::Path};

use crate::error::ConvertError;
use crate::log_reader::McapLog;
use crate::payload::ImageSchema;

/// Topics in the log carrying `sensor_msgs` image messages.
///
/// Returns an empty set if the log has no summary section. Channels with no
/// recorded message are left out.
///
/// # Errors
///
/// Propagates [`ConvertError::FileOpen`] and [`ConvertError::Mcap`].
pub fn list_image_topics<P: AsRef<Path>>(path: P) -> Result<BTreeSet<String>, ConvertError> {
    let log = McapLog::open(path)?;
    image_topics(&log)
}

/// Same as [`list_image_topics`] on an already opened log.
pub fn image_topics(log: &McapLog) -> Result<BTreeSet<String>, ConvertError> {
    let topics: BTreeSet<String> = log
        .channel_summaries()?
        .into_iter()
        .filter(|channel| ImageSchema::from_schema_name(&channel.schema_name).is_some())
        .filter(|channel| channel.has_messages)
        .map(|channel| channel.topic)
        .collect();
    log::debug!("Found {} image topic(s) in {}", topics.len(), log.path().display());
    Ok(topics)
}
