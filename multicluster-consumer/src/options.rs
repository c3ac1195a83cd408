//! Optional arguments to [`MultiClusterConsumerBuilder`](crate::builder::MultiClusterConsumerBuilder).

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::error::ConsumerError;
use crate::types::ConsumerTopic;

pub const DEFAULT_MESSAGE_BUFFER: usize = 1024;

/// Settings the builder works from once every option has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub partial_construction: bool,
    pub message_buffer: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            partial_construction: false,
            message_buffer: DEFAULT_MESSAGE_BUFFER,
        }
    }
}

/// A topic that could not be consumed because its cluster failed to initialize.
#[derive(Debug, Clone)]
pub struct TopicError {
    pub topic: ConsumerTopic,
    pub error: Arc<ConsumerError>,
}

impl fmt::Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "topic {}: {}", self.topic, self.error)
    }
}

pub trait ConsumerOption: Send + Sync + 'static {
    fn apply(&self, options: &mut Options);

    /// Called once construction has finished, with every topic that was skipped.
    fn record_construction_errors(&self, _errors: &Arc<[TopicError]>) {}

    fn as_any(&self) -> &dyn Any;
}

/// Build a consumer over whichever clusters could be initialized instead of failing
/// outright. Keep the returned handle and pass it to [`partial_construction_errors`]
/// after building to find out which topics were left out.
pub fn enable_partial_construction() -> Arc<PartialConstruction> {
    Arc::new(PartialConstruction {
        errors: OnceLock::new(),
    })
}

pub struct PartialConstruction {
    errors: OnceLock<Arc<[TopicError]>>,
}

impl PartialConstruction {
    /// Topics that were skipped, or `None` if no consumer was built with this option yet.
    pub fn errors(&self) -> Option<&[TopicError]> {
        self.errors.get().map(|errors| &errors[..])
    }
}

impl ConsumerOption for PartialConstruction {
    fn apply(&self, options: &mut Options) {
        options.partial_construction = true;
    }

    fn record_construction_errors(&self, errors: &Arc<[TopicError]>) {
        if self.errors.set(errors.clone()).is_err() {
            debug!("partial construction option reused, keeping the first error list");
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Topics that could not be consumed, if `option` is the handle returned by
/// [`enable_partial_construction`]. Any other option yields `None`.
pub fn partial_construction_errors(option: &dyn ConsumerOption) -> Option<&[TopicError]> {
    option
        .as_any()
        .downcast_ref::<PartialConstruction>()?
        .errors()
}

/// Capacity of the channel shared by every cluster consumer.
pub fn with_message_buffer(size: usize) -> Arc<MessageBuffer> {
    Arc::new(MessageBuffer(size.max(1)))
}

pub struct MessageBuffer(usize);

impl ConsumerOption for MessageBuffer {
    fn apply(&self, options: &mut Options) {
        options.message_buffer = self.0;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
