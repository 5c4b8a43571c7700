// Delayed virtual channel - repeats an input channel shifted in time
//
// Tags of the input are queued at `time + delay` and released into the batch
// whose range contains them, so the output stays time ordered across
// batches.

use super::virtual_tagger::Shared;
use crate::types::{Channel, Tag, Timestamp};
use std::collections::VecDeque;
use std::sync::Weak;

/// Owner side of a delayed channel. Dropping it removes the channel from the
/// tagger.
pub struct DelayedChannel {
    channel: Channel,
    input: Channel,
    delay: Timestamp,
    tagger: Weak<Shared>,
}

impl DelayedChannel {
    pub(super) fn new(channel: Channel, input: Channel, delay: Timestamp, tagger: Weak<Shared>) -> Self {
        Self {
            channel,
            input,
            delay,
            tagger,
        }
    }

    /// Virtual channel number that measurements subscribe to
    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn input_channel(&self) -> Channel {
        self.input
    }

    pub fn delay(&self) -> Timestamp {
        self.delay
    }
}

impl Drop for DelayedChannel {
    fn drop(&mut self) {
        if let Some(shared) = self.tagger.upgrade() {
            shared.remove_delay_line(self.channel);
        }
    }
}

/// Delivery-thread side of a delayed channel
pub(super) struct DelayLine {
    pub channel: Channel,
    pub input: Channel,
    pub delay: Timestamp,
    pending: VecDeque<Timestamp>,
}

impl DelayLine {
    pub fn new(channel: Channel, input: Channel, delay: Timestamp) -> Self {
        Self {
            channel,
            input,
            delay,
            pending: VecDeque::new(),
        }
    }

    /// Queue the input tags of a batch and merge every pending tag before
    /// `end` into `tags`
    pub fn apply(&mut self, tags: &mut Vec<Tag>, end: Timestamp) {
        self.pending.extend(
            tags.iter()
                .filter(|t| t.channel == self.input)
                .map(|t| t.time + self.delay),
        );

        let ready = self.pending.iter().take_while(|&&t| t < end).count();
        if ready == 0 {
            return;
        }
        tags.extend(
            self.pending
                .drain(..ready)
                .map(|time| Tag::new(self.channel, time)),
        );
        tags.sort_by_key(|t| t.time);
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
