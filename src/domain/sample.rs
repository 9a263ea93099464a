// Sample batches and channel bindings exchanged with a source
use super::point::{Sample, Timestamp};
use indexmap::IndexMap;

/// Suffix of the channel key that carries the high value of a range series.
pub const HIGH_VALUE_SUFFIX: &str = "--high-value";

/// Key under which a channel's samples are delivered: the series id, or the
/// series id plus [`HIGH_VALUE_SUFFIX`].
pub type ChannelKey = String;

pub fn high_value_key(series_id: &str) -> ChannelKey {
    format!("{}{}", series_id, HIGH_VALUE_SUFFIX)
}

/// Maps a channel key back to its series id and whether it is the high channel.
pub fn split_channel_key(key: &str) -> (&str, bool) {
    match key.strip_suffix(HIGH_VALUE_SUFFIX) {
        Some(series_id) => (series_id, true),
        None => (key, false),
    }
}

/// Source address of a channel, `recorder:channel` or a bare channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelAddress {
    pub recorder: Option<String>,
    pub channel: String,
}

impl ChannelAddress {
    pub fn parse(address: &str) -> Self {
        match address.split_once(':') {
            Some((recorder, channel)) => Self {
                recorder: Some(recorder.to_string()),
                channel: channel.to_string(),
            },
            None => Self {
                recorder: None,
                channel: address.to_string(),
            },
        }
    }
}

/// Channel keys to source addresses. This is the join key between chart
/// series and the source's query/subscribe API.
pub type ChannelMap = IndexMap<ChannelKey, String>;

/// Result of a query or subscription tick, samples ascending per channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBatch {
    pub channels: IndexMap<ChannelKey, Vec<Sample>>,
}

impl SampleBatch {
    pub fn is_empty(&self) -> bool {
        self.channels.values().all(|s| s.is_empty())
    }

    pub fn sample_count(&self) -> usize {
        self.channels.values().map(|s| s.len()).sum()
    }

    pub fn latest_timestamp(&self) -> Option<Timestamp> {
        self.channels
            .values()
            .filter_map(|s| s.last().map(|sample| sample.t))
            .max()
    }

    /// Appends samples of `other`, channel by channel.
    pub fn extend(&mut self, other: SampleBatch) {
        for (key, samples) in other.channels {
            self.channels.entry(key).or_default().extend(samples);
        }
    }
}

/// One page returned by the transport for a single recorder group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    /// Samples per source channel name (not per channel key).
    pub channels: IndexMap<String, Vec<Sample>>,
    /// Samples left on the server after this page; > 0 means fetch more.
    pub remaining: u64,
}

impl QueryPage {
    pub fn latest_timestamp(&self) -> Option<Timestamp> {
        self.channels
            .values()
            .filter_map(|s| s.last().map(|sample| sample.t))
            .max()
    }

    pub fn sample_count(&self) -> usize {
        self.channels.values().map(|s| s.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_address_parse() {
        let a = ChannelAddress::parse("Recorder1:Plant/Temp:1");
        assert_eq!(a.recorder.as_deref(), Some("Recorder1"));
        assert_eq!(a.channel, "Plant/Temp:1");

        let b = ChannelAddress::parse("Pressure");
        assert_eq!(b.recorder, None);
        assert_eq!(b.channel, "Pressure");
    }

    #[test]
    fn test_split_channel_key() {
        assert_eq!(split_channel_key("s1"), ("s1", false));
        assert_eq!(split_channel_key(&high_value_key("s1")), ("s1", true));
    }

    #[test]
    fn test_latest_timestamp() {
        let mut batch = SampleBatch::default();
        batch
            .channels
            .insert("a".into(), vec![Sample::new(1, 1.0), Sample::new(5, 2.0)]);
        batch.channels.insert("b".into(), vec![Sample::new(7, 1.0)]);
        batch.channels.insert("c".into(), vec![]);
        assert_eq!(batch.latest_timestamp(), Some(7));
        assert_eq!(batch.sample_count(), 3);
    }
}
