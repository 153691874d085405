//! The VCT channel map of spec.md #6: `signal_name -> ordered channel
//! indices`, plus its two import formats.

use crate::error::StilError;
use std::collections::HashMap;

/// The VCT slot space is fixed at 256 channels (spec.md #4.4).
pub const CHANNEL_COUNT: usize = 256;

/// A mapping from STIL signal names to tester channel indices.
///
/// Channel indices must be unique across signals; building a
/// `ChannelMap` with a collision fails with `ChannelMapConflict`
/// rather than silently taking the last write, since a collision
/// means two signals would alias the same physical channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    by_signal: HashMap<String, Vec<u16>>,
}

impl ChannelMap {
    pub fn new() -> Self {
        ChannelMap {
            by_signal: HashMap::new(),
        }
    }

    /// Build a map from `signal -> channels`, rejecting any channel
    /// index shared by two signals.
    pub fn from_entries<I>(entries: I) -> Result<Self, StilError>
    where
        I: IntoIterator<Item = (String, Vec<u16>)>,
    {
        let mut owner: HashMap<u16, String> = HashMap::new();
        let mut by_signal = HashMap::new();

        for (signal, channels) in entries {
            for &channel in &channels {
                if let Some(existing) = owner.get(&channel) {
                    if existing != &signal {
                        return Err(StilError::ChannelMapConflict {
                            channel,
                            first_signal: existing.clone(),
                            second_signal: signal,
                        });
                    }
                } else {
                    owner.insert(channel, signal.clone());
                }
            }
            by_signal.insert(signal, channels);
        }

        Ok(ChannelMap { by_signal })
    }

    pub fn channels_for(&self, signal: &str) -> Option<&[u16]> {
        self.by_signal.get(signal).map(Vec::as_slice)
    }

    pub fn contains_signal(&self, signal: &str) -> bool {
        self.by_signal.contains_key(signal)
    }

    pub fn is_empty(&self) -> bool {
        self.by_signal.is_empty()
    }

    /// Parse the tabular form: a first header row `Signal,Channel`,
    /// with additional columns holding further channel indices for
    /// multi-channel signals (spec.md #6).
    ///
    /// Hand-rolled line/comma splitting rather than a CSV crate: the
    /// format has no quoting or embedded commas to justify one, and
    /// nothing else in this codebase, or the teacher's, reaches for a
    /// parsing crate where a manual tokenizer will do.
    pub fn parse_tabular(text: &str) -> Result<Self, StilError> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

        let header = lines.next().ok_or_else(|| StilError::ChannelMapParseError {
            message: "empty channel map".to_string(),
        })?;
        let header_cols: Vec<&str> = header.split(',').map(str::trim).collect();
        if header_cols.first() != Some(&"Signal") || header_cols.get(1) != Some(&"Channel") {
            return Err(StilError::ChannelMapParseError {
                message: format!(
                    "expected header 'Signal,Channel[,...]', found '{}'",
                    header
                ),
            });
        }

        let mut entries = Vec::new();
        for (row_index, line) in lines.enumerate() {
            let cols: Vec<&str> = line.split(',').map(str::trim).collect();
            let signal = cols.first().copied().ok_or_else(|| StilError::ChannelMapParseError {
                message: format!("row {}: missing signal name", row_index + 2),
            })?;
            if signal.is_empty() {
                return Err(StilError::ChannelMapParseError {
                    message: format!("row {}: missing signal name", row_index + 2),
                });
            }

            let mut channels = Vec::with_capacity(cols.len() - 1);
            for cell in &cols[1..] {
                if cell.is_empty() {
                    return Err(StilError::ChannelMapParseError {
                        message: format!(
                            "row {} ('{}'): missing channel index",
                            row_index + 2,
                            signal
                        ),
                    });
                }
                let channel: u16 = cell.parse().map_err(|_| StilError::ChannelMapParseError {
                    message: format!(
                        "row {} ('{}'): '{}' is not an integer channel index",
                        row_index + 2,
                        signal,
                        cell
                    ),
                })?;
                channels.push(channel);
            }

            entries.push((signal.to_string(), channels));
        }

        Self::from_entries(entries)
    }

    /// Parse the structured-text form: `{ "<signal>": [<channels...>] }`
    /// (spec.md #6).
    pub fn parse_json(text: &str) -> Result<Self, StilError> {
        let raw: HashMap<String, Vec<u16>> =
            serde_json::from_str(text).map_err(|e| StilError::ChannelMapParseError {
                message: format!("invalid channel map JSON: {}", e),
            })?;
        Self::from_entries(raw)
    }
}
