//! The fixed-column VCT emitter of spec.md #4.4.
//!
//! Holds a 256-slot channel buffer, filled with `Wfc::UNMAPPED` (`.`)
//! at the start of every vector and then overwritten per-signal at
//! the channel positions the host's `ChannelMap` configures. The
//! per-vector line's exact column layout is pinned down in
//! SPEC_FULL.md #4.4 ("precise column layout"); this module renders
//! that layout literally rather than leaving any field's width
//! implicit.

use super::{micro_text, FinishOutcome};
use crate::ast::HeaderInfo;
use crate::lowering::{LoweredVector, VectorSink};
use crate::symbols::{SignalTable, WaveformTableTable};
use stil_core::{ChannelMap, Event, EventSink, StilError, Wfc, CHANNEL_COUNT};
use std::io::Write;

/// `MRST`/`MCMP`/`GTST`/`TENA`/`TMEM`/`CS` model master-reset,
/// compare-mode, guard-test, and cycle-stealing tester-engine state
/// this core does not track (spec.md #1's Non-goal on test
/// semantics); they are always rendered `0`. `SYNC` is always `000`.
const FIXED_BIT: char = '0';
const SYNC_FIELD: &str = "000";
const RESERVED_FIELD: &str = "                "; // 16 spaces

pub struct VctEmitter<'a, W: Write> {
    writer: W,
    channel_map: &'a ChannelMap,
    /// `(signal index in SignalTable::iter order) -> channel indices`,
    /// precomputed once at construction.
    channels_by_signal_index: Vec<Vec<u16>>,
    buffer: [Wfc; CHANNEL_COUNT],
}

impl<'a, W: Write> VctEmitter<'a, W> {
    pub fn new(
        writer: W,
        source_path: &str,
        header: &HeaderInfo,
        signals: &'a SignalTable,
        waveform_tables: &WaveformTableTable,
        channel_map: &'a ChannelMap,
        event_sink: &dyn EventSink,
    ) -> Result<Self, StilError> {
        let mut channels_by_signal_index = Vec::with_capacity(signals.len());
        for signal in signals.iter() {
            match channel_map.channels_for(&signal.name) {
                Some(channels) => channels_by_signal_index.push(channels.to_vec()),
                None => {
                    event_sink.emit(Event::Warning {
                        source_offset: stil_core::SourceOffset::new(0),
                        message: format!(
                            "signal '{}' has no channel map entry; its WFCs are dropped",
                            signal.name
                        ),
                    });
                    channels_by_signal_index.push(Vec::new());
                }
            }
        }

        let mut emitter = VctEmitter {
            writer,
            channel_map,
            channels_by_signal_index,
            buffer: [Wfc::UNMAPPED; CHANNEL_COUNT],
        };
        emitter.write_file_header(source_path, header, signals, waveform_tables)?;
        Ok(emitter)
    }

    fn io(&self, e: std::io::Error) -> StilError {
        StilError::io("failed writing VCT output", e)
    }

    fn write_file_header(
        &mut self,
        source_path: &str,
        header: &HeaderInfo,
        signals: &SignalTable,
        waveform_tables: &WaveformTableTable,
    ) -> Result<(), StilError> {
        writeln!(self.writer, "// STIL -> VCT conversion").map_err(|e| self.io(e))?;
        writeln!(self.writer, "// source: {}", source_path).map_err(|e| self.io(e))?;
        if let Some(date) = header.get("Date").or_else(|| header.get("date")) {
            writeln!(self.writer, "// date: {}", date).map_err(|e| self.io(e))?;
        }
        for (key, value) in header {
            writeln!(self.writer, "// header: {} = \"{}\"", key, value).map_err(|e| self.io(e))?;
        }
        writeln!(self.writer, "// waveform tables:").map_err(|e| self.io(e))?;
        for wft in waveform_tables.iter() {
            match wft.period {
                Some(period) => {
                    writeln!(self.writer, "//   {} (period {})", wft.name, period)
                        .map_err(|e| self.io(e))?
                }
                None => writeln!(self.writer, "//   {}", wft.name).map_err(|e| self.io(e))?,
            }
        }
        writeln!(self.writer, "// channel allocation:").map_err(|e| self.io(e))?;
        for signal in signals.iter() {
            if let Some(channels) = self.channel_map.channels_for(&signal.name) {
                let rendered: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
                writeln!(self.writer, "//   {}: {}", signal.name, rendered.join(","))
                    .map_err(|e| self.io(e))?;
            }
        }
        writeln!(self.writer, "#VECTOR").map_err(|e| self.io(e))?;
        writeln!(self.writer, "  ORG 0").map_err(|e| self.io(e))?;
        self.write_legend_and_ruler(signals)?;
        writeln!(self.writer, "VECTOR:").map_err(|e| self.io(e))?;
        writeln!(self.writer, "START:").map_err(|e| self.io(e))?;
        Ok(())
    }

    fn write_legend_and_ruler(&mut self, signals: &SignalTable) -> Result<(), StilError> {
        writeln!(self.writer, "// signal legend (channel: signal)").map_err(|e| self.io(e))?;
        for signal in signals.iter() {
            if let Some(channels) = self.channel_map.channels_for(&signal.name) {
                for &channel in channels {
                    writeln!(self.writer, "//   {:03}: {}", channel, signal.name)
                        .map_err(|e| self.io(e))?;
                }
            }
        }
        let mut tens = String::with_capacity(CHANNEL_COUNT);
        let mut units = String::with_capacity(CHANNEL_COUNT);
        for channel in 0..CHANNEL_COUNT {
            tens.push(char::from_digit(((channel / 10) % 10) as u32, 10).unwrap());
            units.push(char::from_digit((channel % 10) as u32, 10).unwrap());
        }
        writeln!(self.writer, "// channel ruler (tens): {}", tens).map_err(|e| self.io(e))?;
        writeln!(self.writer, "// channel ruler (ones): {}", units).map_err(|e| self.io(e))?;
        Ok(())
    }

    /// Write `#VECTOREND` on both success and cancellation (spec.md
    /// #7); never called on a fatal-error path, since `convert`
    /// propagates errors with `?` before reaching it.
    pub fn finish(mut self, _outcome: FinishOutcome) -> Result<(), StilError> {
        writeln!(self.writer, "#VECTOREND").map_err(|e| self.io(e))?;
        self.writer.flush().map_err(|e| self.io(e))
    }
}

impl<'a, W: Write> VectorSink for VctEmitter<'a, W> {
    fn write_vector(&mut self, vector: &LoweredVector) -> Result<(), StilError> {
        self.buffer = [Wfc::UNMAPPED; CHANNEL_COUNT];
        for (index, wfc) in vector.wfcs.iter().enumerate() {
            for &channel in &self.channels_by_signal_index[index] {
                self.buffer[channel as usize] = *wfc;
            }
        }
        let micro = micro_text(&vector.micro);
        let rradr = vector.wft_id.unwrap_or(0);
        let channels: String = self.buffer.iter().map(Wfc::as_char).collect();
        writeln!(
            self.writer,
            "{:<14} % {b}{b}{lit} {b}{b}{b} {reserved}{sync} {rradr} {b} {channels} ; 0x{addr:06X}",
            micro,
            b = FIXED_BIT,
            lit = FIXED_BIT,
            reserved = RESERVED_FIELD,
            sync = SYNC_FIELD,
            rradr = rradr,
            channels = channels,
            addr = vector.address,
        )
        .map_err(|e| self.io(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Direction, SignalDef};
    use crate::lowering::MicroInstruction;
    use stil_core::NullEventSink;

    fn signals_with(names: &[&str]) -> SignalTable {
        let mut table = SignalTable::new();
        for name in names {
            table
                .insert(SignalDef {
                    name: name.to_string(),
                    direction: Direction::In,
                    default_wfc: None,
                })
                .unwrap();
        }
        table
    }

    #[test]
    fn vector_line_has_256_channel_characters_and_padded_address() {
        let signals = signals_with(&["a"]);
        let waveform_tables = WaveformTableTable::new();
        let channel_map = ChannelMap::from_entries([("a".to_string(), vec![0])]).unwrap();
        let header = HeaderInfo::new();
        let mut buf = Vec::new();
        {
            let mut emitter = VctEmitter::new(
                &mut buf,
                "in.stil",
                &header,
                &signals,
                &waveform_tables,
                &channel_map,
                &NullEventSink,
            )
            .unwrap();
            emitter
                .write_vector(&LoweredVector {
                    address: 0,
                    wfcs: vec![Wfc::new('D').unwrap()],
                    micro: MicroInstruction::Mssa,
                    wft_name: Some("w".to_string()),
                    wft_id: Some(0),
                    labels: vec![],
                })
                .unwrap();
            emitter.finish(FinishOutcome::Completed).unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        let line = text
            .lines()
            .find(|l| l.contains("MSSA"))
            .expect("vector line present");
        // The 256-character channel block is the run right before " ; ".
        let before_semicolon = line.split(" ; ").next().unwrap().trim_end();
        let channel_block = &before_semicolon[before_semicolon.len() - 256..];
        assert_eq!(channel_block.chars().count(), 256);
        assert_eq!(channel_block.chars().next(), Some('D'));
        assert!(text.contains("#VECTOR\n"));
        assert!(text.contains("#VECTOREND"));
        assert!(line.contains("0x000000"));
    }
}
