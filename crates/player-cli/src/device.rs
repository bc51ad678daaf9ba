//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing a stream config for a decoded PCM format

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
///
/// Returns an error if no suitable device is found.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose the output config closest to a source format.
///
/// Preference order: a range that can run at `target_rate` (or the highest rate below it),
/// then the channel count closest to `target_channels`, then the richest sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
    target_channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();

    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate = pick_rate_for_range(
            range.min_sample_rate(),
            range.max_sample_rate(),
            target_rate,
        );
        let candidate = Candidate {
            below: rate <= target_rate,
            rate,
            channel_miss: channel_distance(range.channels(), target_channels),
            format_rank: sample_format_rank(range.sample_format()),
        };
        let replace = match &best {
            None => true,
            Some((b, _)) => candidate.is_better_than(b),
        };
        if replace {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Prefer a fixed buffer size if the device advertises one.
///
/// Returns `None` when the device only supports the default buffer size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            const MAX_FRAMES: u32 = 4_096;
            let chosen = if *max > MAX_FRAMES {
                if *min > MAX_FRAMES { *min } else { MAX_FRAMES }
            } else {
                *max
            };
            Some(cpal::BufferSize::Fixed(chosen))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print available output devices and their rate ranges to stdout.
///
/// This is intended for CLI UX (`--list-devices`) rather than structured output.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        let name = d.description()?;
        match d.supported_output_configs() {
            Ok(ranges) => {
                let (min, max) = ranges.fold((u32::MAX, 0u32), |(lo, hi), r| {
                    (lo.min(r.min_sample_rate()), hi.max(r.max_sample_rate()))
                });
                if max == 0 {
                    println!("#{i}: {name}");
                } else {
                    println!("#{i}: {name} ({min}-{max} Hz)");
                }
            }
            Err(e) => {
                tracing::debug!(device = %name, error = %e, "no output configs");
                println!("#{i}: {name}");
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Candidate {
    below: bool,
    rate: u32,
    channel_miss: u16,
    format_rank: u8,
}

impl Candidate {
    fn is_better_than(&self, best: &Candidate) -> bool {
        if self.below != best.below {
            self.below
        } else if self.rate != best.rate {
            // Above the target the closest rate wins, at or below it the highest does.
            if self.below {
                self.rate > best.rate
            } else {
                self.rate < best.rate
            }
        } else if self.channel_miss != best.channel_miss {
            self.channel_miss < best.channel_miss
        } else {
            self.format_rank < best.format_rank
        }
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    if target >= min && target <= max {
        target
    } else if target < min {
        min
    } else {
        max
    }
}

/// Ranges with fewer channels than the source lose information, so they rank after any
/// range that has enough.
fn channel_distance(available: u16, wanted: u16) -> u16 {
    if available >= wanted {
        available - wanted
    } else {
        u16::MAX / 2 + (wanted - available)
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(below: bool, rate: u32, channel_miss: u16, format_rank: u8) -> Candidate {
        Candidate {
            below,
            rate,
            channel_miss,
            format_rank,
        }
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn pick_rate_for_range_prefers_target_when_in_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, 48_000), 48_000);
    }

    #[test]
    fn pick_rate_for_range_clamps() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, 22_050), 44_100);
        assert_eq!(pick_rate_for_range(44_100, 96_000, 192_000), 96_000);
    }

    #[test]
    fn exact_rate_beats_higher_rate() {
        let exact = candidate(true, 44_100, 0, 2);
        let above = candidate(false, 48_000, 0, 0);
        assert!(exact.is_better_than(&above));
        assert!(!above.is_better_than(&exact));
    }

    #[test]
    fn closest_rate_above_target_wins() {
        let near = candidate(false, 44_100, 0, 0);
        let far = candidate(false, 96_000, 0, 0);
        assert!(near.is_better_than(&far));
    }

    #[test]
    fn channel_match_breaks_rate_ties() {
        let stereo = candidate(true, 48_000, 0, 2);
        let surround = candidate(true, 48_000, 4, 0);
        assert!(stereo.is_better_than(&surround));
    }

    #[test]
    fn format_rank_breaks_remaining_ties() {
        let float = candidate(true, 48_000, 0, 0);
        let int = candidate(true, 48_000, 0, 2);
        assert!(float.is_better_than(&int));
    }

    #[test]
    fn too_few_channels_ranks_last() {
        assert!(channel_distance(2, 2) < channel_distance(8, 2));
        assert!(channel_distance(8, 2) < channel_distance(1, 2));
    }
}
