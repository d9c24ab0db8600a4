// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use scatterscrub::cache::StreamingPreviewCache;
use scatterscrub::config::PreviewConfig;
use scatterscrub::{CardGrade, PreviewSystem, SharedGrade, SpatialSampleIndex, TickOutcome};
use std::error::Error;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Instant sample auditioning over a scatter map."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Loads a stub index and prints what it contains.
    Inspect {
        /// The path to the .bak stub index.
        bak: PathBuf,
        /// The path to the .pak body file.
        #[arg[short, long]]
        pak: Option<PathBuf>,
    },
    /// Sweeps a simulated cursor across the map and renders what it would hear.
    Scrub {
        /// The path to the preview config.
        config: PathBuf,
        /// Start of the sweep, in the form X,Y.
        #[arg[long, value_parser = parse_point]]
        from: (f32, f32),
        /// End of the sweep, in the form X,Y.
        #[arg[long, value_parser = parse_point]]
        to: (f32, f32),
        /// How long the sweep takes.
        #[arg[short, long, default_value = "2s"]]
        duration: String,
        /// How long the cursor rests at the end of the sweep.
        #[arg[long, default_value = "500ms"]]
        hold: String,
        /// Overrides the card grade from the config.
        #[arg[short, long]]
        grade: Option<CardGrade>,
        /// Writes the rendered mono mix to this WAV file.
        #[arg[short, long]]
        wav: Option<PathBuf>,
        /// Paces ticks at wall-clock speed so body loading races as it would live.
        #[arg[short, long]]
        realtime: bool,
    },
}

fn parse_point(s: &str) -> Result<(f32, f32), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{}'", s))?;
    let x = x.trim().parse::<f32>().map_err(|e| e.to_string())?;
    let y = y.trim().parse::<f32>().map_err(|e| e.to_string())?;
    Ok((x, y))
}

fn parse_duration(s: &str) -> Result<Duration, Box<dyn Error>> {
    Ok(DurationString::from_string(s.to_string())?.into())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { bak, pak } => {
            let mut index = SpatialSampleIndex::new();
            index.load(&bak)?;

            let occupancy = index.bin_occupancy();
            let used = occupancy.iter().filter(|&&n| n > 0).count();
            let densest = occupancy.iter().copied().max().unwrap_or(0);
            println!("Samples: {}", index.sample_count());
            println!("Stub memory: {} KiB", index.stub_bytes() / 1024);
            println!(
                "Bins: {} of {} occupied, densest holds {}",
                used,
                occupancy.len(),
                densest
            );

            if let Some(pak) = pak {
                let cache = StreamingPreviewCache::new(SharedGrade::default());
                cache.open(&pak)?;
                println!("Bodies: {}", cache.body_count());
                let missing = index.ids().filter(|&id| !cache.has_body(id)).count();
                if missing > 0 {
                    println!("Samples without a body: {}", missing);
                }
                cache.close();
            }
        }
        Commands::Scrub {
            config,
            from,
            to,
            duration,
            hold,
            grade,
            wav,
            realtime,
        } => {
            let mut config = PreviewConfig::deserialize(&config)?;
            if let Some(grade) = grade {
                config.set_card_grade(grade);
            }
            let sweep = parse_duration(&duration)?;
            let hold = parse_duration(&hold)?;
            let tick = config.tick_interval()?;

            let (mut system, mut renderer) = PreviewSystem::init(&config)?;
            let block_frames =
                ((renderer.sample_rate() as f64 * tick.as_secs_f64()).round() as usize).max(1);
            let mut block = vec![0.0f32; block_frames];
            let mut mix = Vec::new();

            let total = sweep + hold;
            let ticks = (total.as_secs_f64() / tick.as_secs_f64()).ceil() as usize;
            let start = Instant::now();
            let mut triggered = Vec::new();
            for step in 0..=ticks {
                let t = step as f64 * tick.as_secs_f64();
                let progress = if sweep.is_zero() {
                    1.0
                } else {
                    (t / sweep.as_secs_f64()).min(1.0) as f32
                };
                let x = from.0 + (to.0 - from.0) * progress;
                let y = from.1 + (to.1 - from.1) * progress;

                if let TickOutcome::Triggered { id, .. } = system.tick_at(x, y, t) {
                    triggered.push(id);
                }
                renderer.render(&mut block);
                mix.extend_from_slice(&block);

                if realtime {
                    let due = start + Duration::from_secs_f64(t + tick.as_secs_f64());
                    let now = Instant::now();
                    if due > now {
                        spin_sleep::sleep(due - now);
                    }
                }
            }

            let stats = system.arbiter().stats();
            println!("Triggered ({}): {:?}", triggered.len(), triggered);
            println!(
                "Rejected: rate cap {}, spacing {}, same sample {}, voronoi {}, similar {}",
                stats.rate_cap, stats.spacing, stats.same_sample, stats.voronoi, stats.similar
            );
            println!(
                "Bridges: {}, cache hit rate {:.2}",
                stats.bridges,
                system.cache().hit_rate()
            );

            if let Some(wav) = wav {
                let spec = hound::WavSpec {
                    channels: 1,
                    sample_rate: renderer.sample_rate(),
                    bits_per_sample: 32,
                    sample_format: hound::SampleFormat::Float,
                };
                let mut writer = hound::WavWriter::create(&wav, spec)?;
                for sample in &mix {
                    writer.write_sample(*sample)?;
                }
                writer.finalize()?;
                info!(path = ?wav, frames = mix.len(), "Wrote scrub render");
            }
            system.shutdown();
        }
    }

    Ok(())
}
