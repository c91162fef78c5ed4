//! facelink CLI - stream, record, replay and bake face capture data.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use crossbeam::channel;
use rayon::prelude::*;

use facelink::{
    animation::{AnimationClip, BakeOptions, RecordingHeader, SampleRate, bake},
    schema::{FaceSample, FacelinkConfig, SharedLayout, SyntheticConfig, SyntheticFace},
    stream::{CaptureLoop, LinkStatus, LiveSnapshot, SampleSlot, codec},
    App, Mode, RecordedStream, Recorder,
};

#[derive(Parser)]
#[command(name = "facelink")]
#[command(author, version, about = "Real-time facial motion-capture streaming")]
struct Cli {
    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the default configuration as JSON
    Example,

    /// Stream a synthetic face to the configured peer
    Send {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<f32>,

        /// Synthetic generator seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Listen for a peer and print the live state
    Receive {
        /// Record everything received and save takes into this directory
        /// (overrides `recorder.output_dir`)
        #[arg(long)]
        record: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<f32>,
    },

    /// Record a synthetic take straight to a file
    Synth {
        /// Output `.fcr` file
        #[arg(required = true)]
        output: PathBuf,

        /// Number of frames
        #[arg(long, default_value = "600")]
        frames: usize,

        /// Synthetic generator seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Replay a recording through the decode path
    Play {
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Bake recordings into fixed-rate JSON clips
    Bake {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Target rate (24, 25, 30, 50 or 60); defaults to the config value
        #[arg(long)]
        rate: Option<u32>,

        /// Directory for the `.json` clips; defaults to next to each input
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Print a recording's header
    Info {
        #[arg(required = true)]
        file: PathBuf,
    },
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("Error {}: {}", context, err);
    std::process::exit(1);
}

fn load_config(path: Option<&Path>) -> FacelinkConfig {
    let config = match path {
        Some(path) => {
            let config_str =
                fs::read_to_string(path).unwrap_or_else(|e| fail("reading config file", e));
            serde_json::from_str(&config_str).unwrap_or_else(|e| fail("parsing config", e))
        }
        None => FacelinkConfig::default(),
    };
    if let Err(e) = config.validate() {
        fail("validating config", e);
    }
    config
}

fn print_example_config() {
    match serde_json::to_string_pretty(&FacelinkConfig::default()) {
        Ok(json) => println!("{}", json),
        Err(e) => fail("serializing config", e),
    }
}

fn until(seconds: Option<f32>) -> Option<Instant> {
    seconds.map(|s| Instant::now() + Duration::from_secs_f32(s.max(0.0)))
}

fn synthetic(config: &FacelinkConfig, seed: u64) -> SyntheticFace {
    SyntheticFace::new(SyntheticConfig {
        blend_shape_count: config.layout.blend_shape_count,
        seed,
        ..Default::default()
    })
}

fn run_send(config: &FacelinkConfig, seconds: Option<f32>, seed: u64) {
    let layout = SharedLayout::new(config.stream_layout().unwrap_or_else(|e| fail("building layout", e)));
    let slot = Arc::new(SampleSlot::new());
    let (events_tx, events_rx) = channel::unbounded();
    let mut capture = CaptureLoop::connect(&config.capture, layout, slot.clone(), events_tx)
        .unwrap_or_else(|e| fail(&format!("connecting to {}", config.capture.peer), e));

    let mut face = synthetic(config, seed);
    let mut sample = FaceSample::new(config.layout.blend_shape_count);
    let deadline = until(seconds);
    let interval = Duration::from_secs_f32(1.0 / 60.0);

    println!("Streaming synthetic face to {}", capture.peer());
    while capture.is_running() && deadline.is_none_or(|d| Instant::now() < d) {
        face.next_sample(&mut sample);
        slot.publish(&sample);
        for event in events_rx.try_iter() {
            println!("  {:?}", event);
        }
        thread::sleep(interval);
    }
    capture.stop();
    println!("Sent {} frames", capture.frames_sent());
}

fn run_receive(config: &FacelinkConfig, record: Option<PathBuf>, seconds: Option<f32>) {
    let record = record.or_else(|| config.recorder.output_dir.clone());
    let mut app = App::new(config.clone()).unwrap_or_else(|e| fail("creating app", e));
    let addr = app.listen().unwrap_or_else(|e| fail("binding listener", e));
    println!("Listening on {}", addr);

    let mut last_print = Instant::now();
    app.add_renderer(Box::new(move |snap: &LiveSnapshot| {
        if snap.sequence == 0 || last_print.elapsed() < Duration::from_millis(500) {
            return;
        }
        last_print = Instant::now();
        let peak = snap.blend_shapes.iter().copied().fold(0.0f32, f32::max);
        println!(
            "  frame {:?} t={:?} active={} peak={:.3} head={:?}",
            snap.frame_number, snap.frame_time, snap.tracking_active, peak, snap.head_pose.position
        );
    }));

    let deadline = until(seconds);
    while deadline.is_none_or(|d| Instant::now() < d) {
        app.tick(Instant::now());
        // a new take per peer; the app finishes the take when the peer goes away
        let streaming = matches!(app.status(), LinkStatus::Streaming(_));
        if record.is_some() && streaming && !app.recorder().is_recording() {
            match app.start_recording() {
                Ok(take) => println!("Recording take {}", take),
                Err(e) => eprintln!("Could not start recording: {}", e),
            }
        }
        thread::sleep(Duration::from_millis(16));
    }

    if let Some(dir) = record {
        if let Err(e) = app.finish_recording() {
            fail("finishing recording", e);
        }
        let written = app
            .recorder()
            .library()
            .save_all(&dir)
            .unwrap_or_else(|e| fail("saving takes", e));
        for path in written {
            println!("Saved {}", path.display());
        }
    }
    if let Some(receiver) = app.receiver() {
        let stats = receiver.stats();
        println!(
            "Applied {} frames ({} malformed, {} stale)",
            stats.applied, stats.malformed, stats.stale
        );
    }
}

fn run_synth(config: &FacelinkConfig, output: &Path, frames: usize, seed: u64) {
    let layout = config.stream_layout().unwrap_or_else(|e| fail("building layout", e));
    let recorder = Recorder::new(config.recorder.clone());
    let take = recorder.next_take_number();
    recorder
        .start_recording(&layout, take)
        .unwrap_or_else(|e| fail("starting recording", e));

    let mut face = synthetic(config, seed);
    let mut sample = FaceSample::new(layout.blend_shape_count);
    let mut frame = vec![0u8; layout.total_frame_size];
    for _ in 0..frames {
        face.next_sample(&mut sample);
        codec::encode(&sample, &layout, &mut frame).unwrap_or_else(|e| fail("encoding frame", e));
        recorder
            .add_data_to_recording(&frame, 0)
            .unwrap_or_else(|e| fail("recording frame", e));
    }

    match recorder.finish_recording() {
        Ok(Some(stream)) => {
            stream.save(output).unwrap_or_else(|e| fail("saving take", e));
            println!(
                "Wrote {} frames ({:.2}s) to {}",
                stream.frame_count(),
                stream.duration().unwrap_or(0.0),
                output.display()
            );
        }
        Ok(None) => println!("No frames recorded"),
        Err(e) => fail("finishing recording", e),
    }
}

fn run_play(config: &FacelinkConfig, file: &Path) {
    let stream = RecordedStream::open(file).unwrap_or_else(|e| fail("opening recording", e));
    let mut app = App::new(config.clone()).unwrap_or_else(|e| fail("creating app", e));
    app.add_renderer(Box::new(|snap: &LiveSnapshot| {
        let peak = snap.blend_shapes.iter().copied().fold(0.0f32, f32::max);
        println!(
            "  frame {:?} t={:?} peak={:.3} active={}",
            snap.frame_number, snap.frame_time, peak, snap.tracking_active
        );
    }));

    app.start_playback(Arc::new(stream), Instant::now())
        .unwrap_or_else(|e| fail("starting playback", e));
    while app.mode() == Mode::Playback {
        app.tick(Instant::now());
        thread::sleep(Duration::from_millis(16));
    }
    println!(
        "Played {} of {} frames",
        app.playback().current_frame().map_or(0, |i| i + 1),
        app.playback().frame_count()
    );
}

fn bake_file(file: &Path, options: &BakeOptions, out_dir: Option<&Path>) -> Result<PathBuf, String> {
    let stream = RecordedStream::open(file).map_err(|e| e.to_string())?;
    let mut clip = AnimationClip::new(stream.name());
    let report = bake(&stream, options, &mut clip).map_err(|e| e.to_string())?;

    let out = match out_dir {
        Some(dir) => dir.join(file.with_extension("json").file_name().unwrap_or_default()),
        None => file.with_extension("json"),
    };
    let json = serde_json::to_string_pretty(&clip).map_err(|e| e.to_string())?;
    fs::write(&out, json).map_err(|e| e.to_string())?;
    println!(
        "{}: {} keys at {} over {:.2}s ({} degenerate intervals)",
        file.display(),
        report.keyframes,
        options.rate,
        report.duration,
        report.degenerate_intervals
    );
    Ok(out)
}

fn run_bake(config: &FacelinkConfig, files: &[PathBuf], rate: Option<u32>, out_dir: Option<&Path>) {
    let rate = SampleRate::try_from(rate.unwrap_or(config.bake.rate_hz))
        .unwrap_or_else(|e| fail("choosing bake rate", e));
    let options = BakeOptions {
        rate,
        blend_shape_names: config.bake.blend_shape_names.clone(),
    };
    if let Some(dir) = out_dir {
        fs::create_dir_all(dir).unwrap_or_else(|e| fail("creating output directory", e));
    }

    let results: Vec<(PathBuf, Result<PathBuf, String>)> = files
        .par_iter()
        .map(|file| (file.clone(), bake_file(file, &options, out_dir)))
        .collect();

    let mut failed = 0;
    for (file, result) in results {
        match result {
            Ok(out) => println!("Wrote {}", out.display()),
            Err(e) => {
                eprintln!("Error baking {}: {}", file.display(), e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        std::process::exit(1);
    }
}

fn run_info(file: &Path) {
    let header = RecordingHeader::open(file).unwrap_or_else(|e| fail("reading header", e));
    println!("Recording: {}", header.name);
    println!("  Frames: {}", header.frame_count);
    println!("  Frame size: {} bytes", header.frame_size);
    println!("  Blend shapes: {}", header.blend_shape_count);
    println!("  Sentinel: {:#04x}", header.error_check_byte);
    println!(
        "  Fields: frame number={}, frame time={}, active flag={}",
        header.flags.frame_number, header.flags.frame_time, header.flags.active_flag
    );
    if header.flags.frame_time {
        match RecordedStream::open(file) {
            Ok(stream) => println!("  Duration: {:.3}s", stream.duration().unwrap_or(0.0)),
            Err(e) => eprintln!("  Frame data unreadable: {}", e),
        }
    }
}

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Commands::Example = cli.command {
        print_example_config();
        return;
    }

    let config = load_config(cli.config.as_deref());
    match cli.command {
        Commands::Example => {}
        Commands::Send { seconds, seed } => run_send(&config, seconds, seed),
        Commands::Receive { record, seconds } => run_receive(&config, record, seconds),
        Commands::Synth {
            output,
            frames,
            seed,
        } => run_synth(&config, &output, frames, seed),
        Commands::Play { file } => run_play(&config, &file),
        Commands::Bake {
            files,
            rate,
            out_dir,
        } => run_bake(&config, &files, rate, out_dir.as_deref()),
        Commands::Info { file } => run_info(&file),
    }
}
