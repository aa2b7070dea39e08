// Cadenza generator: CLI entry point.
//
// Runs one generation session against the grammar-only reference model on a
// worker thread, feeds the streamed chunks into a playback schedule as they
// arrive, and prints a summary. With `--json` every event is printed as one
// JSON object per line, in playback order.
//
// Usage:
//   cargo run -p cadenza_decode --bin generate -- [--config FILE]
//     [--preset none|piano|orchestra|pop_rock] [--max-len N] [--temperature T]
//     [--top-p P] [--top-k K] [--seed N] [--yield-every N] [--eos-after N]
//     [--allow-control-change] [--strict] [--json]
//
// Logging goes through `tracing`; set RUST_LOG=debug to see dropped tokens.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use cadenza_decode::{
    Decoder, GenerationConfig, GenerationUpdate, GrammarModel, InstrumentPreset, spawn_generation,
};
use cadenza_tokens::{PlaybackSchedule, Vocabulary};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = build_config(&args);
    let json_out = args.iter().any(|a| a == "--json");
    let eos_after: usize = parse_flag(&args, "--eos-after").unwrap_or(128);

    if let Err(e) = config.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    println!("=== Cadenza Generator ===");
    println!("Preset: {}", config.instrument_preset);
    println!("Max length: {} tokens", config.max_sequence_length);
    println!(
        "Sampling: temperature {}, top-p {}, top-k {}",
        config.temperature, config.top_p, config.top_k
    );
    println!("Seed: {}", config.seed);
    println!();

    let vocab = Arc::new(Vocabulary::midi());
    println!(
        "Vocabulary: {} ids, compound tokens of {} slots",
        vocab.vocab_size(),
        vocab.max_token_seq()
    );

    let decoder = match Decoder::new(Arc::clone(&vocab), config) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to create decoder: {e}");
            std::process::exit(1);
        }
    };
    let model = GrammarModel::new(Arc::clone(&vocab)).with_eos_after(eos_after);
    let handle = match spawn_generation(decoder, model) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Failed to start generation: {e}");
            std::process::exit(1);
        }
    };

    let mut schedule = PlaybackSchedule::new();
    let mut chunks = 0usize;
    for update in handle.iter() {
        match update {
            GenerationUpdate::Chunk(chunk) => {
                chunks += 1;
                schedule.enqueue(chunk.tracks);
            }
            GenerationUpdate::Progress { history_len } => {
                if history_len % 64 == 0 {
                    println!("  ... {history_len} tokens");
                }
            }
        }
    }

    let (decoder, reason) = match handle.join() {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Generation failed: {e}");
            std::process::exit(1);
        }
    };

    let stats = decoder.stats();
    println!();
    println!("Finished: {reason:?}");
    println!(
        "Tokens: {} generated, {} in history, {} chunks streamed",
        decoder.generated(),
        decoder.history().len(),
        chunks
    );
    println!(
        "Detokenized: {} accepted, {} dropped, {} notes trimmed, {} notes removed",
        stats.accepted,
        stats.dropped(),
        stats.notes_trimmed,
        stats.notes_removed
    );

    // Play the schedule out instantly: everything is due at the end of time.
    let events = schedule.drain_due(f64::MAX);
    let mut per_track: BTreeMap<u32, usize> = BTreeMap::new();
    for (track, _) in &events {
        *per_track.entry(*track).or_default() += 1;
    }
    for (track, count) in &per_track {
        println!("  track {track}: {count} events");
    }
    if let Some((_, last)) = events.last() {
        let secs = schedule.ticks_to_millis(last.tick()) as f64 / 1000.0;
        println!("Length: ~{secs:.1}s at final tempo {:.0} BPM", schedule.bpm());
    }

    if json_out {
        for (track, event) in &events {
            println!(
                "{}",
                json!({ "track": track, "name": event.name, "parameters": event.parameters })
            );
        }
    }
}

/// Defaults, then the `--config` file, then individual flags.
fn build_config(args: &[String]) -> GenerationConfig {
    let mut config = match parse_flag::<String>(args, "--config") {
        Some(path) => match GenerationConfig::load(Path::new(&path)) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config {path}: {e}");
                std::process::exit(1);
            }
        },
        None => GenerationConfig::default(),
    };

    if let Some(name) = parse_flag::<String>(args, "--preset") {
        config.instrument_preset = name.parse().unwrap_or_else(|e| {
            eprintln!("{e}. Using {}.", InstrumentPreset::default());
            InstrumentPreset::default()
        });
    }
    if let Some(n) = parse_flag(args, "--max-len") {
        config.max_sequence_length = n;
    }
    if let Some(t) = parse_flag(args, "--temperature") {
        config.temperature = t;
    }
    if let Some(p) = parse_flag(args, "--top-p") {
        config.top_p = p;
    }
    if let Some(k) = parse_flag(args, "--top-k") {
        config.top_k = k;
    }
    if let Some(s) = parse_flag(args, "--seed") {
        config.seed = s;
    }
    if let Some(n) = parse_flag(args, "--yield-every") {
        config.yield_every = n;
    }
    if args.iter().any(|a| a == "--allow-control-change") {
        config.disable_control_change = false;
    }
    if args.iter().any(|a| a == "--strict") {
        config.strict_fields = true;
    }
    config
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
