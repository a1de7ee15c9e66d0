use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use env_logger::Builder as LogBuilder;
use log::LevelFilter;
use touchpipe::{
    chain::{parse_chain_file, validate_chain_config},
    mt::Quirk,
    Chain, ChainConfig, DeviceCaps, Frame, InputEvent, Normalizer, Protocol, ReadKind, ReadStatus,
    Sample, ScriptedEvents,
};

const TRACE_HEADER: &str = "ev,us,type,code,value";
const READ_BATCH: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ProtocolArg {
    Single,
    Slots,
    Anonymous,
}

#[derive(Debug, Parser)]
#[command(name = "touch_replay")]
#[command(about = "Replay a recorded evdev trace through a touch filter chain")]
struct Cli {
    /// CSV trace of `ev,<us>,<type>,<code>,<value>` lines.
    trace: PathBuf,
    /// Chain description (TOML). Without it samples come straight from the normalizer.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = ProtocolArg::Single)]
    protocol: ProtocolArg,
    /// The device has no pressure axis.
    #[arg(long)]
    no_pressure: bool,
    /// The device reports hover through the distance axis.
    #[arg(long)]
    egalax: bool,
    /// Read multitouch frames of this many slots instead of single samples.
    #[arg(long)]
    slots: Option<usize>,
    /// Expected output lines; the run fails on any difference.
    #[arg(long)]
    expect: Option<PathBuf>,
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let caps = DeviceCaps {
        protocol: match cli.protocol {
            ProtocolArg::Single => Protocol::SingleTouch,
            ProtocolArg::Slots => Protocol::ExplicitSlots,
            ProtocolArg::Anonymous => Protocol::Anonymous,
        },
        has_pressure: !cli.no_pressure,
        has_sync: true,
        quirk: if cli.egalax {
            Quirk::EgalaxV210
        } else {
            Quirk::None
        },
    };

    let events = parse_trace(&cli.trace, caps)?;
    let config = match &cli.config {
        Some(path) => {
            let config = parse_chain_file(path)
                .with_context(|| format!("failed to load chain config {}", path.display()))?;
            validate_chain_config(&config)
                .with_context(|| format!("invalid chain config {}", path.display()))?;
            config
        }
        None => ChainConfig::default(),
    };
    let mut chain = Chain::from_config(Box::new(Normalizer::new(events)), &config)
        .context("failed to build chain")?;
    log::info!(
        "chain: {}",
        chain.stage_names().collect::<Vec<_>>().join(" -> ")
    );

    let wanted = if cli.slots.is_some() {
        ReadKind::Multi
    } else {
        ReadKind::Single
    };
    if !chain.supports(wanted) {
        bail!("chain cannot serve {wanted}; drop single-touch stages or the --slots flag");
    }

    let lines = match cli.slots {
        Some(max_slots) => replay_frames(&mut chain, max_slots)?,
        None => replay_samples(&mut chain)?,
    };
    chain.close();

    match cli.slots {
        Some(_) => println!("contact,us,slot,tracking_id,x,y,pressure"),
        None => println!("sample,us,x,y,pressure"),
    }
    for line in &lines {
        println!("{line}");
    }

    if let Some(expect_path) = &cli.expect {
        let expected = parse_expected(expect_path)?;
        if expected != lines {
            eprintln!("expected:\n{}", expected.join("\n"));
            eprintln!("actual:\n{}", lines.join("\n"));
            bail!("output mismatch against {}", expect_path.display());
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    LogBuilder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .init();
}

fn replay_samples(chain: &mut Chain) -> Result<Vec<String>> {
    let mut out = [Sample::default(); READ_BATCH];
    let mut lines = Vec::new();
    loop {
        match chain.read(&mut out).context("chain read failed")? {
            ReadStatus::Ready(0) => return Ok(lines),
            ReadStatus::Ready(n) => {
                for sample in &out[..n] {
                    lines.push(format!(
                        "sample,{},{},{},{}",
                        sample.timestamp_us, sample.x, sample.y, sample.pressure
                    ));
                }
            }
            ReadStatus::NotReady => {}
        }
    }
}

fn replay_frames(chain: &mut Chain, max_slots: usize) -> Result<Vec<String>> {
    let mut frames = vec![Frame::default(); READ_BATCH];
    let mut lines = Vec::new();
    loop {
        match chain
            .read_mt(max_slots, &mut frames)
            .context("chain read_mt failed")?
        {
            ReadStatus::Ready(0) => return Ok(lines),
            ReadStatus::Ready(n) => {
                for frame in &frames[..n] {
                    if frame.degraded {
                        log::warn!("frame degraded by malformed slot data");
                    }
                    for slot in frame.valid_slots() {
                        lines.push(format!(
                            "contact,{},{},{},{},{},{}",
                            slot.timestamp_us,
                            slot.slot,
                            slot.tracking_id,
                            slot.x,
                            slot.y,
                            slot.pressure
                        ));
                    }
                }
            }
            ReadStatus::NotReady => {}
        }
    }
}

fn parse_trace(path: &Path, caps: DeviceCaps) -> Result<ScriptedEvents> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut events = ScriptedEvents::new(caps);
    for (line_no, line_result) in reader.lines().enumerate() {
        let line_no = line_no + 1;
        let line = line_result
            .with_context(|| format!("failed to read {}:{}", path.display(), line_no))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed == TRACE_HEADER {
            continue;
        }

        let parts: Vec<&str> = trimmed.split(',').map(str::trim).collect();
        if parts[0] != "ev" {
            continue;
        }
        if parts.len() != 5 {
            bail!(
                "{}:{} invalid trace line, expected 5 columns",
                path.display(),
                line_no
            );
        }

        let field = |idx: usize, name: &str| {
            format!("{}:{} invalid {} '{}'", path.display(), line_no, name, parts[idx])
        };
        let us: u64 = parts[1].parse().with_context(|| field(1, "us"))?;
        let ev_type: u16 = parts[2].parse().with_context(|| field(2, "type"))?;
        let code: u16 = parts[3].parse().with_context(|| field(3, "code"))?;
        let value: i32 = parts[4].parse().with_context(|| field(4, "value"))?;

        match InputEvent::from_raw(us, ev_type, code, value) {
            Some(event) => {
                events.push(event);
            }
            None => log::trace!("{}:{} ignored event {ev_type}/{code}", path.display(), line_no),
        }
    }

    Ok(events)
}

fn parse_expected(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut lines = Vec::new();
    for (line_no, line_result) in BufReader::new(file).lines().enumerate() {
        let line = line_result
            .with_context(|| format!("failed to read {}:{}", path.display(), line_no + 1))?;
        let token = line.trim();
        if token.is_empty() || token.starts_with('#') {
            continue;
        }
        lines.push(token.to_string());
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use touchpipe::{mt::Poll, EventSource};

    use super::*;

    fn trace(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn trace_lines_become_events() {
        let file = trace("ev,us,type,code,value\n# comment\nev,5,3,0,120\nev,5,4,4,9\nev,5,0,0,0\n");
        let mut events = parse_trace(file.path(), DeviceCaps::default()).unwrap();
        assert!(matches!(events.next_event().unwrap(), Poll::Event(_)));
        assert!(matches!(events.next_event().unwrap(), Poll::Event(_)));
        assert_eq!(events.next_event().unwrap(), Poll::End);
    }

    #[test]
    fn malformed_value_names_the_line() {
        let file = trace("ev,5,3,0,x\n");
        let err = parse_trace(file.path(), DeviceCaps::default()).unwrap_err();
        assert!(format!("{err:#}").contains(":1 invalid value"));
    }

    #[test]
    fn replays_single_touch_trace() {
        let file = trace("ev,0,3,0,10\nev,0,3,1,20\nev,0,3,24,50\nev,0,0,0,0\n");
        let events = parse_trace(file.path(), DeviceCaps::default()).unwrap();
        let mut chain = Chain::new(Box::new(Normalizer::new(events)));
        let lines = replay_samples(&mut chain).unwrap();
        assert_eq!(lines, ["sample,0,10,20,50"]);
    }
}
