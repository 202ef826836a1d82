//! Text front end: stdin commands in, deck status lines out

use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use needle_core::controller::{RemoteCommand, Reply};
use needle_core::engine::{DeckAtomics, DeckStatus};
use needle_core::rig::Rig;

/// How often replies are flushed to stdout
const REPLY_TICK: Duration = Duration::from_millis(50);

enum Line {
    Skip,
    Command(RemoteCommand),
    Invalid(String),
}

fn classify(line: &str) -> Line {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Line::Skip;
    }
    match RemoteCommand::parse(line) {
        Ok(command) => Line::Command(command),
        Err(e) => Line::Invalid(format!("{}: {}", line, e)),
    }
}

/// Console thread body: forward stdin commands until EOF or `/quit`
pub fn run_console(rig: Arc<Rig>, commands: Sender<RemoteCommand>) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::warn!("Console read failed: {}", e);
                break;
            }
        };
        match classify(&line) {
            Line::Skip => {}
            Line::Invalid(reason) => {
                log::debug!("Rejected console input {}", reason);
                eprintln!("? {}", reason);
            }
            Line::Command(command) => {
                let quit = command == RemoteCommand::Quit;
                if commands.send(command).is_err() || quit {
                    break;
                }
            }
        }
        if rig.is_quit_requested() {
            return;
        }
    }
    log::info!("Console closed, quitting");
    rig.request_quit();
}

pub fn format_deck_line(deck: usize, atomics: &DeckAtomics) -> String {
    let status = atomics.status();
    if status != DeckStatus::Loaded {
        return format!("deck {}: {}", deck + 1, status.name());
    }

    let mut line = format!(
        "deck {}: {:>9.3}s / {:.1}s {} pitch {:+.3}",
        deck + 1,
        atomics.elapsed(),
        atomics.track_len() as f64 / atomics.track_rate().max(1) as f64,
        atomics.mode().name(),
        atomics.pitch(),
    );
    if atomics.is_resolved() {
        line.push_str(&format!(
            " needle {:+.3} ({:.0}%)",
            atomics.speed(),
            atomics.confidence() * 100.0
        ));
    } else {
        line.push_str(" needle lost");
    }
    if let Some(bpm) = atomics.bpm() {
        line.push_str(&format!(" {:.1}bpm", bpm));
    }
    line
}

/// Status thread body: print replies, log a line per deck every `interval`
pub fn run_status(rig: Arc<Rig>, replies: Receiver<Reply>, interval: Duration) {
    let shutdown = rig.shutdown_signal();
    let atomics: Vec<Arc<DeckAtomics>> = (0..rig.deck_count()).filter_map(|d| rig.atomics(d)).collect();
    let mut last = Instant::now();

    loop {
        for reply in replies.try_iter() {
            println!("{}", reply);
        }
        if last.elapsed() >= interval {
            for (deck, atomics) in atomics.iter().enumerate() {
                log::info!("{}", format_deck_line(deck, atomics));
            }
            let underruns = rig.underrun_count();
            if underruns > 0 {
                log::debug!("{} input frames missed so far", underruns);
            }
            last = Instant::now();
        }
        if shutdown.wait_timeout(REPLY_TICK) {
            break;
        }
    }
}
