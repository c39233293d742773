//! Line-oriented console: prints pipeline events and reads commands from stdin.

use ripline::{Command, EncodeQueue, PipelineEvent};
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const HELP: &str = "commands: p pause | r resume | s stop | d delete | c clear finished | f retry failed | \
m scan for missing | x cancel disc and eject | t <ids> select titles | l list queue | q quit";

/// What one line of input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Send(Command),
    ListQueue,
    Help,
    Quit,
}

fn parse_input(line: &str) -> Option<Input> {
    let mut words = line.split_whitespace();
    let head = words.next()?;
    let input = match head {
        "p" | "pause" => Input::Send(Command::Pause),
        "r" | "resume" => Input::Send(Command::Resume),
        "s" | "stop" => Input::Send(Command::Stop),
        "d" | "delete" => Input::Send(Command::Delete),
        "c" | "clear" => Input::Send(Command::ClearCompleted),
        "f" | "retry" => Input::Send(Command::RetryFailed),
        "m" | "missing" => Input::Send(Command::ScanForMissing),
        "x" | "eject" => Input::Send(Command::CancelAndEject),
        "t" | "titles" => {
            let ids: Result<Vec<u32>, _> = words
                .flat_map(|w| w.split(','))
                .filter(|w| !w.is_empty())
                .map(str::parse)
                .collect();
            Input::Send(Command::SelectTitles(ids.ok()?))
        }
        "l" | "list" => Input::ListQueue,
        "h" | "help" | "?" => Input::Help,
        "q" | "quit" => Input::Quit,
        _ => return None,
    };
    Some(input)
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Turns events into printable lines, throttling progress to 10% steps.
#[derive(Default)]
struct Printer {
    last_rip: Option<(u32, u64)>,
    last_encode: Option<(String, u64)>,
}

impl Printer {
    fn format(&mut self, event: &PipelineEvent) -> Option<String> {
        match event {
            PipelineEvent::DiscInserted { device } => Some(format!("Disc inserted in {}", device.display())),
            PipelineEvent::ScanStatus(msg) => Some(format!("  {}", msg)),
            PipelineEvent::ScanComplete {
                disc_name,
                kind,
                titles,
                selected,
            } => {
                let mut out = format!("Scanned {} ({}): {} title(s)", disc_name, kind, titles.len());
                if !selected.is_empty() {
                    out.push_str(&format!(", ripping {:?}", selected));
                }
                Some(out)
            }
            PipelineEvent::TitleSelectionRequired { disc_name, titles } => {
                let mut out = format!("No titles matched automatically on {}. Pick with 't <ids>':", disc_name);
                for t in titles {
                    out.push_str(&format!(
                        "\n  [{}] {} {} ({} chapters)",
                        t.id,
                        format_duration(t.duration),
                        t.name,
                        t.chapters
                    ));
                }
                Some(out)
            }
            PipelineEvent::RipProgress {
                title_id,
                index,
                count,
                percent,
            } => {
                let step = (*percent / 10.0).floor() as u64;
                if self.last_rip == Some((*title_id, step)) {
                    return None;
                }
                self.last_rip = Some((*title_id, step));
                Some(format!("Ripping title {} ({}/{}): {:.0}%", title_id, index, count, percent))
            }
            PipelineEvent::RipComplete {
                disc_name,
                titles,
                kind,
            } => Some(format!("Rip complete: {} ({}), {} title(s) queued", disc_name, kind, titles)),
            PipelineEvent::EncodeProgress { id, name, percent } => {
                let step = (*percent / 10.0).floor() as u64;
                let key = (id.clone(), step);
                if self.last_encode.as_ref() == Some(&key) {
                    return None;
                }
                self.last_encode = Some(key);
                Some(format!("Encoding {}: {:.1}%", name, percent))
            }
            PipelineEvent::EncodeComplete { name, kind, .. } => Some(format!("Encode complete: {} ({})", name, kind)),
            PipelineEvent::Error { operation, message } => Some(format!("ERROR {}: {}", operation, message)),
            PipelineEvent::LogLine(_) => None,
        }
    }
}

async fn print_events(mut rx: broadcast::Receiver<PipelineEvent>) {
    let mut printer = Printer::default();
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = printer.format(&event) {
                    println!("{}", line);
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => debug!(skipped = n, "Console lagged"),
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn print_queue(queue: &EncodeQueue) {
    let items = queue.items();
    if items.is_empty() {
        println!("Queue is empty");
        return;
    }
    for item in items {
        let mut line = format!("  {:<8} {:>5.1}%  {}", item.status, item.progress, item.title_name);
        if let Some(err) = &item.error {
            line.push_str(&format!("  ({})", err));
        }
        println!("{}", line);
    }
}

/// Lines from stdin, read on a detached thread.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn read_commands(commands: mpsc::Sender<Command>, queue: Arc<EncodeQueue>, shutdown: CancellationToken) {
    let mut lines = spawn_stdin_reader();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return,
            line = lines.recv() => match line {
                Some(line) => line,
                None => return,
            },
        };
        match parse_input(&line) {
            Some(Input::Send(cmd)) => {
                if commands.send(cmd).await.is_err() {
                    return;
                }
            }
            Some(Input::ListQueue) => print_queue(&queue),
            Some(Input::Help) => println!("{}", HELP),
            Some(Input::Quit) => {
                shutdown.cancel();
                return;
            }
            None if line.trim().is_empty() => {}
            None => println!("unknown command; {}", HELP),
        }
    }
}

/// Start the console tasks.
pub fn spawn(
    events: broadcast::Receiver<PipelineEvent>,
    commands: mpsc::Sender<Command>,
    queue: Arc<EncodeQueue>,
    shutdown: CancellationToken,
) {
    println!("{}", HELP);
    tokio::spawn(print_events(events));
    tokio::spawn(read_commands(commands, queue, shutdown));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripline::{DiscKind, Title};
    use std::time::Duration;

    #[test]
    fn test_single_letter_commands() {
        assert_eq!(parse_input("p"), Some(Input::Send(Command::Pause)));
        assert_eq!(parse_input(" r "), Some(Input::Send(Command::Resume)));
        assert_eq!(parse_input("d"), Some(Input::Send(Command::Delete)));
        assert_eq!(parse_input("x"), Some(Input::Send(Command::CancelAndEject)));
        assert_eq!(parse_input("q"), Some(Input::Quit));
        assert_eq!(parse_input("zzz"), None);
        assert_eq!(parse_input(""), None);
    }

    #[test]
    fn test_title_selection() {
        assert_eq!(parse_input("t 1 3,4"), Some(Input::Send(Command::SelectTitles(vec![1, 3, 4]))));
        assert_eq!(parse_input("t"), Some(Input::Send(Command::SelectTitles(vec![]))));
        assert_eq!(parse_input("t 1 x"), None);
    }

    #[test]
    fn test_progress_is_throttled() {
        let mut printer = Printer::default();
        let progress = |percent| PipelineEvent::EncodeProgress {
            id: "a".into(),
            name: "t00.mkv".into(),
            percent,
        };
        assert!(printer.format(&progress(1.0)).is_some());
        assert!(printer.format(&progress(5.0)).is_none());
        assert!(printer.format(&progress(12.0)).is_some());
        assert!(printer.format(&PipelineEvent::LogLine("noise".into())).is_none());
    }

    #[test]
    fn test_selection_prompt_lists_titles() {
        let mut printer = Printer::default();
        let line = printer
            .format(&PipelineEvent::TitleSelectionRequired {
                disc_name: "Odds".into(),
                titles: vec![Title {
                    id: 2,
                    name: "Bonus".into(),
                    duration: Duration::from_secs(5 * 60 + 7),
                    size_bytes: 0,
                    chapters: 3,
                }],
            })
            .unwrap();
        assert!(line.contains("[2] 0:05:07 Bonus (3 chapters)"));

        let done = printer
            .format(&PipelineEvent::RipComplete {
                disc_name: "Odds".into(),
                titles: 1,
                kind: DiscKind::Dvd,
            })
            .unwrap();
        assert_eq!(done, "Rip complete: Odds (DVD), 1 title(s) queued");
    }
}
