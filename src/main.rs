use std::path::PathBuf;

use chrono::SecondsFormat;

enum Command {
    Run,
    Add(PathBuf),
    List,
}

fn main() {
    let (command, config_file) = match parse_args(std::env::args().skip(1)) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => return,
        Err(message) => {
            eprintln!("error: {message}");
            std::process::exit(2);
        }
    };

    let result = match command {
        Command::Run => story_reel::run(config_file),
        Command::Add(path) => story_reel::app::add(config_file, path).map(|story| {
            println!("{}", story.id);
        }),
        Command::List => story_reel::app::list(config_file).map(|stories| {
            for story in stories {
                let expires = story
                    .expires_at
                    .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_default();
                let marker = if story.is_viewed { "seen" } else { "new" };
                println!("{}\t{}\t{}", story.id, marker, expires);
            }
        }),
    };

    if let Err(err) = result {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// `Ok(None)` means an informational flag was handled and the process is done.
fn parse_args(
    mut args: impl Iterator<Item = String>,
) -> Result<Option<(Command, Option<PathBuf>)>, String> {
    let mut command = Command::Run;
    let mut config_file = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Story Reel {}", story_reel::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                println!(
                    "Story Reel: ephemeral image stories in the terminal.\n\n  --add <image>        Add an image as a new story and print its id\n  --list               List live stories, unseen first\n  --config <path>      Use this config file\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message"
                );
                return Ok(None);
            }
            "--add" => {
                let path = args.next().ok_or("--add needs an image path")?;
                command = Command::Add(PathBuf::from(path));
            }
            "--list" => command = Command::List,
            "--config" => {
                let path = args.next().ok_or("--config needs a path")?;
                config_file = Some(PathBuf::from(path));
            }
            other => return Err(format!("unknown argument {other:?}")),
        }
    }

    Ok(Some((command, config_file)))
}
