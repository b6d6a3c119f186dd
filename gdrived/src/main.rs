use gdrive_core::validate_folder_id;
use gdrived::config::EngineConfig;
use gdrived::engine::copy::CopyRequest;
use gdrived::engine::dedupe::RemovalMode;
use gdrived::engine::task::ResumeChoice;
use gdrived::runtime::Engine;
use gdrived::shutdown;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage:
  gdrived count <folder> [--update]
  gdrived copy <source> [target] [--name NAME] [--min-size BYTES] [--update] [--restart|--exit]
  gdrived dedupe <folder> [--update] [--yes] [--delete]

  --update     ignore cached listings and crawl again
  --restart    discard progress of an existing copy task and start over
  --exit       do nothing if a copy task already exists
  --yes        remove the duplicates found (default: only report them)
  --delete     delete duplicates permanently instead of trashing them";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Count {
        folder: String,
        update: bool,
    },
    Copy {
        source: String,
        target: Option<String>,
        name: Option<String>,
        min_size: Option<u64>,
        update: bool,
        on_existing: ResumeChoice,
    },
    Dedupe {
        folder: String,
        update: bool,
        apply: bool,
        removal: RemovalMode,
    },
    Help,
}

fn parse_command<I>(args: I) -> anyhow::Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(command) = args.next() else {
        return Ok(Command::Help);
    };

    let mut positional = Vec::new();
    let mut update = false;
    let mut name = None;
    let mut min_size = None;
    let mut on_existing = ResumeChoice::Continue;
    let mut apply = false;
    let mut removal = RemovalMode::Trash;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(Command::Help),
            "--update" => update = true,
            "--restart" => on_existing = ResumeChoice::Restart,
            "--exit" => on_existing = ResumeChoice::Exit,
            "--yes" => apply = true,
            "--delete" => removal = RemovalMode::Delete,
            "--name" => {
                name = Some(
                    args.next()
                        .ok_or_else(|| anyhow::anyhow!("--name requires a value"))?,
                )
            }
            "--min-size" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--min-size requires a value"))?;
                min_size = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| anyhow::anyhow!("invalid --min-size: {value}"))?,
                );
            }
            other if other.starts_with('-') => anyhow::bail!("unknown argument: {other}"),
            _ => positional.push(arg),
        }
    }
    for id in &positional {
        if !validate_folder_id(id) {
            anyhow::bail!("invalid folder id: {id}");
        }
    }

    let mut positional = positional.into_iter();
    let parsed = match command.as_str() {
        "--help" | "-h" | "help" => Command::Help,
        "count" => Command::Count {
            folder: required(&mut positional, "folder id")?,
            update,
        },
        "copy" => Command::Copy {
            source: required(&mut positional, "source folder id")?,
            target: positional.next(),
            name,
            min_size,
            update,
            on_existing,
        },
        "dedupe" => Command::Dedupe {
            folder: required(&mut positional, "folder id")?,
            update,
            apply,
            removal,
        },
        other => anyhow::bail!("unknown command: {other}"),
    };
    if positional.next().is_some() {
        anyhow::bail!("too many arguments");
    }
    Ok(parsed)
}

fn required(args: &mut impl Iterator<Item = String>, what: &str) -> anyhow::Result<String> {
    args.next().ok_or_else(|| anyhow::anyhow!("missing {what}"))
}

async fn run_command(engine: &Engine, command: Command) -> anyhow::Result<serde_json::Value> {
    let value = match command {
        Command::Count { folder, update } => {
            serde_json::to_value(engine.count(&folder, update).await?)?
        }
        Command::Copy {
            source,
            target,
            name,
            min_size,
            update,
            on_existing,
        } => {
            let mut request = CopyRequest::new(source);
            request.target = target;
            request.name = name;
            request.min_size = min_size;
            request.force_refresh = update;
            request.on_existing = on_existing;
            serde_json::to_value(engine.copy(request).await?)?
        }
        Command::Dedupe {
            folder,
            update,
            apply,
            removal,
        } => {
            let removal = apply.then_some(removal);
            serde_json::to_value(engine.dedupe(&folder, update, removal).await?)?
        }
        Command::Help => serde_json::Value::Null,
    };
    Ok(value)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let command = parse_command(std::env::args())?;
    if command == Command::Help {
        println!("{USAGE}");
        return Ok(());
    }

    let config = EngineConfig::from_env()?;
    let grace = config.shutdown_grace;
    let cancel = CancellationToken::new();
    let engine = Engine::bootstrap(config, cancel.clone()).await?;
    let work = run_command(&engine, command);
    match shutdown::run_until(work, shutdown::ctrl_c(), grace, engine.tracker(), &cancel).await {
        Some(result) => {
            println!("{}", serde_json::to_string_pretty(&result?)?);
            Ok(())
        }
        None => anyhow::bail!("interrupted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<Command> {
        parse_command(
            std::iter::once("gdrived")
                .chain(args.iter().copied())
                .map(str::to_string),
        )
    }

    const SRC: &str = "1AbCdEfGhIjKlMnOp";
    const DST: &str = "0ZyXwVuTsRqPoNmLk";

    #[test]
    fn no_arguments_shows_help() {
        assert_eq!(parse(&[]).unwrap(), Command::Help);
        assert_eq!(parse(&["--help"]).unwrap(), Command::Help);
    }

    #[test]
    fn parses_count() {
        assert_eq!(
            parse(&["count", "root", "--update"]).unwrap(),
            Command::Count {
                folder: "root".to_string(),
                update: true
            }
        );
    }

    #[test]
    fn parses_copy_with_options() {
        assert_eq!(
            parse(&["copy", SRC, DST, "--name", "Backup", "--min-size", "1024", "--restart"]).unwrap(),
            Command::Copy {
                source: SRC.to_string(),
                target: Some(DST.to_string()),
                name: Some("Backup".to_string()),
                min_size: Some(1024),
                update: false,
                on_existing: ResumeChoice::Restart,
            }
        );
    }

    #[test]
    fn copy_target_is_optional() {
        let Command::Copy {
            target, on_existing, ..
        } = parse(&["copy", SRC]).unwrap()
        else {
            panic!("expected copy");
        };
        assert_eq!(target, None);
        assert_eq!(on_existing, ResumeChoice::Continue);
    }

    #[test]
    fn parses_dedupe() {
        assert_eq!(
            parse(&["dedupe", SRC, "--yes", "--delete"]).unwrap(),
            Command::Dedupe {
                folder: SRC.to_string(),
                update: false,
                apply: true,
                removal: RemovalMode::Delete,
            }
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["count"]).is_err());
        assert!(parse(&["count", "bad id!"]).is_err());
        assert!(parse(&["count", SRC, SRC]).is_err());
        assert!(parse(&["copy", SRC, "--min-size", "lots"]).is_err());
        assert!(parse(&["copy", SRC, "--name"]).is_err());
        assert!(parse(&["sync", SRC]).is_err());
        assert!(parse(&["count", SRC, "--verbose"]).is_err());
    }
}
