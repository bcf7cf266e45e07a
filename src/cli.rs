use anyhow::{anyhow, bail, Context, Result};
use podsmith::{
    backup,
    config::{
        backups_dir, base_data_dir, config_path, log_path, name_cache_path, notes_path, AppConfig,
    },
    logging, CopyRequest, CopyResult, LoadOutcome, LoadProgress, Podsmith, ResolvedCharacter,
    SettingsKind, SettingsRoot, SkipReason,
};
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    sync::mpsc,
    time::UNIX_EPOCH,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct CopyArgs {
    kind: SettingsKind,
    from: u64,
    to: Vec<u64>,
    create_missing: bool,
}

#[derive(Debug, PartialEq, Eq)]
struct NoteArgs {
    kind: SettingsKind,
    identity: u64,
    /// `None` prints the note; `Some("")` clears it.
    text: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    List,
    Roots,
    Copy(CopyArgs),
    Backup(PathBuf),
    Backups,
    Restore {
        archive: PathBuf,
        into: Option<PathBuf>,
    },
    Note(NoteArgs),
    Paths,
    Help,
    Version,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, format) = parse_args(&args)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("Podsmith v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let data_dir = base_data_dir()?;
            logging::init(&log_path(&data_dir))?;
            let config = AppConfig::load_or_create_in(&data_dir)?;
            let app = Podsmith::open(config, &data_dir);
            run_command(&app, &data_dir, command, format)
        }
    }
}

fn parse_args(args: &[String]) -> Result<(CliCommand, OutputFormat)> {
    if matches!(args.first().map(|s| s.as_str()), None | Some("--help" | "-h" | "help")) {
        return Ok((CliCommand::Help, OutputFormat::Text));
    }
    if matches!(args.first().map(|s| s.as_str()), Some("--version" | "-V" | "version")) {
        return Ok((CliCommand::Version, OutputFormat::Text));
    }

    let (format, tokens) = parse_global_options(args);
    let Some(head) = tokens.first() else {
        return Ok((CliCommand::Help, format));
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    let command = match head.as_str() {
        "list" => CliCommand::List,
        "roots" => CliCommand::Roots,
        "copy" => CliCommand::Copy(parse_copy(rest)?),
        "backup" => {
            let dir = rest
                .first()
                .ok_or_else(|| anyhow!("backup requires a settings folder"))?;
            CliCommand::Backup(PathBuf::from(dir))
        }
        "backups" => CliCommand::Backups,
        "restore" => parse_restore(rest)?,
        "note" => CliCommand::Note(parse_note(rest)?),
        "paths" => CliCommand::Paths,
        other => bail!("Unknown command: {other} (see 'podsmith --help')"),
    };
    Ok((command, format))
}

fn parse_global_options(args: &[String]) -> (OutputFormat, Vec<String>) {
    let mut format = OutputFormat::Text;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            if let Some(parsed) = OutputFormat::parse(value) {
                format = parsed;
            }
            continue;
        }
        if arg == "--format" {
            if let Some(value) = iter.next() {
                if let Some(parsed) = OutputFormat::parse(value) {
                    format = parsed;
                }
            }
            continue;
        }
        tokens.push(arg.to_string());
    }
    (format, tokens)
}

fn parse_copy(args: &[String]) -> Result<CopyArgs> {
    let mut kind = None;
    let mut from = None;
    let mut to = Vec::new();
    let mut create_missing = false;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let mut value = |name: &str| -> Result<String> {
            inline
                .clone()
                .or_else(|| iter.next().cloned())
                .ok_or_else(|| anyhow!("{name} requires a value"))
        };
        match flag {
            "--kind" => {
                let raw = value("--kind")?;
                kind = Some(
                    SettingsKind::parse(&raw)
                        .ok_or_else(|| anyhow!("Unknown kind: {raw} (use 'char' or 'user')"))?,
                );
            }
            "--from" => from = Some(parse_identity(&value("--from")?)?),
            "--to" => {
                for part in value("--to")?.split(',').filter(|part| !part.trim().is_empty()) {
                    to.push(parse_identity(part)?);
                }
            }
            "--create-missing" => create_missing = true,
            other => bail!("Unknown copy option: {other}"),
        }
    }

    let from = from.ok_or_else(|| anyhow!("copy requires --from <id>"))?;
    if to.is_empty() {
        bail!("copy requires --to <id>[,<id>...]");
    }
    Ok(CopyArgs {
        kind: kind.unwrap_or(SettingsKind::Character),
        from,
        to,
        create_missing,
    })
}

fn parse_restore(args: &[String]) -> Result<CliCommand> {
    let mut archive = None;
    let mut into = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--into=") {
            into = Some(PathBuf::from(value));
        } else if arg == "--into" {
            let value = iter.next().ok_or_else(|| anyhow!("--into requires a folder"))?;
            into = Some(PathBuf::from(value));
        } else if archive.is_none() {
            archive = Some(PathBuf::from(arg));
        } else {
            bail!("Unexpected argument: {arg}");
        }
    }
    Ok(CliCommand::Restore {
        archive: archive.ok_or_else(|| anyhow!("restore requires a backup archive"))?,
        into,
    })
}

fn parse_note(args: &[String]) -> Result<NoteArgs> {
    let mut kind = SettingsKind::Character;
    let mut identity = None;
    let mut words: Vec<&str> = Vec::new();
    let mut clear = false;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let raw_kind = match arg.strip_prefix("--kind=") {
            Some(value) => Some(value),
            None if arg == "--kind" => Some(
                iter.next()
                    .map(String::as_str)
                    .ok_or_else(|| anyhow!("--kind requires a value"))?,
            ),
            None => None,
        };
        if let Some(raw) = raw_kind {
            kind = SettingsKind::parse(raw)
                .ok_or_else(|| anyhow!("Unknown kind: {raw} (use 'char' or 'user')"))?;
        } else if arg == "--clear" {
            clear = true;
        } else if identity.is_none() {
            identity = Some(parse_identity(arg)?);
        } else {
            words.push(arg.as_str());
        }
    }

    let identity = identity.ok_or_else(|| anyhow!("note requires a character or account id"))?;
    if clear && !words.is_empty() {
        bail!("note takes either --clear or a note text, not both");
    }
    let text = if clear {
        Some(String::new())
    } else if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    };
    Ok(NoteArgs {
        kind,
        identity,
        text,
    })
}

fn parse_identity(value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .with_context(|| format!("not a character or account id: {value}"))
}

fn run_command(
    app: &Podsmith,
    data_dir: &Path,
    command: CliCommand,
    format: OutputFormat,
) -> Result<()> {
    match command {
        CliCommand::List => {
            let outcome = load_characters(app, format)?;
            list_characters(app, &outcome, format)
        }
        CliCommand::Roots => list_roots(&app.detect_roots(), format),
        CliCommand::Copy(args) => copy_settings(app, args, format),
        CliCommand::Backup(profile) => {
            let summary = backup::create_backup(&profile, &backups_dir(data_dir))?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Text => println!(
                    "Backed up {} file(s) ({}) to {}",
                    summary.files,
                    format_size(summary.bytes),
                    summary.archive.display()
                ),
            }
            Ok(())
        }
        CliCommand::Backups => list_backups(data_dir, format),
        CliCommand::Restore { archive, into } => restore(app, &archive, into.as_deref(), format),
        CliCommand::Note(args) => note(app, args, format),
        CliCommand::Paths => list_paths(app, data_dir, format),
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

enum LoadMessage {
    Progress(LoadProgress),
    Finished(Result<LoadOutcome, podsmith::LoadError>),
}

fn load_characters(app: &Podsmith, format: OutputFormat) -> Result<LoadOutcome> {
    let (tx, rx) = mpsc::channel();
    let progress_tx = tx.clone();
    let handle = app.load_async(
        move |progress| {
            let _ = progress_tx.send(LoadMessage::Progress(progress));
        },
        move |result| {
            let _ = tx.send(LoadMessage::Finished(result));
        },
    );

    for message in rx {
        match message {
            LoadMessage::Progress(progress) => {
                if format == OutputFormat::Text {
                    report_progress(&progress);
                }
            }
            LoadMessage::Finished(result) => {
                handle.join();
                return Ok(result?);
            }
        }
    }
    bail!("load stopped without a result")
}

fn report_progress(progress: &LoadProgress) {
    match progress {
        LoadProgress::RootsDiscovered { roots } => {
            eprintln!("Found {roots} settings folder(s)");
        }
        LoadProgress::Preliminary(list) => {
            eprintln!("Resolving names for {} entr(ies)...", list.len());
        }
        LoadProgress::NamesResolved(report) if report.unresolved > 0 => {
            eprintln!("{} name(s) could not be resolved", report.unresolved);
        }
        _ => {}
    }
}

#[derive(Serialize)]
struct CharacterItem {
    identity: u64,
    name: String,
    resolved: bool,
    last_modified: i64,
    character_profiles: Vec<String>,
    account_profiles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl CharacterItem {
    fn from_character(character: &ResolvedCharacter, note: Option<String>) -> Self {
        let labels = |kind: SettingsKind| -> Vec<String> {
            character
                .files(kind)
                .iter()
                .map(|instance| instance.root.label())
                .collect()
        };
        Self {
            identity: character.identity,
            name: character.display_name(),
            resolved: character.name.as_resolved().is_some(),
            last_modified: character
                .last_modified
                .duration_since(UNIX_EPOCH)
                .map(|age| age.as_secs() as i64)
                .unwrap_or(0),
            character_profiles: labels(SettingsKind::Character),
            account_profiles: labels(SettingsKind::Account),
            note,
        }
    }
}

fn list_characters(app: &Podsmith, outcome: &LoadOutcome, format: OutputFormat) -> Result<()> {
    let items: Vec<CharacterItem> = outcome
        .characters
        .iter()
        .map(|character| CharacterItem::from_character(character, app.note_for(character)))
        .collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No character settings found.");
                return Ok(());
            }
            for item in items {
                let profiles = if item.character_profiles.is_empty() {
                    format!("account only: {}", item.account_profiles.join(", "))
                } else {
                    item.character_profiles.join(", ")
                };
                println!(
                    "{date} {id:>12}  {name:<37} {profiles}",
                    date = format_timestamp(item.last_modified),
                    id = item.identity,
                    name = item.name
                );
                if let Some(note) = &item.note {
                    println!("{:>30}  note: {note}", "");
                }
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct NoteItem {
    kind: SettingsKind,
    identity: u64,
    note: Option<String>,
}

fn note(app: &Podsmith, args: NoteArgs, format: OutputFormat) -> Result<()> {
    if let Some(text) = &args.text {
        app.set_note(args.kind, args.identity, text)?;
    }
    let item = NoteItem {
        kind: args.kind,
        identity: args.identity,
        note: app.notes().get(args.kind, args.identity),
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&item)?),
        OutputFormat::Text => match &item.note {
            Some(note) => println!("{} {}: {note}", item.kind, item.identity),
            None => println!("No note for {} {}", item.kind, item.identity),
        },
    }
    Ok(())
}

#[derive(Serialize)]
struct RootItem {
    platform: &'static str,
    server: String,
    profile: String,
    path: String,
    exists: bool,
}

fn list_roots(roots: &[SettingsRoot], format: OutputFormat) -> Result<()> {
    let items: Vec<RootItem> = roots
        .iter()
        .map(|root| RootItem {
            platform: root.platform.as_str(),
            server: root.server.clone(),
            profile: root.profile.clone(),
            path: root.path.display().to_string(),
            exists: root.exists,
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No EVE settings folders found.");
            }
            for item in items {
                let marker = if item.exists { "x" } else { " " };
                println!(
                    "[{marker}] {platform:<7} {server}/{profile:<16} {path}",
                    platform = item.platform,
                    server = item.server,
                    profile = item.profile,
                    path = item.path
                );
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct CopyTargetItem {
    target: u64,
    succeeded: Vec<String>,
    skipped: Vec<(String, SkipReason)>,
    failed: Vec<(String, String)>,
}

fn copy_settings(app: &Podsmith, args: CopyArgs, format: OutputFormat) -> Result<()> {
    app.load_blocking()?;
    let mut options = app.config().copy;
    options.create_missing |= args.create_missing;
    let request = CopyRequest::new(args.from, args.to, args.kind);
    let result = app.copy_with(&request, options)?;

    let items = copy_items(&result);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Text => {
            let names = names_by_id(app);
            println!(
                "Copying {} settings from {}",
                result.kind,
                display_name(&names, result.source)
            );
            for item in &items {
                println!("  -> {}", display_name(&names, item.target));
                for label in &item.succeeded {
                    println!("     [ok]   {label}");
                }
                for (label, reason) in &item.skipped {
                    println!("     [skip] {label} ({})", skip_reason_text(*reason));
                }
                for (label, error) in &item.failed {
                    println!("     [fail] {label}: {error}");
                }
            }
        }
    }

    let failed = result.failed();
    if failed > 0 {
        bail!("{failed} settings file(s) could not be written");
    }
    Ok(())
}

fn copy_items(result: &CopyResult) -> Vec<CopyTargetItem> {
    result
        .targets
        .iter()
        .map(|outcome| CopyTargetItem {
            target: outcome.target,
            succeeded: outcome.succeeded.iter().map(|root| root.label()).collect(),
            skipped: outcome
                .skipped
                .iter()
                .map(|(root, reason)| (root.label(), *reason))
                .collect(),
            failed: outcome
                .failed
                .iter()
                .map(|(root, failure)| (root.label(), failure.to_string()))
                .collect(),
        })
        .collect()
}

fn names_by_id(app: &Podsmith) -> Vec<(u64, String)> {
    app.characters()
        .iter()
        .map(|character| (character.identity, character.display_name()))
        .collect()
}

fn display_name(names: &[(u64, String)], identity: u64) -> String {
    names
        .iter()
        .find(|(id, _)| *id == identity)
        .map(|(_, name)| format!("{name} ({identity})"))
        .unwrap_or_else(|| identity.to_string())
}

fn skip_reason_text(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::NoTargetFile => "target has no file here",
        SkipReason::NoSourceFile => "source has no file here",
        SkipReason::SameAsSource => "same as source",
    }
}

fn list_backups(data_dir: &Path, format: OutputFormat) -> Result<()> {
    let backups = backup::list_backups(&backups_dir(data_dir))?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&backups)?),
        OutputFormat::Text => {
            if backups.is_empty() {
                println!("No backups yet.");
                return Ok(());
            }
            for item in &backups {
                println!(
                    "{date} {size:>9}  {name}",
                    date = format_timestamp(item.created as i64),
                    size = format_size(item.size),
                    name = item.file_name
                );
            }
            let stats = backup::backup_stats(&backups);
            println!(
                "{} backup(s), {} total",
                stats.count,
                format_size(stats.total_bytes)
            );
        }
    }
    Ok(())
}

fn restore(
    app: &Podsmith,
    archive: &Path,
    into: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let dest_base = match into {
        Some(dir) => dir.parent().map(Path::to_path_buf).unwrap_or_default(),
        None => app
            .detect_roots()
            .iter()
            .find(|root| root.exists)
            .and_then(|root| root.path.parent().map(Path::to_path_buf))
            .ok_or_else(|| anyhow!("no settings folder found to restore next to; use --into"))?,
    };
    let summary = backup::restore_backup(archive, &dest_base, into)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => {
            println!(
                "Restored {} file(s) to {}",
                summary.files,
                summary.destination.display()
            );
            if summary.refused > 0 {
                println!("Skipped {} unsafe entr(ies)", summary.refused);
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PathsOutput {
    data_dir: String,
    config: String,
    name_cache: String,
    notes: String,
    backups: String,
    log: String,
    custom_paths: Vec<String>,
}

fn list_paths(app: &Podsmith, data_dir: &Path, format: OutputFormat) -> Result<()> {
    let output = PathsOutput {
        data_dir: data_dir.display().to_string(),
        config: config_path(data_dir).display().to_string(),
        name_cache: name_cache_path(data_dir).display().to_string(),
        notes: notes_path(data_dir).display().to_string(),
        backups: backups_dir(data_dir).display().to_string(),
        log: log_path(data_dir).display().to_string(),
        custom_paths: app
            .config()
            .custom_paths
            .iter()
            .map(|path| path.display().to_string())
            .collect(),
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("Data dir: {}", output.data_dir);
            println!("Config: {}", output.config);
            println!("Name cache: {}", output.name_cache);
            println!("Notes: {}", output.notes);
            println!("Backups: {}", output.backups);
            println!("Log: {}", output.log);
            for path in &output.custom_paths {
                println!("Custom path: {path}");
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!("Podsmith v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  podsmith list                        List characters, most recently played first");
    println!("  podsmith roots                       Show detected settings folders");
    println!("  podsmith copy --from <id> --to <id>[,<id>...] [--kind char|user] [--create-missing]");
    println!("                                       Copy settings from one character/account to others");
    println!("  podsmith backup <settings folder>    Zip a settings folder");
    println!("  podsmith backups                     List backups");
    println!("  podsmith restore <archive> [--into <folder>]");
    println!("                                       Restore a backup into a new or existing folder");
    println!("  podsmith note <id> [--kind char|user] [<text>... | --clear]");
    println!("                                       Show, set or clear a character/account note");
    println!("  podsmith paths                       Show data paths");
    println!();
    println!("Global options:");
    println!("  --format <json|text>                 Output format");
    println!("  -h, --help                           Show help");
    println!("  -V, --version                        Show version");
    println!();
    println!("Logging:");
    println!("  {}=<filter>                  Log filter for the log file (default: info)", logging::LOG_ENV);
}

fn format_timestamp(timestamp: i64) -> String {
    if timestamp <= 0 {
        return "---------- -----".to_string();
    }
    match time::OffsetDateTime::from_unix_timestamp(timestamp) {
        Ok(date) => format!(
            "{:04}-{:02}-{:02} {:02}:{:02}",
            date.year(),
            date.month() as u8,
            date.day(),
            date.hour(),
            date.minute()
        ),
        Err(_) => "---------- -----".to_string(),
    }
}

fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let bytes = bytes as f64;
    if bytes >= KIB * KIB {
        format!("{:.1} MB", bytes / (KIB * KIB))
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes / KIB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn no_arguments_shows_help() {
        assert_eq!(parse_args(&[]).expect("parse").0, CliCommand::Help);
    }

    #[test]
    fn copy_accepts_lists_and_inline_values() {
        let (command, format) = parse_args(&args(&[
            "copy",
            "--kind=user",
            "--from",
            "100",
            "--to",
            "200,300",
            "--to=400",
            "--format",
            "json",
        ]))
        .expect("parse");

        assert_eq!(format, OutputFormat::Json);
        assert_eq!(
            command,
            CliCommand::Copy(CopyArgs {
                kind: SettingsKind::Account,
                from: 100,
                to: vec![200, 300, 400],
                create_missing: false,
            })
        );
    }

    #[test]
    fn copy_requires_source_and_targets() {
        assert!(parse_args(&args(&["copy", "--to", "2"])).is_err());
        assert!(parse_args(&args(&["copy", "--from", "1"])).is_err());
        assert!(parse_args(&args(&["copy", "--from", "x", "--to", "2"])).is_err());
        assert!(parse_args(&args(&["copy", "--from", "1", "--to", "2", "--kind", "ship"])).is_err());
    }

    #[test]
    fn restore_takes_optional_destination() {
        let (command, _) =
            parse_args(&args(&["restore", "a.zip", "--into", "/eve/settings_X"])).expect("parse");
        assert_eq!(
            command,
            CliCommand::Restore {
                archive: PathBuf::from("a.zip"),
                into: Some(PathBuf::from("/eve/settings_X")),
            }
        );
        assert!(parse_args(&args(&["restore"])).is_err());
    }

    #[test]
    fn note_reads_sets_and_clears() {
        let (command, _) = parse_args(&args(&["note", "100"])).expect("read");
        assert_eq!(
            command,
            CliCommand::Note(NoteArgs {
                kind: SettingsKind::Character,
                identity: 100,
                text: None,
            })
        );

        let (command, _) =
            parse_args(&args(&["note", "--kind", "user", "7", "alpha", "alt"])).expect("set");
        assert_eq!(
            command,
            CliCommand::Note(NoteArgs {
                kind: SettingsKind::Account,
                identity: 7,
                text: Some("alpha alt".to_string()),
            })
        );

        let (command, _) = parse_args(&args(&["note", "100", "--clear"])).expect("clear");
        assert!(matches!(
            command,
            CliCommand::Note(NoteArgs { text: Some(ref text), .. }) if text.is_empty()
        ));

        assert!(parse_args(&args(&["note"])).is_err());
        assert!(parse_args(&args(&["note", "100", "x", "--clear"])).is_err());
    }

    #[test]
    fn unknown_commands_are_errors() {
        assert!(parse_args(&args(&["frobnicate"])).is_err());
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
