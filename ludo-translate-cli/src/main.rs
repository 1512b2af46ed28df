use clap::{Arg, ArgAction, ArgMatches, Command};
use ludo_translate::provider::{ChatCompletionProvider, MockMode, MockProvider, TranslationProvider};
use ludo_translate::{
    DirectoryRemote, PatternIndex, RemoteStatus, Resolution, Settings, StoragePaths, Tag,
    TranslationEngine, TranslationHost, TranslationStore, cached_translation, check_remote,
    merge_entries, pull, push, resolve_all,
};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Host that forwards completions to the command waiting for them
struct ChannelHost {
    sender: mpsc::UnboundedSender<(Vec<usize>, String)>,
}

impl TranslationHost<usize> for ChannelHost {
    fn on_translation_complete(&self, _original: &str, translated: &str, handles: Vec<usize>) {
        let _ = self.sender.send((handles, translated.to_string()));
    }
}

fn cli() -> Command {
    Command::new("ludo-translate")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Manage per-game translation stores")
        .subcommand_required(true)
        .arg(
            Arg::new("dir")
                .long("dir")
                .short('d')
                .help("Base storage directory")
                .default_value("./ludo-data")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Show debug logging")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("translate")
                .about("Translate texts through the engine and store the results")
                .arg(
                    Arg::new("text")
                        .help("Texts to translate")
                        .required(true)
                        .num_args(1..),
                )
                .arg(
                    Arg::new("mock")
                        .long("mock")
                        .short('m')
                        .help("Use the mock provider instead of the configured endpoint")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("lookup")
                .about("Look a text up in the store without translating")
                .arg(Arg::new("text").required(true).index(1)),
        )
        .subcommand(Command::new("stats").about("Show store statistics"))
        .subcommand(
            Command::new("merge")
                .about("Three-way merge of two store files")
                .arg(Arg::new("local").required(true).index(1))
                .arg(Arg::new("remote").required(true).index(2))
                .arg(
                    Arg::new("ancestor")
                        .long("ancestor")
                        .short('a')
                        .help("Common ancestor file"),
                )
                .arg(
                    Arg::new("take-remote")
                        .long("take-remote")
                        .help("Resolve every conflict in favour of the remote side")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .help("Write the merged mapping to this file"),
                ),
        )
        .subcommand(Command::new("hash").about("Print the content hash of the store"))
        .subcommand(Command::new("fork").about("Give the store a new identity and drop its ancestor"))
        .subcommand(
            Command::new("sync")
                .about("Pull from a remote directory, optionally pushing afterwards")
                .arg(
                    Arg::new("remote")
                        .long("remote")
                        .short('r')
                        .help("Directory holding the shared store file")
                        .required(true),
                )
                .arg(
                    Arg::new("push")
                        .long("push")
                        .help("Publish the local store after a complete pull")
                        .action(ArgAction::SetTrue),
                ),
        )
}

fn init_tracing(verbose: bool) -> CliResult<()> {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> CliResult<&'a String> {
    matches
        .get_one::<String>(name)
        .ok_or_else(|| format!("missing argument: {}", name).into())
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("verbose"))?;

    let paths = StoragePaths::new(PathBuf::from(required(&matches, "dir")?));
    debug!(dir = %paths.base_dir.display(), "Using storage directory");

    match matches.subcommand() {
        Some(("translate", sub)) => translate(&paths, sub).await,
        Some(("lookup", sub)) => lookup(&paths, required(sub, "text")?),
        Some(("stats", _)) => stats(&paths),
        Some(("merge", sub)) => merge_files(sub),
        Some(("hash", _)) => {
            println!("{}", TranslationStore::load(paths.store_file()).compute_content_hash());
            Ok(())
        }
        Some(("fork", _)) => {
            let mut store = TranslationStore::load(paths.store_file());
            store.fork()?;
            println!("New identity: {}", store.uuid());
            Ok(())
        }
        Some(("sync", sub)) => sync(&paths, sub).await,
        _ => Err("unknown command".into()),
    }
}

async fn translate(paths: &StoragePaths, matches: &ArgMatches) -> CliResult<()> {
    let texts: Vec<String> = matches
        .get_many::<String>("text")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let settings = Settings::load(&paths.settings_file());
    settings.validate()?;

    let provider: Arc<dyn TranslationProvider> = if matches.get_flag("mock") {
        Arc::new(MockProvider::new(MockMode::Suffix))
    } else {
        Arc::new(ChatCompletionProvider::from_settings(&settings.provider)?)
    };
    info!(provider = provider.provider_name(), target = %settings.target_language, "Translating");

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let engine = TranslationEngine::new(
        TranslationStore::load(paths.store_file()),
        provider,
        Arc::new(ChannelHost { sender }),
        settings,
    );

    let mut results: Vec<Option<String>> = vec![None; texts.len()];
    for (handle, text) in texts.iter().enumerate() {
        if let Some(hit) = engine.lookup(text) {
            results[handle] = Some(hit);
        } else {
            engine.request(text, handle);
        }
    }

    if engine.outstanding() > 0 {
        engine.start()?;
        let poll = Duration::from_millis(200);
        while results.iter().any(Option::is_none) {
            match tokio::time::timeout(poll, receiver.recv()).await {
                Ok(Some((handles, translated))) => {
                    for handle in handles {
                        results[handle] = Some(translated.clone());
                    }
                }
                Ok(None) => break,
                // Failed requests leave nothing outstanding and send nothing.
                Err(_) if engine.outstanding() == 0 => {
                    while let Ok((handles, translated)) = receiver.try_recv() {
                        for handle in handles {
                            results[handle] = Some(translated.clone());
                        }
                    }
                    break;
                }
                Err(_) => {}
            }
        }
    }
    engine.shutdown().await?;

    for (text, result) in texts.iter().zip(results) {
        match result {
            Some(translated) => println!("{} → {}", text, translated),
            None => println!("{} → (not translated)", text),
        }
    }
    Ok(())
}

fn lookup(paths: &StoragePaths, text: &str) -> CliResult<()> {
    let store = TranslationStore::load(paths.store_file());
    let mut patterns = PatternIndex::build(store.entries());
    match cached_translation(&store, &mut patterns, text) {
        Some(translated) => println!("{}", translated),
        None => return Err(format!("not found: {}", text).into()),
    }
    Ok(())
}

fn stats(paths: &StoragePaths) -> CliResult<()> {
    let store = TranslationStore::load(paths.store_file());
    let mut per_tag: BTreeMap<String, usize> = BTreeMap::new();
    let mut placeholders = 0;
    for (_, entry) in store.iter() {
        if entry.is_placeholder() {
            placeholders += 1;
        }
        *per_tag.entry(entry.tag.to_string()).or_default() += 1;
    }

    println!("Store:          {}", paths.store_file().display());
    println!("Identity:       {}", store.uuid());
    if let Some(name) = &store.game().name {
        println!("Game:           {}", name);
    }
    println!("Entries:        {}", store.len());
    for (tag, count) in &per_tag {
        println!("  {:<13} {}", tag, count);
    }
    if placeholders > 0 {
        println!("Untranslated:   {}", placeholders);
    }
    println!("Local changes:  {}", store.local_changes());
    println!("Ancestor:       {}", if store.ancestor().is_some() { "yes" } else { "no" });
    println!("Content hash:   {}", store.compute_content_hash());
    println!(
        "Last synced:    {}",
        store.last_synced_hash().unwrap_or("never")
    );
    Ok(())
}

fn read_store_file(path: &Path) -> CliResult<(ludo_translate::Entries, Option<String>)> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(ludo_translate::store::parse_entries(&content)?)
}

fn merge_files(matches: &ArgMatches) -> CliResult<()> {
    let (local, local_uuid) = read_store_file(Path::new(required(matches, "local")?))?;
    let (remote, _) = read_store_file(Path::new(required(matches, "remote")?))?;
    let ancestor = match matches.get_one::<String>("ancestor") {
        Some(path) => Some(read_store_file(Path::new(path))?.0),
        None => None,
    };

    let mut result = merge_entries(&local, &remote, ancestor.as_ref());
    if matches.get_flag("take-remote") {
        resolve_all(&mut result, Resolution::TakeRemote);
    }

    let s = &result.statistics;
    println!("Unchanged:       {}", s.unchanged);
    println!("Local only:      {}", s.local_only);
    println!("Local modified:  {}", s.local_modified);
    println!("Remote added:    {}", s.remote_added);
    println!("Remote updated:  {}", s.remote_updated);
    println!("Deleted:         {}", s.deleted);
    println!("Conflicts:       {}", s.conflict);
    if s.resolved > 0 {
        println!("Resolved:        {}", s.resolved);
    }
    for conflict in &result.conflicts {
        let show = |side: Option<&ludo_translate::Entry>| {
            side.map(|e| format!("{:?} [{}]", e.value, e.tag))
                .unwrap_or_else(|| "(deleted)".to_string())
        };
        println!(
            "  {:?} ({}): local {} / remote {}",
            conflict.key,
            conflict.kind,
            show(conflict.local.as_ref()),
            show(conflict.remote.as_ref())
        );
    }

    if let Some(output) = matches.get_one::<String>("output") {
        let uuid = local_uuid.unwrap_or_else(ludo_translate::store::new_identity);
        ludo_translate::store::write_snapshot(Path::new(output), &result.merged, &uuid)?;
        info!(path = %output, entries = result.merged.len(), "Wrote merged store");
    }
    Ok(())
}

async fn sync(paths: &StoragePaths, matches: &ArgMatches) -> CliResult<()> {
    let remote = DirectoryRemote::new(PathBuf::from(required(matches, "remote")?));
    let mut store = TranslationStore::load(paths.store_file());

    let status = check_remote(&store, &remote).await?;
    let mut complete = true;
    match status {
        RemoteStatus::NoRemote => println!("No remote copy yet"),
        RemoteStatus::UpToDate => println!("Remote unchanged since last sync"),
        RemoteStatus::RemoteChanged { remote_hash } => {
            println!("Remote changed ({})", remote_hash);
            let report = pull(&mut store, &remote, &HashMap::new()).await?;
            println!(
                "Pulled: {} added, {} updated, {} deleted, {} unresolved",
                report.statistics.remote_added,
                report.statistics.remote_updated,
                report.statistics.deleted,
                report.unresolved.len()
            );
            let shown = |entry: Option<&ludo_translate::Entry>| {
                entry.map_or_else(|| "<deleted>".to_string(), |e| format!("{:?}", e.value))
            };
            for conflict in &report.unresolved {
                println!(
                    "  conflict: {:?} ({}): local {}, remote {}",
                    conflict.key,
                    conflict.kind,
                    shown(conflict.local.as_ref()),
                    shown(conflict.remote.as_ref()),
                );
            }
            if report.adopted_identity {
                println!("Now tracking remote identity {}", store.uuid());
            }
            complete = report.is_complete();
        }
    }

    if matches.get_flag("push") {
        if complete {
            let hash = push(&mut store, &remote).await?;
            println!("Pushed {} entries ({})", store.len(), hash);
        } else {
            println!("Not pushing: resolve the conflicts first");
        }
    }

    store.save()?;
    let untranslated = store
        .iter()
        .filter(|(_, e)| e.tag == Tag::Human && e.is_placeholder())
        .count();
    if untranslated > 0 {
        info!(untranslated, "Store has texts awaiting human translation");
    }
    Ok(())
}
