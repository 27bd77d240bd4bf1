use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use clipboard_masker::{clean, Anonymizer, CustomPattern, MaskStats, Settings, SettingsStore, DEFAULT_HOP_LIMIT};

#[derive(Parser, Debug)]
#[command(
    name = "clipboard-masker",
    about = "Masks personal data in copied text and cleans tracking junk from copied links.",
    version,
    author = ""
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Optional input file. Use '-' to read from STDIN.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Optional output file. Use '-' to write to STDOUT.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Settings file (defaults to the per-user config directory).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Rules to turn off for this run (e.g. --skip name --skip email).
    #[arg(long, value_enum)]
    skip: Vec<Category>,

    /// Replace links inside text with [URL] for this run.
    #[arg(long)]
    mask_urls: bool,

    /// Suppress the masking summary.
    #[arg(long)]
    quiet: bool,

    /// Emit masking stats as JSON to stderr.
    #[arg(long)]
    stats_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clean a single link and print the result.
    Clean {
        url: String,
        /// Maximum number of nested redirectors to unwrap.
        #[arg(long, default_value_t = DEFAULT_HOP_LIMIT, allow_negative_numbers = true)]
        hops: i32,
    },
    /// Manage custom names.
    Names {
        #[command(subcommand)]
        action: NamesAction,
    },
    /// Manage custom patterns.
    Patterns {
        #[command(subcommand)]
        action: PatternsAction,
    },
    /// Inspect the settings file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum NamesAction {
    List,
    Add { name: String },
    Remove { name: String },
}

#[derive(Subcommand, Debug)]
enum PatternsAction {
    List,
    Add {
        /// Display label.
        #[arg(long)]
        name: String,
        #[arg(long)]
        pattern: String,
        #[arg(long)]
        replacement: String,
        /// Store the pattern switched off.
        #[arg(long)]
        disabled: bool,
    },
    Remove { id: Uuid },
    Update {
        id: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        pattern: Option<String>,
        #[arg(long)]
        replacement: Option<String>,
    },
    Enable { id: Uuid },
    Disable { id: Uuid },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective settings as JSON.
    Show,
    /// Print the settings file location.
    Path,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, ValueEnum)]
enum Category {
    Ip,
    Email,
    Phone,
    Card,
    Ssn,
    Name,
    UrlCleaning,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .without_time()
        .init();

    let args = Args::parse();
    match args.command {
        Some(Command::Clean { ref url, hops }) => {
            println!("{}", clean(url, hops));
            Ok(())
        }
        Some(Command::Names { ref action }) => run_names(open_store(args.config.as_ref())?, action),
        Some(Command::Patterns { ref action }) => {
            run_patterns(open_store(args.config.as_ref())?, action)
        }
        Some(Command::Config { ref action }) => run_config(&open_store(args.config.as_ref())?, action),
        None => run_mask(&args),
    }
}

fn run_mask(args: &Args) -> Result<()> {
    let store = open_store(args.config.as_ref())?;
    let mut settings = store.settings().clone();
    for category in &args.skip {
        disable(&mut settings, category);
    }
    if args.mask_urls {
        settings.mask_urls = true;
    }

    let anonymizer = Anonymizer::new(&settings);
    let input = read_input(args.input.as_ref())?;
    let result = anonymizer.anonymize(&input);
    write_output(args.output.as_ref(), &result.output)?;

    if !args.quiet {
        report_stats(&result.stats, args.stats_json)?;
    }

    Ok(())
}

fn disable(settings: &mut Settings, category: &Category) {
    match category {
        Category::Ip => settings.mask_ip_addresses = false,
        Category::Email => settings.mask_emails = false,
        Category::Phone => settings.mask_phone_numbers = false,
        Category::Card => settings.mask_credit_cards = false,
        Category::Ssn => settings.mask_ssn = false,
        Category::Name => settings.mask_names = false,
        Category::UrlCleaning => settings.clean_copied_links = false,
    }
}

fn open_store(path: Option<&PathBuf>) -> Result<SettingsStore> {
    match path {
        Some(p) => SettingsStore::open(p),
        None => SettingsStore::open_default(),
    }
}

fn run_names(mut store: SettingsStore, action: &NamesAction) -> Result<()> {
    match action {
        NamesAction::List => {
            for name in &store.settings().custom_names {
                println!("{}", name);
            }
        }
        NamesAction::Add { name } => {
            if !store.modify(|s| s.add_custom_name(name))? {
                eprintln!("name already present or blank: {}", name);
            }
        }
        NamesAction::Remove { name } => {
            if !store.modify(|s| s.remove_custom_name(name))? {
                bail!("no such custom name: {}", name);
            }
        }
    }
    Ok(())
}

fn run_patterns(mut store: SettingsStore, action: &PatternsAction) -> Result<()> {
    match action {
        PatternsAction::List => {
            for p in &store.settings().custom_patterns {
                let state = if p.is_enabled { "on " } else { "off" };
                println!("{} [{}] {}: {} -> {}", p.id, state, p.name, p.pattern, p.replacement);
            }
        }
        PatternsAction::Add {
            name,
            pattern,
            replacement,
            disabled,
        } => {
            if let Err(err) = regex::Regex::new(pattern) {
                eprintln!("warning: pattern does not compile and will be ignored: {}", err);
            }
            let mut custom = CustomPattern::new(name.as_str(), pattern.as_str(), replacement.as_str());
            custom.is_enabled = !disabled;
            let id = custom.id;
            store.modify(|s| s.add_custom_pattern(custom))?;
            println!("{}", id);
        }
        PatternsAction::Remove { id } => {
            if !store.modify(|s| s.remove_custom_pattern(*id))? {
                bail!("no such custom pattern: {}", id);
            }
        }
        PatternsAction::Update {
            id,
            name,
            pattern,
            replacement,
        } => {
            let mut updated = store
                .settings()
                .find_pattern(*id)
                .cloned()
                .with_context(|| format!("no such custom pattern: {}", id))?;
            if let Some(name) = name {
                updated.name = name.clone();
            }
            if let Some(pattern) = pattern {
                updated.pattern = pattern.clone();
            }
            if let Some(replacement) = replacement {
                updated.replacement = replacement.clone();
            }
            store.modify(|s| s.update_custom_pattern(updated))?;
        }
        PatternsAction::Enable { id } => set_enabled(&mut store, *id, true)?,
        PatternsAction::Disable { id } => set_enabled(&mut store, *id, false)?,
    }
    Ok(())
}

fn set_enabled(store: &mut SettingsStore, id: Uuid, enabled: bool) -> Result<()> {
    if store.settings().find_pattern(id).is_none() {
        bail!("no such custom pattern: {}", id);
    }
    store.modify(|s| s.set_pattern_enabled(id, enabled))?;
    Ok(())
}

fn run_config(store: &SettingsStore, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let payload = serde_json::to_string_pretty(store.settings())
                .context("failed to serialize settings")?;
            println!("{}", payload);
        }
        ConfigAction::Path => println!("{}", store.path().display()),
    }
    Ok(())
}

fn read_input(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(p) if p == Path::new("-") => read_from_stdin(),
        Some(p) => fs::read_to_string(p)
            .with_context(|| format!("failed to read input file: {}", p.display())),
        None => read_from_stdin(),
    }
}

fn read_from_stdin() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read from STDIN")?;
    Ok(buffer)
}

fn write_output(path: Option<&PathBuf>, contents: &str) -> Result<()> {
    match path {
        Some(p) if p != Path::new("-") => {
            let mut file = fs::File::create(p)
                .with_context(|| format!("failed to create output file: {}", p.display()))?;
            file.write_all(contents.as_bytes())
                .with_context(|| format!("failed to write output file: {}", p.display()))?;
        }
        _ => {
            io::stdout()
                .write_all(contents.as_bytes())
                .context("failed to write to STDOUT")?;
        }
    }

    Ok(())
}

fn report_stats(stats: &MaskStats, as_json: bool) -> Result<()> {
    if as_json {
        let payload = serde_json::to_string_pretty(stats).context("failed to serialize stats")?;
        eprintln!("{}", payload);
        return Ok(());
    }

    if stats.link_cleaned {
        eprintln!("Link cleaned");
    }
    eprintln!("Replacements applied: {}", stats.total());
    let rows = [
        ("ip addresses", stats.ip_addresses),
        ("emails", stats.emails),
        ("phones", stats.phones),
        ("cards", stats.cards),
        ("ssn", stats.ssn),
        ("names", stats.names),
        ("urls", stats.urls),
        ("custom", stats.custom),
    ];
    for (label, count) in rows {
        if count > 0 {
            eprintln!("  {:<13}: {}", label, count);
        }
    }
    Ok(())
}
