//! CLI entry point for `mailpool`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use mailpool::campaign::quotes::{NoQuotes, QuoteSource, RemoteQuotes};
use mailpool::campaign::templates::{NoTemplates, RemoteTemplates, TemplateSource};
use mailpool::campaign::transport::SmtpMailer;
use mailpool::campaign::CampaignRunner;
use mailpool::config::{self, Config};
use mailpool::model::container::{LogFilter, UserSelector};
use mailpool::model::outcome::{tally, UnitOutcome, UnitReport};
use mailpool::orchestrator::ContainerOrchestrator;
use mailpool::runtime::DockerRuntime;
use mailpool::store::LogStore;

#[derive(Parser)]
#[command(
    name = "mailpool",
    version,
    about = "Manage a pool of disposable mail-server containers",
    long_about = "Launch SMTP server containers, send templated test campaigns through them, \
                  scrape the delivered mail back out and keep a per-container delivery log."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Delivery-log database (overrides the configured path)
    #[arg(long, value_name = "FILE", global = true, env = "MAILPOOL_DB")]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a new mail-server container
    Create,
    /// List all containers with uptime and mail counts
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show the runtime view of one container
    Inspect { id: String },
    /// Show resource usage and delivery figures
    Stats {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Force-remove a container and delete its delivery log
    Remove { id: String },
    /// Show the container's recent log output
    Logs {
        id: String,
        /// Number of trailing lines (defaults to the configured value)
        #[arg(long)]
        tail: Option<usize>,
        #[arg(long, value_enum, default_value_t = LogFilter::None)]
        filter: LogFilter,
    },
    /// Show the delivery log of a container, newest first
    Emails {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Scrape delivered mail out of the container's mailboxes into the log
    Extract {
        id: String,
        /// Comma-separated user indices, or "all"
        #[arg(long, default_value = "all")]
        users: UserSelector,
        #[arg(long)]
        json: bool,
    },
    /// Create the synthetic users and their Maildirs inside a container
    Provision { id: String },
    /// Run the mailer inside a container and print its output
    Send { id: String },
    /// Send a templated campaign through the configured SMTP relay
    Campaign {
        /// Container id recorded on delivery rows (defaults to $HOSTNAME)
        #[arg(long)]
        container_id: Option<String>,
        /// Where to load templates from
        #[arg(long, value_enum)]
        templates: Option<TemplateChoice>,
        /// Skip the remote quote lookup
        #[arg(long)]
        offline: bool,
    },
    /// Manage stored templates
    #[command(subcommand)]
    Template(TemplateCommand),
    /// Print the effective configuration as TOML
    Config {
        /// Also write it to the config file location
        #[arg(long)]
        write: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// Create or overwrite a template by name
    Save {
        name: String,
        /// HTML body file; omit for a template that uses the generated body
        #[arg(long, value_name = "FILE")]
        html: Option<PathBuf>,
        /// JSON editor design file
        #[arg(long, value_name = "FILE")]
        design: Option<PathBuf>,
    },
    /// List stored templates
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TemplateChoice {
    /// Remote template API (`campaign.template_api_url`)
    Api,
    /// Templates saved in the local database
    Store,
    /// No templates; every recipient gets the generated body
    None,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config();
    if let Some(db) = cli.db.clone() {
        config.store.db_path = Some(db);
    }

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Create => cmd_create(&config),
        Commands::List { json } => cmd_list(&config, json),
        Commands::Inspect { id } => cmd_inspect(&config, &id),
        Commands::Stats { id, json } => cmd_stats(&config, &id, json),
        Commands::Remove { id } => cmd_remove(&config, &id),
        Commands::Logs { id, tail, filter } => {
            let tail = tail.unwrap_or(config.runtime.log_tail);
            cmd_logs(&config, &id, tail, filter)
        }
        Commands::Emails { id, json } => cmd_emails(&config, &id, json),
        Commands::Extract { id, users, json } => cmd_extract(&config, &id, &users, json),
        Commands::Provision { id } => cmd_provision(&config, &id),
        Commands::Send { id } => cmd_send(&config, &id),
        Commands::Campaign {
            container_id,
            templates,
            offline,
        } => cmd_campaign(&config, container_id, templates, offline),
        Commands::Template(TemplateCommand::Save { name, html, design }) => {
            cmd_template_save(&config, &name, html.as_deref(), design.as_deref())
        }
        Commands::Template(TemplateCommand::List { json }) => cmd_template_list(&config, json),
        Commands::Config { write } => cmd_config(&config, write),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::data_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailpool.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn open_store(config: &Config) -> anyhow::Result<LogStore> {
    Ok(LogStore::open(config::db_path(config))?)
}

/// Connect to the runtime and open the store, then run `f` with an orchestrator.
fn with_orchestrator<T>(
    config: &Config,
    f: impl FnOnce(&ContainerOrchestrator<'_, DockerRuntime>) -> mailpool::error::Result<T>,
) -> anyhow::Result<T> {
    let runtime = DockerRuntime::connect()?;
    let store = open_store(config)?;
    let result = f(&ContainerOrchestrator::new(&runtime, &store, config))?;
    store.close()?;
    Ok(result)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_create(config: &Config) -> anyhow::Result<()> {
    let handle = with_orchestrator(config, |o| o.create_mail_container())?;
    println!("  Created {} ({})", handle.id, handle.name);
    Ok(())
}

fn cmd_list(config: &Config, json: bool) -> anyhow::Result<()> {
    let summaries = with_orchestrator(config, |o| o.list_containers())?;
    if json {
        return print_json(&summaries);
    }

    println!();
    println!(
        "  {:<14} {:<24} {:<10} {:>10} {:>8}",
        "ID", "Name", "Status", "Uptime", "Emails"
    );
    println!("  {}", "-".repeat(70));
    for s in &summaries {
        let short: String = s.id.chars().take(12).collect();
        let name: String = s.name.chars().take(23).collect();
        println!(
            "  {:<14} {:<24} {:<10} {:>10} {:>8}",
            short,
            name,
            s.status.to_string(),
            format_duration(s.uptime_seconds),
            s.emails_sent
        );
    }
    println!();
    Ok(())
}

fn cmd_inspect(config: &Config, id: &str) -> anyhow::Result<()> {
    let handle = with_orchestrator(config, |o| o.inspect(id))?;
    print_json(&handle)
}

fn cmd_stats(config: &Config, id: &str, json: bool) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let stats = with_orchestrator(config, |o| o.compute_stats(id))?;
    if json {
        return print_json(&stats);
    }

    println!();
    println!("  {:<20} {}", "Container", stats.container_id);
    println!("  {:<20} {}", "Emails logged", stats.emails_sent);
    println!("  {:<20} {}", "Uptime", format_duration(stats.uptime_seconds));
    println!("  {:<20} {:.2}%", "CPU", stats.cpu_percent);
    println!(
        "  {:<20} {} / {} ({:.2}%)",
        "Memory",
        format_size(stats.memory_usage, BINARY),
        format_size(stats.memory_limit, BINARY),
        stats.memory_percent
    );
    println!();
    Ok(())
}

fn cmd_remove(config: &Config, id: &str) -> anyhow::Result<()> {
    with_orchestrator(config, |o| o.remove_container(id))?;
    println!("  Removed {id}");
    Ok(())
}

fn cmd_logs(config: &Config, id: &str, tail: usize, filter: LogFilter) -> anyhow::Result<()> {
    let text = with_orchestrator(config, |o| o.fetch_logs(id, tail, filter))?;
    println!("{text}");
    Ok(())
}

fn cmd_emails(config: &Config, id: &str, json: bool) -> anyhow::Result<()> {
    let records = with_orchestrator(config, |o| o.delivery_log(id))?;
    if json {
        return print_json(&records);
    }

    println!();
    println!("  {} record(s)", records.len());
    println!();
    if records.is_empty() {
        return Ok(());
    }
    println!(
        "  {:<17} {:<28} {:<28} {}",
        "Date", "Recipient", "Subject", "Status"
    );
    println!("  {}", "-".repeat(90));
    for r in &records {
        let date = chrono::DateTime::from_timestamp(r.timestamp as i64, 0)
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let recipient: String = r.recipient.chars().take(27).collect();
        let subject: String = r.subject.chars().take(27).collect();
        println!("  {date:<17} {recipient:<28} {subject:<28} {}", r.status);
    }
    println!();
    Ok(())
}

fn cmd_extract(config: &Config, id: &str, users: &UserSelector, json: bool) -> anyhow::Result<()> {
    let total = users.indices(config.mailbox.user_count).len() as u64;
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Extracting [{bar:40.cyan/blue}] {pos}/{len} mailboxes")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let report = with_orchestrator(config, |o| {
        o.sync_mailboxes(
            id,
            users,
            Some(&|done, _total| pb.set_position(done as u64)),
        )
    })?;
    pb.finish_and_clear();

    if json {
        return print_json(&report);
    }

    let (ok, skipped, failed) = tally(&report.units);
    println!();
    println!("  {:<20} {}", "Container", report.container_id);
    println!("  {:<20} {}", "Messages stored", report.mails.len());
    println!("  {:<20} {ok} ok, {skipped} skipped, {failed} failed", "Units");
    println!("  {:<20} {:.2?}", "Elapsed", start.elapsed());
    print_problems(&report.units);
    println!();
    Ok(())
}

fn cmd_provision(config: &Config, id: &str) -> anyhow::Result<()> {
    let reports = with_orchestrator(config, |o| o.provision_mailboxes(id))?;
    let (ok, _, failed) = tally(&reports);
    println!("  Provisioned {ok} mailbox(es), {failed} failed");
    print_problems(&reports);
    Ok(())
}

fn cmd_send(config: &Config, id: &str) -> anyhow::Result<()> {
    let run = with_orchestrator(config, |o| o.run_remote_mailer(id))?;
    print!("{}", run.text());
    if !run.success() {
        anyhow::bail!("Mailer in {id} exited with code {}", run.exit_code);
    }
    Ok(())
}

fn cmd_campaign(
    config: &Config,
    container_id: Option<String>,
    choice: Option<TemplateChoice>,
    offline: bool,
) -> anyhow::Result<()> {
    let settings = &config.campaign;
    let container_id = container_id
        .or_else(|| settings.container_id.clone())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "local".to_string());
    let timeout = Duration::from_secs(settings.quote_timeout_secs);

    let choice = choice.unwrap_or(if settings.template_api_url.is_some() {
        TemplateChoice::Api
    } else {
        TemplateChoice::Store
    });

    let store = open_store(config)?;
    let fetched = match choice {
        TemplateChoice::Api => {
            let url = settings
                .template_api_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("campaign.template_api_url is not set"))?;
            RemoteTemplates::new(url, timeout)?.fetch_templates()
        }
        TemplateChoice::Store => store.fetch_templates(),
        TemplateChoice::None => NoTemplates.fetch_templates(),
    };
    let templates = fetched.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Could not load templates, using the generated body");
        Vec::new()
    });

    let quotes: Box<dyn QuoteSource> = if offline {
        Box::new(NoQuotes)
    } else {
        Box::new(RemoteQuotes::new(&settings.quote_url, timeout)?)
    };
    let transport = SmtpMailer::new(&settings.smtp_host, settings.smtp_port);
    let runner = CampaignRunner::new(
        &store,
        &transport,
        quotes.as_ref(),
        container_id,
        config.mailbox.base_email.clone(),
        settings.subject_prefix.clone(),
    );

    let result = runner.run(&config.mailbox.all_addresses(), &templates)?;
    store.close()?;

    println!();
    println!(
        "  Campaign completed: {} succeeded, {} failed.",
        result.sent, result.failed
    );
    print_problems(&result.outcomes);
    println!();
    Ok(())
}

fn cmd_template_save(
    config: &Config,
    name: &str,
    html: Option<&Path>,
    design: Option<&Path>,
) -> anyhow::Result<()> {
    for path in html.iter().chain(design.iter()) {
        if !path.exists() {
            anyhow::bail!("File not found: {}", path.display());
        }
    }
    let html = html.map(std::fs::read_to_string).transpose()?;
    let design = match design {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => serde_json::Value::Null,
    };

    let store = open_store(config)?;
    let template = store.upsert_template(name, html.as_deref(), &design)?;
    store.close()?;
    println!("  Saved template '{}' ({})", template.name, template.id);
    Ok(())
}

fn cmd_template_list(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let templates = store.list_templates()?;
    if json {
        return print_json(&templates);
    }

    println!();
    println!("  {:<28} {:<26} {:<20} {}", "Name", "ID", "Created", "HTML");
    println!("  {}", "-".repeat(82));
    for t in &templates {
        println!(
            "  {:<28} {:<26} {:<20} {}",
            t.name.chars().take(27).collect::<String>(),
            t.id,
            t.created_at.format("%Y-%m-%d %H:%M"),
            if t.html.is_some() { "yes" } else { "no" }
        );
    }
    println!();
    Ok(())
}

fn cmd_config(config: &Config, write: bool) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    if write {
        config::save_config(config)?;
        if let Some(path) = config::config_file_path() {
            eprintln!("  Wrote {}", path.display());
        }
    }
    Ok(())
}

/// Print units that did not succeed.
fn print_problems(reports: &[UnitReport]) {
    for r in reports {
        match &r.outcome {
            UnitOutcome::Ok => {}
            UnitOutcome::Skipped(reason) => println!("    skipped {}: {reason}", r.unit),
            UnitOutcome::Failed(reason) => println!("    failed  {}: {reason}", r.unit),
        }
    }
}

fn format_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    if h > 0 {
        format!("{h}h{m:02}m")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailpool", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}
