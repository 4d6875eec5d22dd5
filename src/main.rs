//! tc - command line front end of the twincom command engine
//!
//! Each subcommand builds the two panel contexts a GUI would hand over and
//! runs the matching command through the executor.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use twincom::command::{
    CommandCatalog, CommandData, Context, FailureListener, GuiBuilder, Handler, LongTask,
    ProgressEvent, ProgressListener, TaskHandle, INDETERMINATE,
};
use twincom::config::Config;
use twincom::dispatch::EventLoop;
use twincom::engine::{CommandExecutor, CommandRegistry};
use twincom::errors::{AppError, AppResult};
use twincom::ops::{self, CalculateSize};
use twincom::panel::{type_label, Panel};
use twincom::providers::ProviderRegistry;
use twincom::{api::FileHandle, api::FileRef, api::FsError, logging};

#[derive(Parser, Debug)]
#[command(name = "tc")]
#[command(about = "Two-panel file manager commands from the shell", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file to use instead of the platform default
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List a directory the way a panel shows it
    Ls {
        /// URI or native path; defaults to the left panel's start location
        location: Option<String>,

        /// Calculate directory sizes in the background
        #[arg(long)]
        sizes: bool,
    },
    /// Recursive size of a file or directory
    Size { location: String },
    /// Copy files into a directory
    Copy {
        #[arg(required = true)]
        sources: Vec<String>,

        /// Target directory (the inactive panel)
        #[arg(long, short)]
        to: String,
    },
    /// Compress files into an archive next to the first source
    Zip {
        #[arg(required = true)]
        sources: Vec<String>,

        /// Archive file name
        #[arg(long)]
        name: Option<String>,
    },
    /// Create a uniquely named directory
    Mkdir { location: Option<String> },
    /// Show the registered commands, menus and toolbar
    Commands,
}

/// Everything a command needs: backends, the presentation loop and the engine
struct Session {
    providers: ProviderRegistry,
    event_loop: EventLoop,
    engine: CommandExecutor,
}

impl Session {
    fn start(config: &Config) -> AppResult<Self> {
        let event_loop = EventLoop::new();
        let mut registry = CommandRegistry::new();
        ops::register_builtin(&mut registry, &config.settings.archive.name);
        let engine = CommandExecutor::new(config, event_loop.poster())?.with_registry(registry);
        Ok(Self {
            providers: ProviderRegistry::installed(),
            event_loop,
            engine,
        })
    }

    /// Active panel context over the directory holding `sources`, with them selected
    fn selection_context(&self, sources: &[String]) -> AppResult<Context> {
        let files = sources
            .iter()
            .map(|s| self.providers.get_element(s))
            .collect::<Result<Vec<FileRef>, _>>()?;
        let first = files
            .first()
            .ok_or_else(|| AppError::Config("no source given".to_string()))?;
        let directory = first
            .parent()
            .ok_or_else(|| FsError::NotADirectory(first.path()))?;
        Ok(Context::new(directory).with_selection(files))
    }

    /// Pump events until `outcome` is set
    fn wait(&self, outcome: &Outcome) -> AppResult<()> {
        while !self
            .event_loop
            .pump_until(Duration::from_millis(250), || outcome.get().is_some())
        {}
        match outcome.get() {
            Some(Err(failure)) => Err(failure),
            _ => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}

/// Terminal result of a task, written on the presentation thread
#[derive(Clone, Default)]
struct Outcome(Arc<Mutex<Option<Result<(), (String, String)>>>>);

impl Outcome {
    fn set(&self, value: Result<(), (String, String)>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    fn get(&self) -> Option<Result<(), AppError>> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .map(|r| r.map_err(|(name, message)| AppError::Task { name, message }))
    }
}

/// Progress bar driven by task events
struct BarListener {
    bar: ProgressBar,
    outcome: Outcome,
}

impl BarListener {
    fn new(outcome: Outcome) -> Self {
        let bar = ProgressBar::new(100);
        match ProgressStyle::with_template("{spinner} [{bar:40}] {pos:>3}% {wide_msg}") {
            Ok(style) => bar.set_style(style.progress_chars("=> ")),
            Err(e) => tracing::debug!(error = %e, "progress template rejected"),
        }
        Self { bar, outcome }
    }
}

impl FailureListener for BarListener {
    fn failed(&mut self, source: &TaskHandle, cause: &twincom::errors::CommandError) {
        self.bar.abandon_with_message(cause.to_string());
        self.outcome
            .set(Err((source.name().to_string(), cause.to_string())));
    }
}

impl ProgressListener for BarListener {
    fn progress_changed(&mut self, _source: &TaskHandle, event: &ProgressEvent) {
        self.bar.set_message(event.description.clone());
        if event.new == INDETERMINATE {
            self.bar.tick();
        } else {
            self.bar.set_position(event.new.max(0) as u64);
        }
    }

    fn finished(&mut self, _source: &TaskHandle) {
        self.bar.finish_and_clear();
        self.outcome.set(Ok(()));
    }
}

/// Plain-text rendition of the menus and toolbar
#[derive(Default)]
struct TextMenus {
    lines: Vec<String>,
}

impl GuiBuilder for TextMenus {
    type Icon = String;

    fn register_command(&mut self, command: &CommandData, icon: Option<String>) {
        self.lines.push(format!(
            "{:<8} {:<16} {:<8} {:<16} {}",
            command.id,
            command.name,
            command.key.as_deref().unwrap_or("-"),
            command.handler,
            icon.as_deref().unwrap_or("")
        ));
    }

    fn add_menu(&mut self, name: &str, command_ids: &[String]) {
        self.lines.push(format!("menu {}: {}", name, command_ids.join(", ")));
    }

    fn add_toolbar_items(&mut self, command_ids: &[String]) {
        self.lines.push(format!("toolbar: {}", command_ids.join(", ")));
    }

    fn create_icon(&mut self, locator: &str) -> Option<String> {
        (!locator.is_empty()).then(|| locator.to_string())
    }
}

fn list(session: &Session, location: &str, sizes: bool) -> AppResult<()> {
    let panel = Panel::open(session.providers.get_directory(location)?)?;

    if sizes {
        let mut tasks = Vec::new();
        for row in 0..panel.len() {
            if panel.display_name(row).as_deref() == Some(twincom::panel::PARENT_NAME) {
                continue;
            }
            if let Some(task) = panel.calculate_size(&session.engine, row, None)? {
                tasks.push(task);
            }
        }
        while !session.event_loop.pump_until(Duration::from_millis(250), || {
            tasks.iter().all(TaskHandle::is_terminal)
        }) {}
        // Terminal events posted last still have to reach the panel
        session.event_loop.run_pending();
    }

    println!("{}", panel.directory().path());
    for row in 0..panel.len() {
        let (Some(name), Some(file)) = (panel.display_name(row), panel.row(row)) else {
            continue;
        };
        println!("{:<40} {:<8} {:>12}", name, type_label(file.as_ref()), panel.size(file.as_ref()));
    }
    Ok(())
}

fn size(session: &Session, location: &str) -> AppResult<()> {
    let target = session.providers.get_element(location)?;
    let command = CalculateSize::for_target(Arc::clone(&target));
    let result = command.result();
    let outcome = Outcome::default();

    let directory = match target.parent() {
        Some(parent) => parent,
        None => session.providers.get_directory(location)?,
    };
    let context = Context::new(directory).with_selection(vec![Arc::clone(&target)]);
    session.engine.execute(
        Handler::Long(LongTask::new(command)),
        context.clone(),
        context,
        Some(Box::new(BarListener::new(outcome.clone()))),
    )?;
    session.wait(&outcome)?;

    println!("{}\t{}", result.get().unwrap_or(0), target.path());
    Ok(())
}

fn run_named(session: &Session, type_name: &str, active: Context, inactive: Context) -> AppResult<()> {
    let outcome = Outcome::default();
    let queued = session.engine.execute_named(
        type_name,
        active,
        inactive,
        Some(Box::new(BarListener::new(outcome.clone()))),
    )?;
    if queued {
        session.wait(&outcome)?;
    }
    Ok(())
}

fn run(args: Args) -> AppResult<()> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    logging::init(&config.settings.log.level);
    if let Some(path) = config.path() {
        tracing::debug!(path = %path.display(), "configuration loaded");
    }

    if let Cmd::Zip { name: Some(name), .. } = &args.command {
        config.settings.archive.name = name.clone();
    }
    let session = Session::start(&config)?;

    match args.command {
        Cmd::Ls { location, sizes } => {
            let location = location
                .or_else(|| config.settings.panels.left.clone())
                .unwrap_or_else(|| ".".to_string());
            list(&session, &location, sizes)
        }
        Cmd::Size { location } => size(&session, &location),
        Cmd::Copy { sources, to } => {
            let active = session.selection_context(&sources)?;
            let inactive = Context::new(session.providers.get_directory(&to)?);
            run_named(&session, ops::COPY, active, inactive)
        }
        Cmd::Zip { sources, .. } => {
            let active = session.selection_context(&sources)?;
            run_named(&session, ops::ZIP, active.clone(), active)
        }
        Cmd::Mkdir { location } => {
            let directory = session
                .providers
                .get_directory(location.as_deref().unwrap_or("."))?;
            let active = Context::new(directory);
            run_named(&session, ops::NEW_DIRECTORY, active.clone(), active)
        }
        Cmd::Commands => {
            let mut menus = TextMenus::default();
            CommandCatalog::builtin().install(&mut menus);
            for line in menus.lines {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tc: {}", e);
            ExitCode::FAILURE
        }
    }
}
