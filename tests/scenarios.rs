//! End-to-end flows through the engine, the event loop and real backends

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use twincom::api::{DirectoryHandle, FileHandle, FileRef, FsError};
use twincom::command::{
    Context, FailureListener, Handler, LongCommand, LongTask, Phase, ProgressEvent,
    ProgressListener, Reporter, TaskHandle,
};
use twincom::dispatch::EventLoop;
use twincom::engine::{CommandExecutor, CommandRegistry, POOL_SIZE_KEY};
use twincom::errors::{CommandError, EngineError};
use twincom::ops::{self, Copy, NewDirectory};
use twincom::providers::{LocalBackend, MemoryBackend, MemoryStore, ProviderRegistry};

const WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Progress(i32),
    Finished,
    Failed(String),
}

/// Records every event and the thread it arrived on
#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<(Seen, ThreadId)>>>,
}

impl Recorder {
    fn events(&self) -> Vec<Seen> {
        self.events.lock().unwrap().iter().map(|(e, _)| e.clone()).collect()
    }

    fn threads(&self) -> Vec<ThreadId> {
        self.events.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    fn terminal_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| !matches!(e, Seen::Progress(_)))
            .count()
    }

    fn push(&self, seen: Seen) {
        self.events.lock().unwrap().push((seen, thread::current().id()));
    }
}

impl FailureListener for Recorder {
    fn failed(&mut self, _source: &TaskHandle, cause: &CommandError) {
        self.push(Seen::Failed(cause.to_string()));
    }
}

impl ProgressListener for Recorder {
    fn progress_changed(&mut self, _source: &TaskHandle, event: &ProgressEvent) {
        self.push(Seen::Progress(event.new));
    }

    fn finished(&mut self, _source: &TaskHandle) {
        self.push(Seen::Finished);
    }
}

fn engine(event_loop: &EventLoop, workers: &str) -> CommandExecutor {
    let props = HashMap::from([(POOL_SIZE_KEY.to_string(), workers.to_string())]);
    let mut registry = CommandRegistry::new();
    ops::register_builtin(&mut registry, ops::DEFAULT_ARCHIVE_NAME);
    CommandExecutor::new(&props, event_loop.poster())
        .unwrap()
        .with_registry(registry)
}

fn local_dir(path: &Path) -> twincom::api::DirRef {
    LocalBackend::handle(path).as_directory().unwrap()
}

fn sorted_children(dir: &twincom::api::DirRef) -> Vec<FileRef> {
    let mut files = dir.files().unwrap();
    files.sort_by_key(|f| f.name());
    files
}

#[test]
fn copy_tree_through_engine() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    fs::create_dir_all(src.join("empty")).unwrap();
    fs::create_dir_all(&dst).unwrap();
    fs::write(src.join("ten.bin"), [7u8; 10]).unwrap();
    fs::write(src.join("twenty.bin"), [9u8; 20]).unwrap();

    let event_loop = EventLoop::new();
    let engine = engine(&event_loop, "2");
    let source_dir = local_dir(&src);
    let active = Context::new(Arc::clone(&source_dir))
        .with_selection(sorted_children(&source_dir));
    let inactive = Context::new(local_dir(&dst));

    let task = LongTask::new(Copy::new());
    let handle = task.handle();
    let recorder = Recorder::default();
    let queued = engine
        .execute(Handler::Long(task), active, inactive, Some(Box::new(recorder.clone())))
        .unwrap();
    assert!(queued);

    assert!(event_loop.pump_until(WAIT, || recorder.terminal_count() == 1));
    assert_eq!(handle.phase(), Phase::Finished);
    assert_eq!(handle.progress(), 100);

    assert!(dst.join("empty").is_dir());
    assert_eq!(fs::read_dir(dst.join("empty")).unwrap().count(), 0);
    assert_eq!(fs::read(dst.join("ten.bin")).unwrap(), vec![7u8; 10]);
    assert_eq!(fs::read(dst.join("twenty.bin")).unwrap(), vec![9u8; 20]);

    // Monotone progress ending at 100, then exactly one terminal event
    let events = recorder.events();
    let progress: Vec<i32> = events
        .iter()
        .filter_map(|e| match e {
            Seen::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100));
    assert_eq!(events.last(), Some(&Seen::Finished));

    // Delivered on the thread pumping the loop
    let me = thread::current().id();
    assert!(recorder.threads().iter().all(|t| *t == me));

    engine.shutdown();
}

#[test]
fn unknown_scheme_is_an_error_value() {
    let registry = ProviderRegistry::installed();
    let Err(err) = registry.get_element("ftp://example.com/pub") else {
        panic!("ftp has no provider");
    };
    assert!(matches!(err, FsError::NoProvider(ref scheme) if scheme == "ftp"));
}

/// Cancels the task as soon as the first progress event arrives
struct CancelOnFirstProgress(Recorder);

impl FailureListener for CancelOnFirstProgress {
    fn failed(&mut self, source: &TaskHandle, cause: &CommandError) {
        self.0.failed(source, cause);
    }
}

impl ProgressListener for CancelOnFirstProgress {
    fn progress_changed(&mut self, source: &TaskHandle, event: &ProgressEvent) {
        source.cancel();
        self.0.progress_changed(source, event);
    }

    fn finished(&mut self, source: &TaskHandle) {
        self.0.finished(source);
    }
}

#[test]
fn cancel_stops_before_next_file() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    fs::create_dir_all(&src).unwrap();
    fs::create_dir_all(&dst).unwrap();
    fs::write(src.join("1.bin"), [1u8; 10]).unwrap();
    fs::write(src.join("2.bin"), [2u8; 20]).unwrap();
    fs::write(src.join("3.bin"), [3u8; 30]).unwrap();

    let source_dir = local_dir(&src);
    let active = Context::new(Arc::clone(&source_dir))
        .with_selection(sorted_children(&source_dir));
    let inactive = Context::new(local_dir(&dst));

    let task = LongTask::new(Copy::new());
    let handle = task.handle();
    let recorder = Recorder::default();
    handle.add_listener(Box::new(CancelOnFirstProgress(recorder.clone())));
    task.run_blocking(&active, &inactive);

    assert_eq!(handle.phase(), Phase::Failed);
    assert!(handle.is_canceled());
    assert_eq!(
        recorder.events(),
        vec![
            Seen::Progress(17),
            Seen::Failed(CommandError::Canceled.to_string())
        ]
    );

    assert_eq!(fs::read(dst.join("1.bin")).unwrap(), vec![1u8; 10]);
    assert!(!dst.join("2.bin").exists());
    assert!(!dst.join("3.bin").exists());
}

/// Blocks its worker until released
struct Gate(mpsc::Receiver<()>);

impl LongCommand for Gate {
    fn name(&self) -> &str {
        "Gate"
    }

    fn run(&mut self, progress: &Reporter, _active: &Context, _inactive: &Context) {
        let released = self.0.recv_timeout(WAIT).is_ok();
        if released {
            progress.set_progress(100);
            progress.finished();
        } else {
            progress.failed(CommandError::Other("never released".to_string()));
        }
    }
}

#[test]
fn immediate_and_long_dispatch_back_to_back() {
    let store = MemoryStore::new();
    let event_loop = EventLoop::new();
    let engine = engine(&event_loop, "1");
    let active = Context::new(store.root());

    let (release, gate) = mpsc::channel();
    let task = LongTask::new(Gate(gate));
    let handle = task.handle();

    let ran_inline = engine
        .execute(Handler::immediate(NewDirectory::new()), active.clone(), active.clone(), None)
        .unwrap();
    let queued = engine
        .execute(Handler::Long(task), active.clone(), active, None)
        .unwrap();

    assert!(!ran_inline);
    assert!(queued);
    // Returned while the long command is still blocked on its worker
    assert!(!handle.is_terminal());
    assert!(store.handle("/New Folder").is_directory());

    release.send(()).unwrap();
    assert!(event_loop.pump_until(WAIT, || handle.is_terminal()));
    assert_eq!(handle.phase(), Phase::Finished);
    engine.shutdown();
}

#[test]
fn copy_between_backends_by_type_name() {
    let store = MemoryStore::new();
    store.write_file("/notes/todo.txt", "buy milk").unwrap();
    store.write_file("/notes/old/done.txt", "").unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let registry = ProviderRegistry::new(vec![
        Arc::new(LocalBackend::new()) as Arc<dyn twincom::api::BackendFactory>,
        Arc::new(MemoryBackend::new(Arc::clone(&store))),
    ]);
    let notes = registry.get_element("mem:/notes").unwrap();
    let target = registry
        .get_directory(&tmp.path().to_string_lossy())
        .unwrap();

    let event_loop = EventLoop::new();
    let engine = engine(&event_loop, "2");
    let recorder = Recorder::default();
    let active = Context::new(store.root()).with_selection(vec![notes]);
    engine
        .execute_named(
            ops::COPY,
            active,
            Context::new(target),
            Some(Box::new(recorder.clone())),
        )
        .unwrap();

    assert!(event_loop.pump_until(WAIT, || recorder.terminal_count() == 1));
    assert_eq!(recorder.events().last(), Some(&Seen::Finished));
    assert_eq!(
        fs::read_to_string(tmp.path().join("notes/todo.txt")).unwrap(),
        "buy milk"
    );
    assert!(tmp.path().join("notes/old/done.txt").is_file());
    engine.shutdown();
}

#[test]
fn unknown_type_name_and_stopped_engine() {
    let event_loop = EventLoop::new();
    let engine = engine(&event_loop, "1");
    let ctx = Context::new(MemoryStore::new().root());

    let err = engine
        .execute_named("Defragment", ctx.clone(), ctx.clone(), None)
        .unwrap_err();
    assert!(matches!(err, EngineError::Instantiation { ref type_name, .. } if type_name == "Defragment"));

    engine.shutdown();
    engine.shutdown();
    let err = engine
        .execute(Handler::immediate(NewDirectory::new()), ctx.clone(), ctx, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::Stopped));
}
