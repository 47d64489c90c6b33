//! Shared fixtures for driving strategies without touching the OS

use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;

use super::ConfigureContext;
use crate::install::async_task::AsyncTask;
use crate::install::logger::BatchLogger;
use crate::install::platform::PlatformServices;
use crate::install::progress::ProgressSink;
use crate::install::runner::{ProcessOutput, RunError, RunRequest};
use crate::install::settings::InstallSettings;

type ExitCodeFn = Box<dyn Fn(&str) -> i32 + Send + Sync>;
type SpawnHook = Box<dyn Fn(&Path) + Send + Sync>;

/// Records commands and answers them from a closure
pub(crate) struct FakeServices {
    exit_code_for: ExitCodeFn,
    on_spawn: SpawnHook,
    browser_fails: bool,
    pub commands: Mutex<Vec<String>>,
    pub opened: Mutex<Vec<String>>,
    pub spawns: AtomicUsize,
}

impl FakeServices {
    pub fn new() -> Self {
        Self {
            exit_code_for: Box::new(|_| 1),
            on_spawn: Box::new(|_| {}),
            browser_fails: false,
            commands: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            spawns: AtomicUsize::new(0),
        }
    }

    pub fn exit_codes(mut self, f: impl Fn(&str) -> i32 + Send + Sync + 'static) -> Self {
        self.exit_code_for = Box::new(f);
        self
    }

    /// Runs with the working directory of every detached start
    pub fn on_spawn(mut self, f: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.on_spawn = Box::new(f);
        self
    }

    pub fn browser_fails(mut self) -> Self {
        self.browser_fails = true;
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }
}

impl PlatformServices for FakeServices {
    fn has_elevated_privileges(&self) -> AsyncTask<bool> {
        AsyncTask::ready(true)
    }

    fn extract_archive(
        &self,
        _archive: &Path,
        _target: &Path,
        _request: RunRequest,
    ) -> AsyncTask<Result<ProcessOutput, RunError>> {
        AsyncTask::ready(Err(RunError::Archive("not supported here".into())))
    }

    fn open_url(&self, url: &str) -> AsyncTask<anyhow::Result<()>> {
        self.opened.lock().unwrap().push(url.to_string());
        if self.browser_fails {
            AsyncTask::ready(Err(anyhow!("no browser available")))
        } else {
            AsyncTask::ready(Ok(()))
        }
    }

    fn grant_full_access(&self, _path: &Path) -> AsyncTask<anyhow::Result<()>> {
        AsyncTask::ready(Ok(()))
    }

    fn run_silent_install(&self, request: RunRequest) -> AsyncTask<Result<ProcessOutput, RunError>> {
        let code = (self.exit_code_for)(&request.command);
        self.commands.lock().unwrap().push(request.command);
        AsyncTask::ready(Ok(ProcessOutput {
            exit_code: Some(code),
            ..ProcessOutput::default()
        }))
    }

    fn spawn_detached(&self, _program: &Path, _args: &[String], cwd: &Path) -> anyhow::Result<()> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        (self.on_spawn)(cwd);
        Ok(())
    }
}

pub(crate) fn context(
    root: &Path,
    services: Arc<FakeServices>,
    settings: InstallSettings,
) -> ConfigureContext {
    ConfigureContext {
        name: "demo".to_string(),
        install_path: root.join("install"),
        logger: BatchLogger::at(root.join("batch.log")),
        sink: ProgressSink::disabled(),
        services,
        cancel: CancellationToken::new(),
        settings: Arc::new(settings),
    }
}

pub(crate) fn settings(root: &Path) -> InstallSettings {
    InstallSettings::new(root.join("installers"), root.join("install"), root.join("logs"))
}

pub(crate) fn batch_log(ctx: &ConfigureContext) -> String {
    std::fs::read_to_string(ctx.logger.path()).unwrap_or_default()
}

/// A localhost port nothing listens on
pub(crate) fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Answers every request with 200 and the given `Server` header
pub(crate) fn http_responder(server: &str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let response = format!(
        "HTTP/1.1 200 OK\r\nServer: {server}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok"
    );
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut request = [0u8; 2048];
            let _ = stream.read(&mut request);
            let _ = stream.write_all(response.as_bytes());
        }
    });
    port
}

/// Appends one line to `<home>/logs/error.log`
pub(crate) fn append_error_log(home: &Path, line: &str) {
    let path: PathBuf = home.join("logs").join("error.log");
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    writeln!(file, "{line}").unwrap();
}
